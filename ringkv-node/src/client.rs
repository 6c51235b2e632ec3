// Client role (§4.3): no listen loop, just request/response round trips
// against the Coordinator, one connection per call.

use ringkv_base::{err_kind, Kind, Result};
use ringkv_net::{send_and_await, Body, Message, SendOutcome};

#[cfg(test)]
use test_log::test;

use crate::Node;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadResult {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
}

impl Node {
    pub fn client_read(&mut self, key: &str) -> Result<Option<ReadResult>> {
        let req = Message::new(
            self.address,
            self.coordinator_address,
            self.id,
            Body::ClientReadRequest {
                key: key.to_string(),
            },
        );
        match self.round_trip(req)? {
            Body::ClientReadResponse {
                key,
                value,
                timestamp,
            } => Ok(Some(ReadResult {
                key,
                value,
                timestamp,
            })),
            Body::FailureIndication { .. } => Ok(None),
            other => Err(err_kind(
                Kind::ProtocolViolation,
                format!("unexpected reply to ClientReadRequest: {}", other.type_name()),
            )),
        }
    }

    pub fn client_write(&mut self, key: &str, value: &str) -> Result<()> {
        let req = Message::new(
            self.address,
            self.coordinator_address,
            self.id,
            Body::ClientWriteRequest {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
        match self.round_trip(req)? {
            Body::ClientWriteResponse { .. } => Ok(()),
            Body::FailureIndication { reason } => Err(err_kind(Kind::StoreConflict, reason)),
            other => Err(err_kind(
                Kind::ProtocolViolation,
                format!("unexpected reply to ClientWriteRequest: {}", other.type_name()),
            )),
        }
    }

    pub fn client_delete(&mut self, key: &str) -> Result<()> {
        let req = Message::new(
            self.address,
            self.coordinator_address,
            self.id,
            Body::ClientDeleteRequest {
                key: key.to_string(),
            },
        );
        match self.round_trip(req)? {
            Body::DeleteAcknowledgement { .. } => Ok(()),
            Body::FailureIndication { reason } => Err(err_kind(Kind::KeyNotFound, reason)),
            other => Err(err_kind(
                Kind::ProtocolViolation,
                format!("unexpected reply to ClientDeleteRequest: {}", other.type_name()),
            )),
        }
    }

    fn round_trip(&self, req: Message) -> Result<Body> {
        match send_and_await(
            self.coordinator_address,
            self.config.port,
            &req,
            self.config.network_timeout,
        )? {
            SendOutcome::Reply(reply) => Ok(reply.body),
            _ => Err(err_kind(
                Kind::ReplicaUnavailable,
                "coordinator did not respond",
            )),
        }
    }
}
