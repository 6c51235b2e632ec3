// Per-role message dispatch (§4.3). `Node::tick` is the single entry point:
// it blocks for one inbound connection (bounded by the configured network
// timeout), merges whatever membership snapshot rode along with it, and
// hands the message to the role-specific handler. A timeout is not an
// error -- it's "no message this tick" (§5).

use ringkv_base::now_unix;
use ringkv_base::{Kind, Result};
use ringkv_membership::Status;
use ringkv_net::{reply_on, Body, Inbound, Message};
use tracing::{info, warn};

use crate::{gossip, Node, Role, PENDING_ID};

impl Node {
    /// Wait up to the configured network timeout for one inbound
    /// connection and dispatch it. No-op for the Client role, which drives
    /// request/response round trips explicitly instead of listening.
    ///
    /// A `MalformedMessage` is logged and swallowed here rather than
    /// propagated (§7): the dispatch loop must keep serving after a garbled
    /// payload. Any other error (a transport/accept failure) does propagate.
    pub fn tick(&mut self) -> Result<()> {
        let timeout = self.config.network_timeout;
        let transport = match &self.transport {
            Some(t) => t,
            None => return Ok(()),
        };
        match transport.listen_once(timeout) {
            Ok(Inbound::Timeout) => Ok(()),
            Ok(Inbound::Message(msg, stream)) => {
                self.absorb(&msg);
                if let Some(reply) = self.handle(&msg)? {
                    reply_on(stream, &reply)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == Kind::MalformedMessage => {
                warn!(%e, "dropping malformed message");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run `tick` forever. Only returns on an I/O error setting up the
    /// listener itself; per-message failures are handled and logged inside
    /// `tick`, never propagated here.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.tick()?;
        }
    }

    fn absorb(&mut self, msg: &Message) {
        if let Some(peers) = &msg.network {
            for p in peers.clone() {
                self.view.merge(p);
            }
        }
        if msg.source_id != PENDING_ID {
            self.view
                .touch(msg.source_id, msg.source, sender_status(msg.source_id), now_unix());
        }
    }

    fn handle(&mut self, msg: &Message) -> Result<Option<Message>> {
        match self.role {
            Role::Coordinator => self.handle_as_coordinator(msg),
            Role::Node => self.handle_as_node(msg),
            Role::Client => {
                warn!("client role received an inbound connection; ignoring");
                Ok(None)
            }
        }
    }

    /// Build a reply to `to`, carrying this peer's membership view minus
    /// the receiving host and any Client entries (§4.1).
    fn reply(&self, to: &Message, body: Body) -> Message {
        Message::new(self.address, to.source, self.id, body).with_network(
            self.view
                .piggyback_for(to.source_id)
                .into_iter()
                .cloned()
                .collect(),
        )
    }

    fn handle_as_node(&mut self, msg: &Message) -> Result<Option<Message>> {
        let now = now_unix();
        let reply = match &msg.body {
            Body::WriteRequest { key, value } => match self.store()?.upsert_record(key, value, now) {
                Ok(()) => Some(self.reply(msg, Body::WriteAcknowledgement { key: key.clone() })),
                Err(e) => Some(self.reply(msg, Body::FailureIndication { reason: e.to_string() })),
            },
            Body::DeleteRequest { key } => match self.store()?.delete_record(key) {
                Ok(true) => Some(self.reply(msg, Body::DeleteAcknowledgement { key: key.clone() })),
                Ok(false) => Some(self.reply(
                    msg,
                    Body::FailureIndication {
                        reason: "key not found".into(),
                    },
                )),
                Err(e) => Some(self.reply(msg, Body::FailureIndication { reason: e.to_string() })),
            },
            Body::KeyRequest { key } => {
                let (k, ts) = match self.store()?.get_record(key)? {
                    Some(row) => (row.key, row.timestamp),
                    None => (String::new(), 0),
                };
                Some(self.reply(msg, Body::KeyAcknowledgement { key: k, timestamp: ts }))
            }
            Body::KeyQuery { key } => match self.store()?.get_record(key)? {
                Some(row) => Some(self.reply(
                    msg,
                    Body::ValueResponse {
                        key: row.key,
                        value: row.value,
                        timestamp: row.timestamp,
                    },
                )),
                None => Some(self.reply(
                    msg,
                    Body::FailureIndication {
                        reason: "Key does not exist".into(),
                    },
                )),
            },
            Body::JoinIntroduction { new_id, hop_count } => {
                gossip::relay(self, *new_id, *hop_count)?;
                None
            }
            Body::Ping => None,
            other => {
                warn!(kind = other.type_name(), "node role received unexpected message type");
                None
            }
        };
        Ok(reply)
    }

    fn handle_as_coordinator(&mut self, msg: &Message) -> Result<Option<Message>> {
        let reply = match &msg.body {
            Body::JoinRequest => {
                let new_id = self.assign_id();
                self.view.admit(new_id, msg.source, Status::Node, now_unix());
                info!(new_id, %msg.source, "admitted peer");
                let reply = self.reply(msg, Body::JoinResponse { new_id });
                gossip::initiate(self, new_id)?;
                Some(reply)
            }
            Body::ClientReadRequest { key } => match crate::coordinator::read(self, key, true) {
                Ok(Some(rec)) => Some(self.reply(
                    msg,
                    Body::ClientReadResponse {
                        key: rec.key,
                        value: rec.value,
                        timestamp: rec.timestamp,
                    },
                )),
                Ok(None) => Some(self.reply(
                    msg,
                    Body::FailureIndication {
                        reason: "Key does not exist".into(),
                    },
                )),
                Err(e) => Some(self.reply(msg, Body::FailureIndication { reason: e.to_string() })),
            },
            Body::ClientWriteRequest { key, value } => {
                match crate::coordinator::write(self, key, value) {
                    Ok(()) => Some(self.reply(
                        msg,
                        Body::ClientWriteResponse {
                            key: key.clone(),
                            value: value.clone(),
                        },
                    )),
                    Err(e) => Some(self.reply(msg, Body::FailureIndication { reason: e.to_string() })),
                }
            }
            Body::ClientDeleteRequest { key } => match crate::coordinator::delete(self, key, true) {
                Ok(()) => Some(self.reply(msg, Body::DeleteAcknowledgement { key: key.clone() })),
                Err(e) => Some(self.reply(msg, Body::FailureIndication { reason: e.to_string() })),
            },
            other => {
                warn!(kind = other.type_name(), "coordinator received unexpected message type");
                None
            }
        };
        Ok(reply)
    }
}

fn sender_status(id: i64) -> Status {
    if id == ringkv_base::COORDINATOR_ID {
        Status::Coordinator
    } else if id == ringkv_base::CLIENT_ID {
        Status::Client
    } else {
        Status::Node
    }
}
