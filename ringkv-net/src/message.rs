// All inter-peer communication takes the form of Messages: a fixed header
// (source, destination, type, the sender's id, and an optional piggybacked
// membership snapshot) followed by type-specific fields. A message has no
// back-pointers to the peers it mentions -- the network snapshot is a plain
// Vec<Peer> carried by value, rehydrated into the receiver's own
// MembershipView via the merge rule.

use std::net::Ipv4Addr;

use ringkv_membership::Peer;

#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    ClientReadRequest { key: String },
    ClientReadResponse { key: String, value: String, timestamp: i64 },
    ClientWriteRequest { key: String, value: String },
    ClientWriteResponse { key: String, value: String },
    ClientDeleteRequest { key: String },
    KeyRequest { key: String },
    /// An empty `key` signals absence, per §4.1.
    KeyAcknowledgement { key: String, timestamp: i64 },
    KeyQuery { key: String },
    ValueResponse { key: String, value: String, timestamp: i64 },
    WriteRequest { key: String, value: String },
    WriteAcknowledgement { key: String },
    DeleteRequest { key: String },
    DeleteAcknowledgement { key: String },
    Ping,
    JoinRequest,
    JoinResponse { new_id: i64 },
    JoinIntroduction { new_id: i64, hop_count: i64 },
    FailureIndication { reason: String },
}

impl Body {
    pub fn type_name(&self) -> &'static str {
        match self {
            Body::ClientReadRequest { .. } => "ClientReadRequest",
            Body::ClientReadResponse { .. } => "ClientReadResponse",
            Body::ClientWriteRequest { .. } => "ClientWriteRequest",
            Body::ClientWriteResponse { .. } => "ClientWriteResponse",
            Body::ClientDeleteRequest { .. } => "ClientDeleteRequest",
            Body::KeyRequest { .. } => "KeyRequest",
            Body::KeyAcknowledgement { .. } => "KeyAcknowledgement",
            Body::KeyQuery { .. } => "KeyQuery",
            Body::ValueResponse { .. } => "ValueResponse",
            Body::WriteRequest { .. } => "WriteRequest",
            Body::WriteAcknowledgement { .. } => "WriteAcknowledgement",
            Body::DeleteRequest { .. } => "DeleteRequest",
            Body::DeleteAcknowledgement { .. } => "DeleteAcknowledgement",
            Body::Ping => "Ping",
            Body::JoinRequest => "JoinRequest",
            Body::JoinResponse { .. } => "JoinResponse",
            Body::JoinIntroduction { .. } => "JoinIntroduction",
            Body::FailureIndication { .. } => "FailureIndication",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub source_id: i64,
    /// `None` is wire `NODE-COUNT:-1` ("no network info"); `Some(vec![])` is
    /// a present-but-empty piggyback set.
    pub network: Option<Vec<Peer>>,
    pub body: Body,
}

impl Message {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, source_id: i64, body: Body) -> Self {
        Message {
            source,
            destination,
            source_id,
            network: None,
            body,
        }
    }

    pub fn with_network(mut self, network: Vec<Peer>) -> Self {
        self.network = Some(network);
        self
    }
}
