// The peer state machine (§4.3): one `Node` value per process, tagged with
// a `Role` that governs which messages `dispatch::tick` accepts and how
// `coordinator`/`client` drive request/response round trips against it.
//
// A peer record is never shared across threads -- the dispatch loop and
// every coordinator orchestration run on whichever thread owns the `Node`,
// matching §5's single-dispatch-thread ownership model.

mod client;
mod coordinator;
mod dispatch;
mod gossip;

pub use client::ReadResult;
pub use coordinator::FoundRecord;

use std::net::Ipv4Addr;
use std::time::Duration;

use ringkv_base::{err_kind, now_unix, Kind, Result, CLIENT_ID, COORDINATOR_ID};
use ringkv_membership::{MembershipView, Status};
use ringkv_net::{send_and_await, Body, Message, SendOutcome, Transport};
use ringkv_store::Store;
use tracing::info;

#[cfg(test)]
use test_log::test;

/// Sentinel source id for the one message a peer sends before it has been
/// assigned a real id: the bootstrap `JoinRequest`. The Coordinator derives
/// the new id from its own counter, never from this field.
pub(crate) const PENDING_ID: i64 = i64::MIN;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub port: u16,
    pub replication_factor: usize,
    pub default_ring_size: usize,
    pub network_timeout: Duration,
    pub store_path: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            port: 8080,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout: Duration::from_millis(2000),
            store_path: ":memory:".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Node,
    Client,
}

/// A running peer. Construct with [`Node::start_coordinator`],
/// [`Node::join_as_node`], or [`Node::connect_as_client`]; drive with
/// [`Node::run`]/[`Node::tick`] (Coordinator and Node roles) or the
/// `client_read`/`client_write`/`client_delete` methods (Client role).
pub struct Node {
    pub id: i64,
    pub address: Ipv4Addr,
    pub role: Role,
    pub config: NodeConfig,
    pub view: MembershipView,
    pub coordinator_address: Ipv4Addr,
    store: Option<Store>,
    transport: Option<Transport>,
    next_id: i64,
}

impl Node {
    pub fn start_coordinator(address: Ipv4Addr, config: NodeConfig) -> Result<Node> {
        let transport = Transport::bind(address, config.port)?;
        let store = Store::open(&config.store_path)?;
        let mut view = MembershipView::new();
        view.admit(COORDINATOR_ID, address, Status::Coordinator, now_unix());
        info!(%address, port = config.port, "coordinator listening");
        Ok(Node {
            id: COORDINATOR_ID,
            address,
            role: Role::Coordinator,
            coordinator_address: address,
            view,
            store: Some(store),
            transport: Some(transport),
            config,
            next_id: 1,
        })
    }

    /// Bind a listener, then send a `JoinRequest` to the Coordinator and
    /// block for the `JoinResponse` that assigns this peer's id (§4.3).
    pub fn join_as_node(
        coordinator_address: Ipv4Addr,
        address: Ipv4Addr,
        config: NodeConfig,
    ) -> Result<Node> {
        let transport = Transport::bind(address, config.port)?;
        let store = Store::open(&config.store_path)?;

        let req = Message::new(address, coordinator_address, PENDING_ID, Body::JoinRequest);
        let outcome = send_and_await(
            coordinator_address,
            config.port,
            &req,
            config.network_timeout,
        )?;
        let reply = match outcome {
            SendOutcome::Reply(reply) => reply,
            _ => {
                return Err(err_kind(
                    Kind::ReplicaUnavailable,
                    "coordinator did not respond to JoinRequest",
                ))
            }
        };
        let new_id = match reply.body {
            Body::JoinResponse { new_id } => new_id,
            _ => {
                return Err(err_kind(
                    Kind::ProtocolViolation,
                    "unexpected reply to JoinRequest",
                ))
            }
        };

        let mut view = MembershipView::new();
        for p in reply.network.unwrap_or_default() {
            view.merge(p);
        }
        view.admit(new_id, address, Status::Node, now_unix());
        info!(new_id, %coordinator_address, "joined ring");

        Ok(Node {
            id: new_id,
            address,
            role: Role::Node,
            coordinator_address,
            view,
            store: Some(store),
            transport: Some(transport),
            config,
            next_id: 1,
        })
    }

    pub fn connect_as_client(coordinator_address: Ipv4Addr, address: Ipv4Addr, config: NodeConfig) -> Node {
        let mut view = MembershipView::new();
        view.admit(CLIENT_ID, address, Status::Client, now_unix());
        Node {
            id: CLIENT_ID,
            address,
            role: Role::Client,
            coordinator_address,
            view,
            store: None,
            transport: None,
            config,
            next_id: 1,
        }
    }

    fn store(&self) -> Result<&Store> {
        self.store
            .as_ref()
            .ok_or_else(|| err_kind(Kind::Other, "this role has no local store"))
    }

    fn assign_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[test]
fn coordinator_starts_with_itself_in_view() {
    let config = NodeConfig {
        port: 19001,
        ..NodeConfig::default()
    };
    let node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config).unwrap();
    assert_eq!(node.id, COORDINATOR_ID);
    assert!(node.view.contains(COORDINATOR_ID));
    assert_eq!(node.view.ring_size(), 0);
}
