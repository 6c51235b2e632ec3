// The membership view is the one piece of state every role carries. A
// Coordinator's view is authoritative; a Node's or Client's view is a
// snapshot kept loosely in sync by piggybacked peer blocks and gossip.
//
// Peers are value records keyed by id in a map -- nothing here ever holds
// a reference to another Peer, only its id, so there is no cyclic
// node-carries-network-carries-node structure to manage.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use rand::seq::IteratorRandom;
use ringkv_base::{is_reserved_id, CLIENT_ID, COORDINATOR_ID};

#[cfg(test)]
use test_log::test;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Coordinator,
    Node,
    Client,
}

impl Status {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Status::Coordinator => "COORDINATOR",
            Status::Node => "NODE",
            Status::Client => "CLIENT",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Status> {
        match s {
            "COORDINATOR" => Some(Status::Coordinator),
            "NODE" => Some(Status::Node),
            "CLIENT" => Some(Status::Client),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub id: i64,
    pub address: Ipv4Addr,
    pub status: Status,
    pub is_down: bool,
    pub last_updated: i64,
}

impl Peer {
    pub fn new(id: i64, address: Ipv4Addr, status: Status, last_updated: i64) -> Self {
        Peer {
            id,
            address,
            status,
            is_down: false,
            last_updated,
        }
    }

    pub fn is_data_bearing(&self) -> bool {
        !is_reserved_id(self.id)
    }
}

/// A peer's view of the network: a map from id to peer record, plus the
/// merge rule that lets gossip and piggybacked updates converge.
#[derive(Clone, Debug, Default)]
pub struct MembershipView {
    peers: BTreeMap<i64, Peer>,
}

impl MembershipView {
    pub fn new() -> Self {
        MembershipView {
            peers: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of data-bearing peers (excludes the Coordinator and any Client).
    pub fn ring_size(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.is_data_bearing())
            .count()
    }

    /// Data-bearing peers in ascending id order -- the order Placement indexes into.
    pub fn data_peers_sorted(&self) -> Vec<&Peer> {
        self.peers
            .values()
            .filter(|p| p.is_data_bearing())
            .collect()
    }

    /// Merge rule (§4.5): insert if unseen, replace if the incoming record is
    /// strictly newer, otherwise ignore. Returns true if the view changed.
    pub fn merge(&mut self, incoming: Peer) -> bool {
        match self.peers.get(&incoming.id) {
            None => {
                self.peers.insert(incoming.id, incoming);
                true
            }
            Some(existing) => {
                if incoming.last_updated > existing.last_updated {
                    self.peers.insert(incoming.id, incoming);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Insert a peer the local process just learned about directly (e.g. a
    /// freshly admitted JoinRequest), unconditionally stamping `now`.
    pub fn admit(&mut self, id: i64, address: Ipv4Addr, status: Status, now: i64) {
        self.peers.insert(id, Peer::new(id, address, status, now));
    }

    pub fn mark_down(&mut self, id: i64) {
        if let Some(p) = self.peers.get_mut(&id) {
            p.is_down = true;
        }
    }

    pub fn clear_down(&mut self, id: i64) {
        if let Some(p) = self.peers.get_mut(&id) {
            p.is_down = false;
        }
    }

    /// Ping side effect (§4.3): note that `id` is alive as of `now`, without
    /// regressing anything if we already have a fresher record.
    pub fn touch(&mut self, id: i64, address: Ipv4Addr, status: Status, now: i64) {
        self.merge(Peer::new(id, address, status, now));
    }

    /// Piggyback set for an outgoing message: every data-bearing and
    /// Coordinator peer except `exclude_id` (the receiving host) and any
    /// Client peer, per §4.1.
    pub fn piggyback_for(&self, exclude_id: i64) -> Vec<&Peer> {
        self.peers
            .values()
            .filter(|p| p.id != exclude_id && p.status != Status::Client)
            .collect()
    }

    /// Pick a uniformly random data-bearing peer, excluding the given ids.
    /// Used both to start gossip and to relay it onward.
    pub fn random_data_peer_excluding(&self, exclude: &[i64]) -> Option<i64> {
        self.peers
            .values()
            .filter(|p| p.is_data_bearing() && !exclude.contains(&p.id))
            .map(|p| p.id)
            .choose(&mut rand::thread_rng())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

#[test]
fn merge_inserts_unseen_peer() {
    let mut view = MembershipView::new();
    assert!(view.merge(Peer::new(1, Ipv4Addr::LOCALHOST, Status::Node, 100)));
    assert_eq!(view.ring_size(), 1);
}

#[test]
fn merge_ignores_stale_update() {
    let mut view = MembershipView::new();
    view.merge(Peer::new(1, Ipv4Addr::LOCALHOST, Status::Node, 100));
    let changed = view.merge(Peer::new(1, Ipv4Addr::LOCALHOST, Status::Node, 50));
    assert!(!changed);
    assert_eq!(view.get(1).unwrap().last_updated, 100);
}

#[test]
fn merge_accepts_fresher_update() {
    let mut view = MembershipView::new();
    view.merge(Peer::new(1, Ipv4Addr::LOCALHOST, Status::Node, 100));
    let changed = view.merge(Peer::new(1, Ipv4Addr::new(10, 0, 0, 1), Status::Node, 200));
    assert!(changed);
    assert_eq!(view.get(1).unwrap().address, Ipv4Addr::new(10, 0, 0, 1));
}

#[test]
fn ring_size_excludes_reserved_ids() {
    let mut view = MembershipView::new();
    view.admit(COORDINATOR_ID, Ipv4Addr::LOCALHOST, Status::Coordinator, 1);
    view.admit(CLIENT_ID, Ipv4Addr::LOCALHOST, Status::Client, 1);
    view.admit(1, Ipv4Addr::LOCALHOST, Status::Node, 1);
    view.admit(2, Ipv4Addr::LOCALHOST, Status::Node, 1);
    assert_eq!(view.ring_size(), 2);
}

#[test]
fn piggyback_excludes_client_and_receiving_host() {
    let mut view = MembershipView::new();
    view.admit(COORDINATOR_ID, Ipv4Addr::LOCALHOST, Status::Coordinator, 1);
    view.admit(CLIENT_ID, Ipv4Addr::LOCALHOST, Status::Client, 1);
    view.admit(1, Ipv4Addr::LOCALHOST, Status::Node, 1);
    view.admit(2, Ipv4Addr::LOCALHOST, Status::Node, 1);
    let pb = view.piggyback_for(1);
    let ids: Vec<i64> = pb.iter().map(|p| p.id).collect();
    assert!(!ids.contains(&1));
    assert!(!ids.contains(&CLIENT_ID));
    assert!(ids.contains(&COORDINATOR_ID));
    assert!(ids.contains(&2));
}
