// Gossip dissemination (§4.5): the Coordinator starts one JoinIntroduction
// per admitted peer, and every recipient independently decides whether to
// relay it onward. Fan-out is a single random peer per hop, not a broadcast
// tree -- bounded, not exhaustive, dissemination.

use ringkv_base::Result;
use ringkv_membership::Peer;
use ringkv_net::{send_and_await, Body, Message, SendOutcome};
use tracing::debug;

#[cfg(test)]
use test_log::test;

use crate::Node;

pub fn initiate(node: &mut Node, new_id: i64) -> Result<()> {
    let ring_size = node.view.ring_size();
    if ring_size < 2 {
        return Ok(());
    }
    let hop_count = (ring_size / 4) as i64;
    forward(node, new_id, hop_count)
}

/// A recipient of `JoinIntroduction` calls this after merging the payload
/// view, passing the `hop_count` it received on the wire; we decrement it
/// before relaying onward ourselves.
pub fn relay(node: &mut Node, new_id: i64, hop_count: i64) -> Result<()> {
    if hop_count <= 0 {
        return Ok(());
    }
    forward(node, new_id, hop_count - 1)
}

fn forward(node: &mut Node, new_id: i64, hop_count: i64) -> Result<()> {
    let target_id = match node.view.random_data_peer_excluding(&[new_id, node.id]) {
        Some(id) => id,
        None => return Ok(()),
    };
    let target: Peer = match node.view.get(target_id) {
        Some(p) => p.clone(),
        None => return Ok(()),
    };

    debug!(new_id, target_id, hop_count, "relaying join introduction");
    let network: Vec<Peer> = node
        .view
        .piggyback_for(target_id)
        .into_iter()
        .cloned()
        .collect();
    let msg = Message::new(
        node.address,
        target.address,
        node.id,
        Body::JoinIntroduction { new_id, hop_count },
    )
    .with_network(network);

    match send_and_await(
        target.address,
        node.config.port,
        &msg,
        node.config.network_timeout,
    )? {
        SendOutcome::TimedOut => node.view.mark_down(target_id),
        _ => node.view.clear_down(target_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use ringkv_membership::Status;

    use super::*;
    use crate::NodeConfig;

    fn config(port: u16) -> NodeConfig {
        NodeConfig {
            port,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout: Duration::from_millis(200),
            store_path: ":memory:".to_string(),
        }
    }

    #[test]
    fn initiate_is_a_noop_below_two_peers() {
        let mut node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config(19201)).unwrap();
        node.view.admit(1, Ipv4Addr::new(127, 0, 0, 2), Status::Node, 1);
        // ring_size == 1 < 2: nothing should be sent, and nothing panics
        // trying to reach an address with no listener on it.
        initiate(&mut node, 1).unwrap();
    }

    #[test]
    fn relay_is_a_noop_at_zero_hops() {
        let mut node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config(19202)).unwrap();
        node.view.admit(1, Ipv4Addr::new(127, 0, 0, 2), Status::Node, 1);
        node.view.admit(2, Ipv4Addr::new(127, 0, 0, 3), Status::Node, 1);
        relay(&mut node, 3, 0).unwrap();
    }
}
