// Coordinator orchestrations (§4.4): Read, Write, Delete, Stabilize. Every
// operation walks the placement list in order, sending one request per
// replica and folding the reply into the membership view's up/down state.
// None of these take `&self` -- they mutate the view (mark_down/clear_down)
// and the local lookup table, so they take `&mut Node`.

use std::net::Ipv4Addr;

use ringkv_base::{err_kind, Kind, Result};
use ringkv_net::{send_and_await, Body, Message, SendOutcome};
use tracing::warn;

#[cfg(test)]
use test_log::test;

use crate::Node;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoundRecord {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
}

fn sorted_replica_targets(node: &Node) -> Vec<(i64, Ipv4Addr)> {
    node.view
        .data_peers_sorted()
        .into_iter()
        .map(|p| (p.id, p.address))
        .collect()
}

pub fn write(node: &mut Node, key: &str, value: &str) -> Result<()> {
    let ring_size = node.view.ring_size();
    let replicas = ringkv_ring::placement(key, ring_size, node.config.replication_factor);
    let targets = sorted_replica_targets(node);

    let mut any_success = false;
    for pos in &replicas {
        let (target_id, target_addr) = match targets.get(*pos) {
            Some(t) => *t,
            None => continue,
        };
        let req = Message::new(
            node.address,
            target_addr,
            node.id,
            Body::WriteRequest {
                key: key.to_string(),
                value: value.to_string(),
            },
        )
        .with_network(
            node.view
                .piggyback_for(target_id)
                .into_iter()
                .cloned()
                .collect(),
        );
        match send_and_await(target_addr, node.config.port, &req, node.config.network_timeout)? {
            SendOutcome::Reply(reply) => match reply.body {
                Body::WriteAcknowledgement { .. } => {
                    node.view.clear_down(target_id);
                    any_success = true;
                }
                Body::FailureIndication { reason } => {
                    warn!(%reason, target_id, "write rejected by replica");
                    return Err(err_kind(Kind::StoreConflict, reason));
                }
                other => warn!(kind = other.type_name(), "unexpected reply to WriteRequest"),
            },
            _ => node.view.mark_down(target_id),
        }
    }

    if !any_success {
        return Err(err_kind(Kind::ReplicaUnavailable, "no replica accepted write"));
    }
    node.store()?.upsert_lookup(key, ring_size as i64)?;
    Ok(())
}

/// `allow_stabilize = false` is used by Stabilize itself to avoid recursion.
pub fn read(node: &mut Node, key: &str, allow_stabilize: bool) -> Result<Option<FoundRecord>> {
    let lookup = match node.store()?.get_lookup(key)? {
        Some(l) => l,
        None => return Ok(None),
    };

    let ring_size_current = node.view.ring_size() as i64;
    let ring_size_for_placement = if allow_stabilize && lookup.ring_size != ring_size_current {
        stabilize(node, key)?;
        node.store()?
            .get_lookup(key)?
            .map(|l| l.ring_size)
            .unwrap_or(lookup.ring_size)
    } else {
        lookup.ring_size
    };

    let replicas = ringkv_ring::placement(
        key,
        ring_size_for_placement as usize,
        node.config.replication_factor,
    );
    let targets = sorted_replica_targets(node);

    let mut best: Option<(i64, i64, Ipv4Addr)> = None;
    for pos in &replicas {
        let (target_id, target_addr) = match targets.get(*pos) {
            Some(t) => *t,
            None => continue,
        };
        let req = Message::new(
            node.address,
            target_addr,
            node.id,
            Body::KeyRequest {
                key: key.to_string(),
            },
        )
        .with_network(
            node.view
                .piggyback_for(target_id)
                .into_iter()
                .cloned()
                .collect(),
        );
        match send_and_await(target_addr, node.config.port, &req, node.config.network_timeout)? {
            SendOutcome::Reply(reply) => match reply.body {
                Body::KeyAcknowledgement { key: k, timestamp } if !k.is_empty() => {
                    node.view.clear_down(target_id);
                    let better = match &best {
                        None => true,
                        Some((best_id, best_ts, _)) => {
                            timestamp > *best_ts || (timestamp == *best_ts && target_id < *best_id)
                        }
                    };
                    if better {
                        best = Some((target_id, timestamp, target_addr));
                    }
                }
                Body::KeyAcknowledgement { .. } => node.view.clear_down(target_id),
                other => warn!(kind = other.type_name(), "unexpected reply to KeyRequest"),
            },
            _ => node.view.mark_down(target_id),
        }
    }

    let (best_id, _, best_addr) = match best {
        Some(b) => b,
        None => return Ok(None),
    };
    let query = Message::new(
        node.address,
        best_addr,
        node.id,
        Body::KeyQuery {
            key: key.to_string(),
        },
    )
    .with_network(
        node.view
            .piggyback_for(best_id)
            .into_iter()
            .cloned()
            .collect(),
    );
    match send_and_await(best_addr, node.config.port, &query, node.config.network_timeout)? {
        SendOutcome::Reply(reply) => match reply.body {
            Body::ValueResponse {
                key,
                value,
                timestamp,
            } => Ok(Some(FoundRecord {
                key,
                value,
                timestamp,
            })),
            _ => Ok(None),
        },
        _ => {
            node.view.mark_down(best_id);
            Ok(None)
        }
    }
}

/// `allow_stabilize = false` is used by Stabilize itself to avoid recursion.
pub fn delete(node: &mut Node, key: &str, allow_stabilize: bool) -> Result<()> {
    let lookup = match node.store()?.get_lookup(key)? {
        Some(l) => l,
        None => return Err(err_kind(Kind::KeyNotFound, format!("no lookup entry for {key}"))),
    };

    let ring_size_current = node.view.ring_size() as i64;
    let ring_size_for_placement = if allow_stabilize && lookup.ring_size != ring_size_current {
        stabilize(node, key)?;
        node.store()?
            .get_lookup(key)?
            .map(|l| l.ring_size)
            .unwrap_or(lookup.ring_size)
    } else {
        lookup.ring_size
    };

    let replicas = ringkv_ring::placement(
        key,
        ring_size_for_placement as usize,
        node.config.replication_factor,
    );
    let targets = sorted_replica_targets(node);

    for pos in &replicas {
        let (target_id, target_addr) = match targets.get(*pos) {
            Some(t) => *t,
            None => continue,
        };
        let req = Message::new(
            node.address,
            target_addr,
            node.id,
            Body::DeleteRequest {
                key: key.to_string(),
            },
        )
        .with_network(
            node.view
                .piggyback_for(target_id)
                .into_iter()
                .cloned()
                .collect(),
        );
        match send_and_await(target_addr, node.config.port, &req, node.config.network_timeout)? {
            SendOutcome::Reply(reply) => match reply.body {
                Body::DeleteAcknowledgement { .. } => node.view.clear_down(target_id),
                Body::FailureIndication { reason } => {
                    return Err(err_kind(Kind::StoreConflict, reason));
                }
                other => warn!(kind = other.type_name(), "unexpected reply to DeleteRequest"),
            },
            _ => node.view.mark_down(target_id),
        }
    }

    node.store()?.delete_lookup(key)?;
    Ok(())
}

/// Read-Delete-Write at the current ring size (§4.4). Only the Coordinator
/// calls this, and only with `allow_stabilize = true` callers (Read/Delete)
/// on behalf of a key whose recorded ring size is stale.
pub fn stabilize(node: &mut Node, key: &str) -> Result<()> {
    let record = match read(node, key, false)? {
        Some(r) => r,
        None => {
            return Err(err_kind(
                Kind::StabilizationFailure,
                "stabilize: key not found on read",
            ))
        }
    };
    if let Err(e) = delete(node, key, false) {
        warn!(%e, key, "stabilize: delete step failed");
        return Err(err_kind(Kind::StabilizationFailure, "stabilize: delete failed"));
    }
    if let Err(e) = write(node, key, &record.value) {
        warn!(%e, key, "stabilize: write step failed");
        return Err(err_kind(Kind::StabilizationFailure, "stabilize: write failed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::NodeConfig;

    fn config(port: u16) -> NodeConfig {
        NodeConfig {
            port,
            replication_factor: 2,
            default_ring_size: 3,
            network_timeout: Duration::from_millis(300),
            store_path: ":memory:".to_string(),
        }
    }

    #[test]
    fn write_with_no_replicas_fails() {
        let mut node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config(19101)).unwrap();
        let err = write(&mut node, "A", "hello").unwrap_err();
        assert_eq!(err.kind(), Kind::ReplicaUnavailable);
    }

    #[test]
    fn read_without_lookup_entry_is_not_found() {
        let mut node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config(19102)).unwrap();
        assert_eq!(read(&mut node, "missing", true).unwrap(), None);
    }

    #[test]
    fn delete_without_lookup_entry_is_key_not_found() {
        let mut node = Node::start_coordinator(Ipv4Addr::new(127, 0, 0, 1), config(19103)).unwrap();
        let err = delete(&mut node, "missing", true).unwrap_err();
        assert_eq!(err.kind(), Kind::KeyNotFound);
    }

    /// Loopback supports the whole 127.0.0.0/8 range, so distinct peers can
    /// share one cluster-wide port the way the protocol assumes while still
    /// listening on distinct local sockets.
    #[test]
    fn write_after_join_succeeds() {
        let coordinator_addr = Ipv4Addr::new(127, 0, 0, 1);
        let node_addr = Ipv4Addr::new(127, 0, 0, 2);
        let port = 19104;

        let mut coordinator =
            Node::start_coordinator(coordinator_addr, config(port)).unwrap();
        let join_thread = std::thread::spawn(move || {
            coordinator.tick().unwrap();
            coordinator
        });

        let mut node = Node::join_as_node(coordinator_addr, node_addr, config(port)).unwrap();
        let mut coordinator = join_thread.join().unwrap();
        assert_eq!(coordinator.view.ring_size(), 1);

        let write_thread = std::thread::spawn(move || {
            node.tick().unwrap();
            node
        });
        write(&mut coordinator, "A", "hello").unwrap();
        write_thread.join().unwrap();

        assert_eq!(
            coordinator
                .store()
                .unwrap()
                .get_lookup("A")
                .unwrap()
                .unwrap()
                .ring_size,
            1
        );
    }
}
