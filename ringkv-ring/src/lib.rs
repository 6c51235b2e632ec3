// Consistent-hash placement. Given a key and the current ring size, pick
// `min(replication_factor, ring_size)` distinct positions in 0..ring_size.
// A position is an index into the sorted-by-id list of data-bearing peers
// (see ringkv-membership::MembershipView::data_peers_sorted), not a peer id
// itself.
//
// The digest is produced by hashing the key together with an incrementing
// window counter, which gives us as many independent 4-byte windows as we
// need without ever materializing a long fixed buffer. rapidhash is not
// cryptographic but is collision-resistant enough for ring placement, and
// it's already in the workspace's dependency set.
//
// Position space is 0..=ring_size: `ring_size` itself is a sentinel
// (standing in for the reserved ids outside the data-bearing range) that is
// always skipped, exactly like an already-chosen position, advancing by one
// modulo ring_size+1 until an admissible, unused position is found.

use rapidhash::rapidhash_seed;

#[cfg(test)]
use test_log::test;

fn digest_window(key: &str, window: u64) -> u32 {
    let h = rapidhash_seed(key.as_bytes(), window);
    (h >> 32) as u32 ^ (h as u32)
}

/// Deterministic replica positions for `key` over a ring of `ring_size` data
/// peers, capped at `replication_factor`. Returns an empty vec if
/// `ring_size` is 0.
pub fn placement(key: &str, ring_size: usize, replication_factor: usize) -> Vec<usize> {
    if ring_size == 0 {
        return Vec::new();
    }
    let r_f = replication_factor.min(ring_size);
    let modulus = ring_size + 1;
    let mut chosen: Vec<usize> = Vec::with_capacity(r_f);
    let mut window: u64 = 0;
    while chosen.len() < r_f {
        let raw = digest_window(key, window);
        window += 1;
        let mut pos = (raw as usize) % modulus;
        while pos == ring_size || chosen.contains(&pos) {
            pos = (pos + 1) % modulus;
        }
        chosen.push(pos);
    }
    chosen
}

#[test]
fn placement_is_deterministic() {
    let a = placement("some-key", 5, 3);
    let b = placement("some-key", 5, 3);
    assert_eq!(a, b);
}

#[test]
fn placement_respects_replication_factor() {
    let p = placement("K", 10, 2);
    assert_eq!(p.len(), 2);
}

#[test]
fn placement_caps_at_ring_size() {
    let p = placement("K", 1, 3);
    assert_eq!(p.len(), 1);
}

#[test]
fn placement_positions_are_distinct_and_in_range() {
    let p = placement("another-key", 7, 4);
    assert_eq!(p.len(), 4);
    let mut sorted = p.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), p.len());
    for pos in p {
        assert!(pos < 7);
    }
}

#[test]
fn placement_empty_ring() {
    assert!(placement("K", 0, 2).is_empty());
}

#[test]
fn placement_varies_with_key() {
    let a = placement("alpha", 8, 3);
    let b = placement("beta", 8, 3);
    assert_ne!(a, b);
}
