// Peer `last_updated` stamps and stored-record timestamps are both plain
// unix-second instants: good enough for last-writer-wins given honest clocks
// (see the system design notes on cross-node clock skew), and simple enough
// to put straight on the wire as a decimal integer.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
