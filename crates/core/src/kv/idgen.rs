//! Snowflake-style batch id generator.
//!
//! Layout: 41 bits of milliseconds since [`EPOCH_MS`], 10 bits of node id,
//! 12 bits of per-millisecond sequence. Ids are strictly increasing for one
//! generator even if the wall clock steps backwards.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch (2020-01-01T00:00:00Z) in milliseconds.
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct State {
    last_ms: u64,
    sequence: u64,
}

/// Generates unique, monotonically increasing 64-bit ids.
pub struct IdGenerator {
    node: u64,
    state: Mutex<State>,
}

impl IdGenerator {
    pub fn new(node: u16) -> Self {
        Self {
            node: (node as u64) & ((1 << NODE_BITS) - 1),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        let mut now = now_ms().max(state.last_ms);
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // sequence exhausted for this millisecond, borrow the next one
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;
        (now << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | state.sequence
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
        .saturating_sub(EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let ids = IdGenerator::default();
        let mut last = 0;
        for _ in 0..20_000 {
            let id = ids.next_id();
            assert!(id > last, "{id} <= {last}");
            last = id;
        }
    }

    #[test]
    fn test_node_bits_embedded() {
        let ids = IdGenerator::new(5);
        let id = ids.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & ((1 << NODE_BITS) - 1), 5);
    }
}
