//! Diagnostics: per-node shape, arena usage, and whole-tree summaries.
//!
//! None of this is needed for correctness; it exists so callers can report
//! how well the span compression and the arena are doing.

use std::fmt;

use crate::arena::Offset;
use crate::node::FANOUT;

/// Aggregate arena usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Successful allocations.
    pub allocations: usize,
    /// Allocations retired as dead.
    pub dead_allocations: usize,
    /// Bytes held by dead allocations.
    pub dead_bytes: usize,
    /// Bytes below the cursor, padding and reserved prefix included.
    pub bytes_in_use: usize,
    /// Maximum bytes the arena can hand out.
    pub capacity: usize,
    pub largest_allocation: usize,
}

impl ArenaStats {
    pub fn live_bytes(&self) -> usize {
        self.bytes_in_use - self.dead_bytes
    }

    /// Fraction of used bytes that are dead.
    pub fn fragmentation(&self) -> f64 {
        if self.bytes_in_use == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.bytes_in_use as f64
        }
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arena: {}/{} bytes used, {} allocations, {} dead ({} bytes, {:.1}%)",
            self.bytes_in_use,
            self.capacity,
            self.allocations,
            self.dead_allocations,
            self.dead_bytes,
            self.fragmentation() * 100.0
        )
    }
}

/// Shape of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub offset: Offset,
    pub min_index: Option<u8>,
    pub max_index: Option<u8>,
    /// Slots covering `[min_index, max_index]`.
    pub span: usize,
    pub spare: usize,
    /// `span + spare`.
    pub capacity: usize,
    /// Non-empty slots.
    pub children: usize,
    /// Bytes occupied in the arena.
    pub bytes: usize,
    pub dead: bool,
}

impl NodeStats {
    /// Stored slots relative to a full 256-slot array. Lower is better.
    pub fn compression_ratio(&self) -> f64 {
        self.capacity as f64 / FANOUT as f64
    }

    /// Fraction of stored slots that hold a child.
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.children as f64 / self.capacity as f64
        }
    }
}

/// Summary over every node reachable from the root.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeStats {
    pub keys: usize,
    pub nodes: usize,
    /// Stored slots over all reachable nodes.
    pub slots: usize,
    /// Non-empty slots over all reachable nodes.
    pub children: usize,
    pub leaf_edges: usize,
    pub terminal_edges: usize,
    /// Bytes occupied by reachable nodes.
    pub node_bytes: usize,
    /// Deepest node level (root = 1).
    pub height: usize,
    pub max_key_len: usize,
    pub arena: ArenaStats,
}

impl TreeStats {
    /// Average stored slots per node relative to a full 256-slot array.
    pub fn compression_ratio(&self) -> f64 {
        if self.nodes == 0 {
            0.0
        } else {
            self.slots as f64 / (self.nodes * FANOUT) as f64
        }
    }

    pub fn bytes_per_key(&self) -> f64 {
        if self.keys == 0 {
            0.0
        } else {
            self.arena.bytes_in_use as f64 / self.keys as f64
        }
    }
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "tree: {} keys, {} nodes, height {}, longest key {} bytes",
            self.keys, self.nodes, self.height, self.max_key_len
        )?;
        writeln!(
            f,
            "slots: {} stored, {} used, compression {:.3}, {:.1} bytes/key",
            self.slots,
            self.children,
            self.compression_ratio(),
            self.bytes_per_key()
        )?;
        write!(f, "{}", self.arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let node = NodeStats {
            offset: Offset::from_usize(4),
            min_index: Some(10),
            max_index: Some(41),
            span: 32,
            spare: 32,
            capacity: 64,
            children: 16,
            bytes: 260,
            dead: false,
        };
        assert_eq!(node.compression_ratio(), 0.25);
        assert_eq!(node.occupancy(), 0.25);

        let arena = ArenaStats {
            allocations: 3,
            dead_allocations: 1,
            dead_bytes: 25,
            bytes_in_use: 100,
            capacity: 1000,
            largest_allocation: 40,
        };
        assert_eq!(arena.live_bytes(), 75);
        assert_eq!(arena.fragmentation(), 0.25);
        assert!(arena.to_string().contains("100/1000 bytes used"));

        let empty = TreeStats::default();
        assert_eq!(empty.compression_ratio(), 0.0);
        assert_eq!(empty.bytes_per_key(), 0.0);
    }
}
