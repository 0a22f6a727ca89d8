//! # span-trie
//!
//! A compressed byte-indexed prefix tree stored in a flat, offset-addressed
//! arena.
//!
//! Each tree level is a node that logically maps all 256 byte values to
//! child slots but only stores the contiguous span of byte values in use,
//! plus a few spare slots so the span can grow without moving. Nodes refer
//! to each other by 32-bit arena offsets rather than pointers, so the whole
//! tree is one relocatable byte region.
//!
//! ## Example
//!
//! ```rust
//! use span_trie::{Status, Tree, TreeConfig};
//!
//! let mut tree = Tree::with_config(TreeConfig::default().with_capacity(64 * 1024))?;
//! tree.insert(b"hello")?;
//! tree.insert(b"help")?;
//! assert_eq!(tree.insert(b"hello")?, Status::Exists);
//!
//! assert!(tree.contains(b"help"));
//! assert_eq!(tree.find(b"hel"), Status::NotFound);
//!
//! let keys: Vec<Vec<u8>> = tree.keys_with_prefix(b"hel").collect();
//! assert_eq!(keys, vec![b"hello".to_vec(), b"help".to_vec()]);
//! # Ok::<(), span_trie::Error>(())
//! ```
//!
//! ## Memory model
//!
//! The arena only grows. When a node outgrows its spare slots it is copied
//! into a larger allocation, its single parent edge is rewritten, and the
//! old copy is recorded as dead. Dead memory is never reclaimed; see
//! [`ArenaStats::dead_bytes`].

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod arena;
pub mod config;
pub mod error;
pub mod iter;
pub mod node;
pub mod stats;
pub mod tree;

pub use arena::{Arena, DeadRegion, Offset, Storage};
pub use config::{GrowthPolicy, TreeConfig};
pub use error::{Error, Result};
pub use iter::Keys;
pub use node::{GrowthCheck, Node, NodeMut, SetOutcome, Slot};
pub use stats::{ArenaStats, NodeStats, TreeStats};
pub use tree::{Status, Tree};

#[cfg(test)]
mod proptests;
