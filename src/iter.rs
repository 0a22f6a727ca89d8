//! Pre-order key iteration without recursion.
//!
//! Recursion depth would equal key length, so the traversal keeps its
//! resume points on an explicit stack instead. Each frame remembers a node,
//! the next byte value to look at in it, and the key length at that node.

use smallvec::SmallVec;

use crate::arena::{Arena, Offset, Storage};
use crate::node::Slot;
use crate::tree::Tree;

#[derive(Clone, Copy, Debug)]
struct Frame {
    node: Offset,
    /// Next byte value to examine; 256 once the node is exhausted.
    next: u16,
    /// Length of the key prefix leading to `node`.
    depth: usize,
}

/// Keys of a [`Tree`] in ascending byte order.
///
/// [`Keys::next_key`] reuses one internal buffer and hands out borrowed
/// slices; the [`Iterator`] implementation copies each key into a `Vec`.
/// The tree is borrowed for the lifetime of the iterator, so it cannot be
/// modified underneath it.
pub struct Keys<'a, S = Vec<u8>> {
    arena: &'a Arena<S>,
    stack: SmallVec<[Frame; 16]>,
    key: Vec<u8>,
    /// The buffer already holds a key that has not been reported yet.
    pending: bool,
    started: bool,
    done: bool,
}

impl<'a, S: Storage> Keys<'a, S> {
    pub(crate) fn new(tree: &'a Tree<S>) -> Self {
        let mut keys = Self::empty(tree);
        keys.stack.push(Frame {
            node: tree.root(),
            next: 0,
            depth: 0,
        });
        keys
    }

    fn empty(tree: &'a Tree<S>) -> Self {
        Self {
            arena: tree.arena(),
            stack: SmallVec::new(),
            key: Vec::with_capacity(tree.max_depth()),
            pending: false,
            started: false,
            done: false,
        }
    }

    /// Keys starting with `prefix`. An empty prefix selects every key.
    pub(crate) fn with_prefix(tree: &'a Tree<S>, prefix: &[u8]) -> Self {
        if prefix.is_empty() {
            return Self::new(tree);
        }

        let mut keys = Self::empty(tree);
        let arena = tree.arena();
        let last = prefix.len() - 1;
        let mut node = tree.root();
        for (depth, &byte) in prefix.iter().enumerate() {
            let slot = arena.node(node).try_get(byte);
            match slot {
                Slot::Inner(child) | Slot::InnerTerminal(child) if depth < last => node = child,
                Slot::Empty | Slot::Leaf if depth < last => break,
                Slot::Empty => break,
                Slot::Leaf | Slot::Inner(_) | Slot::InnerTerminal(_) => {
                    keys.key.extend_from_slice(prefix);
                    keys.pending = slot.is_terminal();
                    if let Some(child) = slot.child() {
                        keys.stack.push(Frame {
                            node: child,
                            next: 0,
                            depth: prefix.len(),
                        });
                    }
                }
            }
        }
        keys
    }

    /// Move to the next key. Returns `false` once the sequence has ended.
    pub fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.started = true;
        if std::mem::take(&mut self.pending) {
            return true;
        }

        while let Some(frame) = self.stack.last_mut() {
            let node = self.arena.node(frame.node);
            let Some((byte, slot)) = node.next_populated(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next = u16::from(byte) + 1;
            let depth = frame.depth;

            self.key.truncate(depth);
            self.key.push(byte);
            match slot {
                Slot::Leaf => return true,
                Slot::InnerTerminal(child) => {
                    // Report this key now; descend on the next call.
                    self.stack.push(Frame {
                        node: child,
                        next: 0,
                        depth: depth + 1,
                    });
                    return true;
                }
                Slot::Inner(child) => self.stack.push(Frame {
                    node: child,
                    next: 0,
                    depth: depth + 1,
                }),
                Slot::Empty => unreachable!("next_populated skips empty slots"),
            }
        }

        self.done = true;
        self.key.clear();
        false
    }

    /// The current key. Empty before the first [`advance`](Keys::advance)
    /// and after the end.
    #[inline]
    pub fn key(&self) -> &[u8] {
        if self.started && !self.done {
            &self.key
        } else {
            &[]
        }
    }

    /// Whether the sequence has been exhausted.
    #[inline]
    pub fn is_end(&self) -> bool {
        self.done
    }

    /// Advance and borrow the new key.
    pub fn next_key(&mut self) -> Option<&[u8]> {
        if self.advance() {
            Some(&self.key)
        } else {
            None
        }
    }
}

impl<S: Storage> Iterator for Keys<'_, S> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_key().map(<[u8]>::to_vec)
    }
}

impl<S: Storage> std::iter::FusedIterator for Keys<'_, S> {}
