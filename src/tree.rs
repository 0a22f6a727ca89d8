//! The span trie: key insertion and lookup over arena-resident nodes.
//!
//! Every key byte selects a slot in the current node. Slots either point at
//! the next node, end a key directly ([`Slot::Leaf`]), or both
//! ([`Slot::InnerTerminal`]). Runs of single-child nodes are not merged: a
//! new key suffix becomes a chain of singleton nodes ending in a leaf edge.
//!
//! Each node has exactly one parent edge (or is the root), so replacing a
//! node that outgrew its spare capacity only ever rewrites one slot.

use memmap2::MmapMut;
use smallvec::SmallVec;

use crate::arena::{Arena, Offset, Storage};
use crate::config::TreeConfig;
use crate::error::Result;
use crate::iter::Keys;
use crate::node::{SetOutcome, Slot};
use crate::stats::{NodeStats, TreeStats};

/// Stable outcome codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// The key was inserted.
    Ok = 0,
    /// The key was already present; nothing changed.
    Exists = 1,
    /// Lookup miss.
    NotFound = 2,
    /// The arena could not satisfy an allocation.
    MemoryError = 3,
}

impl Status {
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Exists),
            2 => Some(Status::NotFound),
            3 => Some(Status::MemoryError),
            _ => None,
        }
    }
}

impl From<Result<Status>> for Status {
    fn from(result: Result<Status>) -> Self {
        match result {
            Ok(status) => status,
            Err(err) => err.status(),
        }
    }
}

/// Where a descent for `key` stopped.
#[derive(Debug, Clone, Copy)]
enum Position {
    /// The key is stored.
    Found,
    /// Every byte matched, but the last edge is a routing edge only.
    Routed { node: Offset, byte: u8, child: Offset },
    /// A leaf edge ended the path at `key[depth]` with bytes left over.
    LeafEnd { node: Offset, depth: usize },
    /// No edge for `key[depth]` in `node`. `parent` holds the edge into
    /// `node`, `None` for the root.
    Missing {
        parent: Option<(Offset, u8)>,
        node: Offset,
        depth: usize,
    },
}

/// Nodes allocated by an insert but not yet reachable.
type Pending = SmallVec<[Offset; 8]>;

/// A compressed byte-indexed prefix tree living in an [`Arena`].
///
/// ```
/// use span_trie::{Status, Tree};
///
/// let mut tree = Tree::new();
/// assert_eq!(tree.insert(b"A").unwrap(), Status::Ok);
/// assert_eq!(tree.insert(b"AB").unwrap(), Status::Ok);
/// assert_eq!(tree.insert(b"A").unwrap(), Status::Exists);
///
/// assert_eq!(tree.find(b"AB"), Status::Exists);
/// assert_eq!(tree.find(b"AC"), Status::NotFound);
///
/// let keys: Vec<Vec<u8>> = tree.keys().collect();
/// assert_eq!(keys, vec![b"A".to_vec(), b"AB".to_vec()]);
/// ```
pub struct Tree<S = Vec<u8>> {
    arena: Arena<S>,
    root: Offset,
    max_depth: usize,
    len: usize,
    config: TreeConfig,
}

impl Tree<Vec<u8>> {
    /// Create a tree over an owned 1 MiB arena with 4-byte alignment.
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default()).expect("default configuration is valid")
    }

    /// Create a tree over an owned arena of `config.capacity` bytes.
    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        Self::from_arena(Arena::new(config.capacity, config.alignment), config)
    }
}

impl Default for Tree<Vec<u8>> {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree<MmapMut> {
    /// Create a tree over an anonymous mapping of `config.capacity` bytes.
    pub fn map_anon(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let arena = Arena::map_anon(config.capacity, config.alignment)?;
        Self::from_arena(arena, config)
    }
}

impl<S: Storage> Tree<S> {
    /// Create a tree over caller-supplied memory, such as a borrowed slice or
    /// a file mapping. The buffer length overrides `config.capacity`; its
    /// previous contents are ignored.
    pub fn with_storage(storage: S, config: TreeConfig) -> Result<Self> {
        config.validate_for(storage.len())?;
        let config = config.with_capacity(storage.len());
        Self::from_arena(Arena::with_storage(storage, config.alignment), config)
    }

    fn from_arena(mut arena: Arena<S>, config: TreeConfig) -> Result<Self> {
        let root = arena.alloc_empty_node(config.root_spare)?;
        Ok(Self {
            arena,
            root,
            max_depth: 0,
            len: 0,
            config,
        })
    }

    /// Number of stored keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length of the longest key stored so far.
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    pub fn root(&self) -> Offset {
        self.root
    }

    #[inline]
    pub fn arena(&self) -> &Arena<S> {
        &self.arena
    }

    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn locate(&self, key: &[u8]) -> Position {
        assert!(!key.is_empty(), "keys must be at least one byte long");
        let mut parent = None;
        let mut node = self.root;
        let last = key.len() - 1;

        for (depth, &byte) in key.iter().enumerate() {
            match self.arena.node(node).try_get(byte) {
                Slot::Empty => return Position::Missing { parent, node, depth },
                Slot::Leaf if depth == last => return Position::Found,
                Slot::Leaf => return Position::LeafEnd { node, depth },
                Slot::InnerTerminal(_) if depth == last => return Position::Found,
                Slot::Inner(child) if depth == last => {
                    return Position::Routed { node, byte, child }
                }
                Slot::Inner(child) | Slot::InnerTerminal(child) => {
                    parent = Some((node, byte));
                    node = child;
                }
            }
        }
        unreachable!("the last key byte always ends the descent")
    }

    /// Look up `key`: [`Status::Exists`] or [`Status::NotFound`].
    ///
    /// # Panics
    /// Panics if `key` is empty.
    pub fn find(&self, key: &[u8]) -> Status {
        match self.locate(key) {
            Position::Found => Status::Exists,
            _ => Status::NotFound,
        }
    }

    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.find(key) == Status::Exists
    }

    /// Insert `key`.
    ///
    /// Returns [`Status::Ok`] when the key was added and [`Status::Exists`]
    /// when it was already present. On
    /// [`Error::OutOfMemory`](crate::Error::OutOfMemory) the stored key set
    /// and every reachable node are unchanged; nodes allocated before the
    /// failure are retired as dead.
    ///
    /// # Panics
    /// Panics if `key` is empty.
    pub fn insert(&mut self, key: &[u8]) -> Result<Status> {
        match self.locate(key) {
            Position::Found => return Ok(Status::Exists),
            Position::Routed { node, byte, child } => {
                self.arena
                    .node_mut(node)
                    .set(byte, Slot::InnerTerminal(child));
            }
            Position::LeafEnd { node, depth } => {
                let mut pending = Pending::new();
                let child = match self.build_chain(&key[depth + 1..], &mut pending)? {
                    Slot::Inner(child) => child,
                    _ => unreachable!("a non-empty tail always builds a node"),
                };
                tracing::trace!(node = node.get(), child = child.get(), "promoting leaf edge");
                self.arena
                    .node_mut(node)
                    .set(key[depth], Slot::InnerTerminal(child));
            }
            Position::Missing {
                parent,
                node,
                depth,
            } => {
                let mut pending = Pending::new();
                let head = self.build_chain(&key[depth + 1..], &mut pending)?;
                if let Err(err) = self.attach(parent, node, key[depth], head, &mut pending) {
                    self.discard(&pending);
                    return Err(err);
                }
            }
        }
        self.len += 1;
        self.max_depth = self.max_depth.max(key.len());
        Ok(Status::Ok)
    }

    /// Build the nodes for `tail` bottom-up and return the edge that should
    /// point at them: [`Slot::Leaf`] for an empty tail, otherwise the head
    /// of a chain of singleton nodes whose last edge is a leaf.
    ///
    /// Nothing is linked into the tree. On failure the partial chain is
    /// retired and the error returned.
    fn build_chain(&mut self, tail: &[u8], pending: &mut Pending) -> Result<Slot> {
        let spare = self.config.growth.initial_spare();
        let mut edge = Slot::Leaf;
        for &byte in tail.iter().rev() {
            match self.arena.alloc_singleton(byte, edge, spare) {
                Ok(off) => {
                    pending.push(off);
                    edge = Slot::Inner(off);
                }
                Err(err) => {
                    self.discard(pending);
                    return Err(err);
                }
            }
        }
        Ok(edge)
    }

    /// Store `edge` for `byte` in `node`, reallocating `node` if its spare
    /// capacity is exhausted.
    fn attach(
        &mut self,
        parent: Option<(Offset, u8)>,
        node: Offset,
        byte: u8,
        edge: Slot,
        pending: &mut Pending,
    ) -> Result<()> {
        let check = match self.arena.node_mut(node).set_or_grow(byte, edge) {
            SetOutcome::NeedsRealloc(check) => check,
            _ => return Ok(()),
        };

        let old = self.arena.node(node);
        let old_size = old.size();
        let old_span = (old.min_index(), old.max_index());
        let spare = self.config.growth.spare_for(check.new_span());
        let grown = self
            .arena
            .alloc_grown(node, check.new_min, check.new_max, spare)?;
        pending.push(grown);
        self.arena.node_mut(grown).set(byte, edge);

        match parent {
            None => self.root = grown,
            Some((parent, parent_byte)) => {
                let mut parent = self.arena.node_mut(parent);
                let slot = parent.as_node().try_get(parent_byte);
                debug_assert_eq!(slot.child(), Some(node), "parent edge must point at the node");
                parent.set(parent_byte, slot.with_child(grown));
            }
        }

        self.arena.node_mut(node).mark_dead();
        self.arena.retire(node, old_size);
        tracing::trace!(
            old = node.get(),
            new = grown.get(),
            ?old_span,
            new_span = ?(check.new_min, check.new_max),
            spare,
            "node reallocated"
        );
        Ok(())
    }

    /// Retire nodes from a failed insert. They were never reachable.
    fn discard(&mut self, pending: &Pending) {
        if pending.is_empty() {
            return;
        }
        tracing::trace!(nodes = pending.len(), "discarding nodes of failed insert");
        for &off in pending.iter() {
            let size = self.arena.node(off).size();
            self.arena.node_mut(off).mark_dead();
            self.arena.retire(off, size);
        }
    }

    /// All stored keys in ascending byte order.
    pub fn keys(&self) -> Keys<'_, S> {
        Keys::new(self)
    }

    /// Alias for [`Tree::keys`].
    pub fn iter(&self) -> Keys<'_, S> {
        self.keys()
    }

    /// Stored keys starting with `prefix`, in ascending byte order.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Keys<'_, S> {
        Keys::with_prefix(self, prefix)
    }

    /// Shape of the node at `offset`.
    pub fn node_stats(&self, offset: Offset) -> NodeStats {
        self.arena.node(offset).stats()
    }

    /// Walk every reachable node and summarize the tree.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            keys: self.len,
            max_key_len: self.max_depth,
            arena: self.arena.stats(),
            ..TreeStats::default()
        };
        let mut stack: Vec<(Offset, usize)> = vec![(self.root, 1)];
        while let Some((off, level)) = stack.pop() {
            let node = self.arena.node(off);
            stats.nodes += 1;
            stats.slots += node.capacity();
            stats.node_bytes += node.size();
            stats.height = stats.height.max(level);
            for (_, slot) in node.slots() {
                stats.children += 1;
                match slot {
                    Slot::Leaf => stats.leaf_edges += 1,
                    Slot::InnerTerminal(child) => {
                        stats.terminal_edges += 1;
                        stack.push((child, level + 1));
                    }
                    Slot::Inner(child) => stack.push((child, level + 1)),
                    Slot::Empty => {}
                }
            }
        }
        stats
    }

    /// Copy the tree into `storage`. Offsets are arena-relative, so the
    /// copy is usable as is.
    pub fn relocate<T: Storage>(&self, storage: T) -> Result<Tree<T>> {
        let arena = self.arena.relocate(storage)?;
        let config = self.config.with_capacity(arena.capacity());
        Ok(Tree {
            arena,
            root: self.root,
            max_depth: self.max_depth,
            len: self.len,
            config,
        })
    }

    pub fn into_arena(self) -> Arena<S> {
        self.arena
    }
}

impl<'a, S: Storage> IntoIterator for &'a Tree<S> {
    type Item = Vec<u8>;
    type IntoIter = Keys<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys()
    }
}

impl<S: Storage> std::fmt::Debug for Tree<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("len", &self.len)
            .field("root", &self.root)
            .field("max_depth", &self.max_depth)
            .field("arena", &self.arena)
            .finish()
    }
}
