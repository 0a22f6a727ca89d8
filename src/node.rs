//! Span-compressed child arrays.
//!
//! A node logically maps every byte value `0..=255` to a child slot, but
//! physically stores only the contiguous span `[min, max]` of byte values in
//! use, followed by `spare` unused slots that let the span grow in place.
//!
//! Layout inside the arena (all integers little endian):
//!
//! ```text
//! +0  min index      u8
//! +1  max index      u8
//! +2  spare slots    u8
//! +3  flags          u8   bit 0 = dead, bit 1 = empty span
//! +4  slots          u32 x (span + spare)
//! ```
//!
//! Slot `i` belongs to byte value `min + i`. A node with the empty flag has
//! no span at all and `spare` slots of storage; only the root starts that way.

use crate::arena::{Arena, Offset, Storage};
use crate::error::Result;
use crate::stats::NodeStats;

pub(crate) const HEADER_SIZE: usize = 4;
pub(crate) const SLOT_SIZE: usize = 4;

const MIN_INDEX: usize = 0;
const MAX_INDEX: usize = 1;
const SPARE: usize = 2;
const FLAGS: usize = 3;

const FLAG_DEAD: u8 = 1 << 0;
const FLAG_EMPTY: u8 = 1 << 1;

/// Number of distinct byte values.
pub const FANOUT: usize = 256;

/// Bytes occupied by a node holding `capacity` slots.
#[inline]
pub const fn node_size(capacity: usize) -> usize {
    HEADER_SIZE + SLOT_SIZE * capacity
}

// =============================================================================
// Slot encoding
// =============================================================================

const EMPTY_RAW: u32 = 0;
const LEAF_RAW: u32 = 2;
const TERMINAL_BIT: u32 = 1;
const TAG_MASK: u32 = 0b11;

/// Decoded child slot.
///
/// Inside node storage a slot is a `u32`: `0` is empty, `2` is the leaf
/// sentinel, and any other value is an aligned node offset whose low bit
/// marks the edge as terminal. Arena offsets are aligned to at least 4 and
/// never below the reserved prefix, so the encodings cannot collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// No child for this byte.
    Empty,
    /// The edge ends a stored key and has no node below it.
    Leaf,
    /// The edge leads to a node; the path so far is not a stored key.
    Inner(Offset),
    /// The edge leads to a node and the path so far is also a stored key.
    InnerTerminal(Offset),
}

impl Slot {
    #[inline]
    pub(crate) fn decode(raw: u32) -> Self {
        match raw {
            EMPTY_RAW => Slot::Empty,
            LEAF_RAW => Slot::Leaf,
            _ => {
                debug_assert_ne!(raw & TAG_MASK, TAG_MASK, "corrupt slot {raw:#x}");
                let offset = Offset::from_raw(raw & !TAG_MASK);
                if raw & TERMINAL_BIT != 0 {
                    Slot::InnerTerminal(offset)
                } else {
                    Slot::Inner(offset)
                }
            }
        }
    }

    #[inline]
    pub(crate) fn encode(self) -> u32 {
        match self {
            Slot::Empty => EMPTY_RAW,
            Slot::Leaf => LEAF_RAW,
            Slot::Inner(off) => {
                debug_assert_eq!(off.get() & TAG_MASK, 0);
                off.get()
            }
            Slot::InnerTerminal(off) => {
                debug_assert_eq!(off.get() & TAG_MASK, 0);
                off.get() | TERMINAL_BIT
            }
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, Slot::Empty)
    }

    /// Whether a stored key ends on this edge.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Slot::Leaf | Slot::InnerTerminal(_))
    }

    #[inline]
    pub fn child(self) -> Option<Offset> {
        match self {
            Slot::Inner(off) | Slot::InnerTerminal(off) => Some(off),
            Slot::Empty | Slot::Leaf => None,
        }
    }

    /// Point this edge at `child`, keeping its terminal tag.
    #[inline]
    pub(crate) fn with_child(self, child: Offset) -> Self {
        match self {
            Slot::InnerTerminal(_) => Slot::InnerTerminal(child),
            _ => Slot::Inner(child),
        }
    }
}

// =============================================================================
// Growth planning
// =============================================================================

/// Result of [`Node::can_grow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowthCheck {
    /// `delta <= spare`: the byte can be stored without reallocating.
    pub fits: bool,
    pub new_min: u8,
    pub new_max: u8,
    /// Slots the span grows by (0 when the byte is already inside it).
    pub delta: usize,
}

impl GrowthCheck {
    #[inline]
    pub fn new_span(&self) -> usize {
        usize::from(self.new_max - self.new_min) + 1
    }
}

/// Result of [`NodeMut::set_or_grow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// The byte was inside the span; a plain slot write.
    InPlace,
    /// Existing slots were shifted right and `min` lowered.
    ExtendedLeft { delta: usize },
    /// Trailing spare slots were exposed and `max` raised.
    ExtendedRight { delta: usize },
    /// Not enough spare capacity. Nothing was written; the caller has to
    /// copy the node into a larger allocation and rewrite its parent edge.
    NeedsRealloc(GrowthCheck),
}

#[derive(Clone, Copy, Debug)]
struct Header {
    min: u8,
    max: u8,
    spare: u8,
    flags: u8,
}

impl Header {
    #[inline]
    fn read(buf: &[u8], off: usize) -> Self {
        Self {
            min: buf[off + MIN_INDEX],
            max: buf[off + MAX_INDEX],
            spare: buf[off + SPARE],
            flags: buf[off + FLAGS],
        }
    }

    #[inline]
    fn write(self, buf: &mut [u8], off: usize) {
        buf[off + MIN_INDEX] = self.min;
        buf[off + MAX_INDEX] = self.max;
        buf[off + SPARE] = self.spare;
        buf[off + FLAGS] = self.flags;
    }

    #[inline]
    fn is_empty(self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    #[inline]
    fn span(self) -> usize {
        if self.is_empty() {
            0
        } else {
            usize::from(self.max - self.min) + 1
        }
    }

    #[inline]
    fn capacity(self) -> usize {
        self.span() + usize::from(self.spare)
    }

    fn can_grow(self, byte: u8) -> GrowthCheck {
        let (new_min, new_max) = if self.is_empty() {
            (byte, byte)
        } else {
            (self.min.min(byte), self.max.max(byte))
        };
        let new_span = usize::from(new_max - new_min) + 1;
        let delta = new_span - self.span();
        GrowthCheck {
            fits: delta <= usize::from(self.spare),
            new_min,
            new_max,
            delta,
        }
    }
}

#[inline]
fn slot_at(node: usize, index: usize) -> usize {
    node + HEADER_SIZE + index * SLOT_SIZE
}

#[inline]
fn read_raw(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn write_raw(buf: &mut [u8], at: usize, raw: u32) {
    buf[at..at + SLOT_SIZE].copy_from_slice(&raw.to_le_bytes());
}

// =============================================================================
// Views
// =============================================================================

/// Read-only view of a node.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    buf: &'a [u8],
    off: usize,
    header: Header,
}

impl<'a> Node<'a> {
    #[inline]
    fn new(buf: &'a [u8], off: Offset) -> Self {
        let off = off.as_usize();
        Self {
            buf,
            off,
            header: Header::read(buf, off),
        }
    }

    #[inline]
    pub fn offset(&self) -> Offset {
        Offset::from_usize(self.off)
    }

    /// Smallest byte value with storage, `None` for an empty node.
    #[inline]
    pub fn min_index(&self) -> Option<u8> {
        (!self.header.is_empty()).then_some(self.header.min)
    }

    #[inline]
    pub fn max_index(&self) -> Option<u8> {
        (!self.header.is_empty()).then_some(self.header.max)
    }

    #[inline]
    pub fn spare(&self) -> usize {
        usize::from(self.header.spare)
    }

    #[inline]
    pub fn span(&self) -> usize {
        self.header.span()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.header.capacity()
    }

    #[inline]
    pub fn size(&self) -> usize {
        node_size(self.capacity())
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.header.flags & FLAG_DEAD != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }

    #[inline]
    pub fn contains_index(&self, byte: u8) -> bool {
        !self.header.is_empty() && self.header.min <= byte && byte <= self.header.max
    }

    /// Child slot for `byte`; [`Slot::Empty`] outside the span.
    #[inline]
    pub fn try_get(&self, byte: u8) -> Slot {
        debug_assert!(!self.is_dead(), "read through dead node at {}", self.off);
        if !self.contains_index(byte) {
            return Slot::Empty;
        }
        let index = usize::from(byte - self.header.min);
        Slot::decode(read_raw(self.buf, slot_at(self.off, index)))
    }

    /// Whether `byte` fits without reallocation, and the span it would need.
    #[inline]
    pub fn can_grow(&self, byte: u8) -> GrowthCheck {
        self.header.can_grow(byte)
    }

    /// Populated slots in ascending byte order.
    pub fn slots(&self) -> impl Iterator<Item = (u8, Slot)> + 'a {
        let node = *self;
        let min = usize::from(self.header.min);
        (0..self.span()).filter_map(move |i| {
            let slot = Slot::decode(read_raw(node.buf, slot_at(node.off, i)));
            (!slot.is_empty()).then(|| ((min + i) as u8, slot))
        })
    }

    /// First populated slot at byte value `>= from`.
    ///
    /// `from` is a `u16` so that 256 can express "past the end".
    pub(crate) fn next_populated(&self, from: u16) -> Option<(u8, Slot)> {
        if self.header.is_empty() {
            return None;
        }
        let min = u16::from(self.header.min);
        let max = u16::from(self.header.max);
        let mut byte = from.max(min);
        while byte <= max {
            let raw = read_raw(self.buf, slot_at(self.off, usize::from(byte - min)));
            if raw != EMPTY_RAW {
                return Some((byte as u8, Slot::decode(raw)));
            }
            byte += 1;
        }
        None
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            offset: self.offset(),
            min_index: self.min_index(),
            max_index: self.max_index(),
            span: self.span(),
            spare: self.spare(),
            capacity: self.capacity(),
            children: self.slots().count(),
            bytes: self.size(),
            dead: self.is_dead(),
        }
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("offset", &self.off)
            .field("min", &self.min_index())
            .field("max", &self.max_index())
            .field("spare", &self.header.spare)
            .field("dead", &self.is_dead())
            .finish()
    }
}

/// Mutable view of a node.
pub struct NodeMut<'a> {
    buf: &'a mut [u8],
    off: usize,
    header: Header,
}

impl<'a> NodeMut<'a> {
    #[inline]
    fn new(buf: &'a mut [u8], off: Offset) -> Self {
        let off = off.as_usize();
        let header = Header::read(buf, off);
        Self { buf, off, header }
    }

    #[inline]
    pub fn as_node(&self) -> Node<'_> {
        Node {
            buf: &*self.buf,
            off: self.off,
            header: self.header,
        }
    }

    #[inline]
    fn write_slot(&mut self, index: usize, slot: Slot) {
        debug_assert!(index < self.header.capacity());
        write_raw(self.buf, slot_at(self.off, index), slot.encode());
    }

    #[inline]
    fn zero_slots(&mut self, from: usize, to: usize) {
        self.buf[slot_at(self.off, from)..slot_at(self.off, to)].fill(0);
    }

    /// Overwrite the slot of a byte already inside the span.
    ///
    /// # Panics
    /// Panics if `byte` is outside the span.
    pub fn set(&mut self, byte: u8, slot: Slot) {
        assert!(
            self.as_node().contains_index(byte),
            "byte {byte} outside span of node at {}",
            self.off
        );
        let index = usize::from(byte - self.header.min);
        self.write_slot(index, slot);
    }

    /// Store `slot` for `byte`, growing the span into spare capacity when
    /// needed. Returns [`SetOutcome::NeedsRealloc`] without writing anything
    /// when the spare capacity is too small.
    pub fn set_or_grow(&mut self, byte: u8, slot: Slot) -> SetOutcome {
        debug_assert!(!self.as_node().is_dead());
        let check = self.header.can_grow(byte);
        if check.delta == 0 {
            self.set(byte, slot);
            return SetOutcome::InPlace;
        }
        if !check.fits {
            return SetOutcome::NeedsRealloc(check);
        }

        let delta = check.delta;
        let span = self.header.span();
        if self.header.is_empty() {
            self.header = Header {
                min: byte,
                max: byte,
                spare: self.header.spare - 1,
                flags: self.header.flags & !FLAG_EMPTY,
            };
            self.header.write(self.buf, self.off);
            self.write_slot(0, slot);
            return SetOutcome::ExtendedRight { delta };
        }

        if byte < self.header.min {
            let from = slot_at(self.off, 0);
            let to = slot_at(self.off, span);
            self.buf.copy_within(from..to, slot_at(self.off, delta));
            self.zero_slots(1, delta);
            self.header.min = byte;
            self.header.spare -= delta as u8;
            self.header.write(self.buf, self.off);
            self.write_slot(0, slot);
            SetOutcome::ExtendedLeft { delta }
        } else {
            self.zero_slots(span, span + delta - 1);
            self.header.max = byte;
            self.header.spare -= delta as u8;
            self.header.write(self.buf, self.off);
            self.write_slot(span + delta - 1, slot);
            SetOutcome::ExtendedRight { delta }
        }
    }

    /// Flag the node as superseded. Its storage is never read again except
    /// for diagnostics.
    pub fn mark_dead(&mut self) {
        self.header.flags |= FLAG_DEAD;
        self.header.write(self.buf, self.off);
    }
}

// =============================================================================
// Arena integration
// =============================================================================

impl<S: Storage> Arena<S> {
    #[inline]
    pub fn node(&self, off: Offset) -> Node<'_> {
        Node::new(self.bytes(), off)
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, off: Offset) -> NodeMut<'_> {
        NodeMut::new(self.bytes_mut(), off)
    }

    /// Allocate a zero-filled node spanning `[min, max]` with `spare` extra
    /// slots.
    pub(crate) fn alloc_node(&mut self, min: u8, max: u8, spare: u8) -> Result<Offset> {
        debug_assert!(min <= max);
        let span = usize::from(max - min) + 1;
        debug_assert!(span + usize::from(spare) <= FANOUT);
        let header = Header {
            min,
            max,
            spare,
            flags: 0,
        };
        self.alloc_with_header(header)
    }

    /// Allocate a node with no span and `slots` spare slots.
    pub(crate) fn alloc_empty_node(&mut self, slots: u8) -> Result<Offset> {
        let header = Header {
            min: 0,
            max: 0,
            spare: slots,
            flags: FLAG_EMPTY,
        };
        self.alloc_with_header(header)
    }

    fn alloc_with_header(&mut self, header: Header) -> Result<Offset> {
        let size = node_size(header.capacity());
        let off = self.allocate(size)?;
        let start = off.as_usize();
        let buf = self.bytes_mut();
        buf[start..start + size].fill(0);
        header.write(buf, start);
        Ok(off)
    }

    /// Allocate a node whose only populated slot is `byte -> slot`.
    pub(crate) fn alloc_singleton(&mut self, byte: u8, slot: Slot, spare: u8) -> Result<Offset> {
        let off = self.alloc_node(byte, byte, spare)?;
        self.node_mut(off).set(byte, slot);
        Ok(off)
    }

    /// Copy `old` into a fresh node spanning `[new_min, new_max]`.
    ///
    /// The new span must contain the old one. The old node is left untouched;
    /// retiring it is up to the caller, which owns the parent edge.
    pub(crate) fn alloc_grown(
        &mut self,
        old: Offset,
        new_min: u8,
        new_max: u8,
        spare: u8,
    ) -> Result<Offset> {
        let old_node = self.node(old);
        let old_span = old_node.span();
        let old_min = old_node.header.min;
        debug_assert!(old_node.is_empty() || (new_min <= old_min && old_node.header.max <= new_max));

        let new = self.alloc_node(new_min, new_max, spare)?;
        if old_span > 0 {
            let from = slot_at(old.as_usize(), 0);
            let to = slot_at(old.as_usize(), old_span);
            let dest = slot_at(new.as_usize(), usize::from(old_min - new_min));
            self.bytes_mut().copy_within(from..to, dest);
        }
        Ok(new)
    }
}
