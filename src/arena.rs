//! Bounded bump arena addressed by 32-bit byte offsets.
//!
//! The arena hands out aligned, monotonically increasing offsets into a
//! single contiguous buffer. Nothing is ever moved or freed: superseded
//! allocations are recorded as dead regions for statistics only. Because
//! every reference into the buffer is an offset relative to its base, the
//! whole arena (and everything stored in it) can be copied elsewhere as a
//! unit, see [`Arena::relocate`].
//!
//! The buffer can be owned (`Vec<u8>`), borrowed (`&mut [u8]`) or a mapped
//! region (`memmap2::MmapMut`); anything that dereferences to a mutable
//! byte slice works as [`Storage`].

use std::ops::DerefMut;

use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::stats::ArenaStats;

/// Smallest supported alignment. Offsets aligned to at least 4 bytes keep
/// their two low bits free for slot tags.
pub const MIN_ALIGNMENT: usize = 4;

/// Largest supported capacity: every offset has to fit in a `u32`.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

/// Backing memory for an [`Arena`].
pub trait Storage: DerefMut<Target = [u8]> {}

impl<T: DerefMut<Target = [u8]>> Storage for T {}

/// A byte offset relative to the arena base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Offset(u32);

impl Offset {
    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Create an offset from a usize.
    ///
    /// # Panics
    /// Panics if the offset does not fit in 32 bits.
    #[inline]
    pub fn from_usize(offset: usize) -> Self {
        assert!(offset <= MAX_CAPACITY, "arena offset too large");
        Self(offset as u32)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A retired allocation. Kept for diagnostics, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadRegion {
    pub offset: Offset,
    pub size: usize,
}

#[inline]
fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A fixed-capacity bump arena over `S`.
pub struct Arena<S = Vec<u8>> {
    storage: S,
    cursor: usize,
    alignment: usize,
    allocations: usize,
    peak_request: usize,
    dead: Vec<DeadRegion>,
    dead_bytes: usize,
}

impl Arena<Vec<u8>> {
    /// Create an owned, zero-filled arena of `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `alignment` is not a power of two `>= 4`, or if `capacity`
    /// cannot hold the reserved prefix or exceeds [`MAX_CAPACITY`].
    pub fn new(capacity: usize, alignment: usize) -> Self {
        Self::with_storage(vec![0u8; capacity], alignment)
    }
}

impl Arena<MmapMut> {
    /// Create an arena over an anonymous memory mapping of `capacity` bytes.
    pub fn map_anon(capacity: usize, alignment: usize) -> Result<Self> {
        validate_layout(capacity, alignment)?;
        let map = MmapMut::map_anon(capacity)?;
        Ok(Self::with_storage(map, alignment))
    }
}

/// Check `capacity` and `alignment` without panicking.
pub(crate) fn validate_layout(capacity: usize, alignment: usize) -> Result<()> {
    if !alignment.is_power_of_two() || alignment < MIN_ALIGNMENT {
        return Err(Error::InvalidAlignment(alignment));
    }
    if capacity < alignment || capacity > MAX_CAPACITY {
        return Err(Error::InvalidCapacity {
            capacity,
            min: alignment,
            max: MAX_CAPACITY,
        });
    }
    Ok(())
}

impl<S: Storage> Arena<S> {
    /// Wrap caller-supplied memory. The buffer length is the capacity and
    /// its existing contents are ignored; every allocation is zeroed by its
    /// user before it becomes reachable.
    ///
    /// The first `alignment` bytes are reserved so that small offsets can
    /// double as sentinels.
    ///
    /// # Panics
    /// Panics on an invalid alignment or capacity.
    pub fn with_storage(storage: S, alignment: usize) -> Self {
        let capacity = storage.len();
        assert!(
            alignment.is_power_of_two() && alignment >= MIN_ALIGNMENT,
            "arena alignment must be a power of two >= {MIN_ALIGNMENT}, got {alignment}"
        );
        assert!(
            capacity >= alignment && capacity <= MAX_CAPACITY,
            "arena capacity {capacity} out of range"
        );
        tracing::debug!(capacity, alignment, "arena created");
        Self {
            storage,
            cursor: alignment,
            alignment,
            allocations: 0,
            peak_request: 0,
            dead: Vec::new(),
            dead_bytes: 0,
        }
    }

    /// Reserve `size` bytes at the next aligned position.
    ///
    /// Fails without side effects when the remaining capacity is too small.
    pub fn allocate(&mut self, size: usize) -> Result<Offset> {
        let capacity = self.capacity();
        let start = align_up(self.cursor, self.alignment);
        let end = match start.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => {
                let available = capacity.saturating_sub(start);
                tracing::debug!(requested = size, available, "arena exhausted");
                return Err(Error::OutOfMemory {
                    requested: size,
                    available,
                });
            }
        };
        self.cursor = end;
        self.allocations += 1;
        self.peak_request = self.peak_request.max(size);
        Ok(Offset::from_usize(start))
    }

    /// Record `[offset, offset + size)` as dead. The space is not reclaimed.
    pub fn retire(&mut self, offset: Offset, size: usize) {
        debug_assert!(offset.as_usize() + size <= self.cursor);
        self.dead.push(DeadRegion { offset, size });
        self.dead_bytes += size;
    }

    /// Base address of the buffer. Offsets are relative to this address.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }

    /// The allocated prefix of the buffer, reserved bytes included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.storage[..self.cursor]
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage[..self.cursor]
    }

    #[inline]
    pub fn read_u32(&self, at: usize) -> u32 {
        let b = &self.storage[at..at + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    #[cfg(test)]
    pub(crate) fn write_u32(&mut self, at: usize, value: u32) {
        self.storage[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes consumed so far, padding and reserved prefix included.
    #[inline]
    pub fn used(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Smallest offset that can ever be issued.
    #[inline]
    pub fn reserved(&self) -> usize {
        self.alignment
    }

    pub fn dead_regions(&self) -> &[DeadRegion] {
        &self.dead
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            allocations: self.allocations,
            dead_allocations: self.dead.len(),
            dead_bytes: self.dead_bytes,
            bytes_in_use: self.cursor,
            capacity: self.capacity(),
            largest_allocation: self.peak_request,
        }
    }

    /// Copy the allocated prefix into `target` and continue there.
    ///
    /// All offsets issued by `self` stay valid in the returned arena.
    pub fn relocate<T: Storage>(&self, mut target: T) -> Result<Arena<T>> {
        if target.len() < self.cursor || target.len() > MAX_CAPACITY {
            return Err(Error::InvalidCapacity {
                capacity: target.len(),
                min: self.cursor,
                max: MAX_CAPACITY,
            });
        }
        target[..self.cursor].copy_from_slice(&self.storage[..self.cursor]);
        Ok(Arena {
            storage: target,
            cursor: self.cursor,
            alignment: self.alignment,
            allocations: self.allocations,
            peak_request: self.peak_request,
            dead: self.dead.clone(),
            dead_bytes: self.dead_bytes,
        })
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

impl<S: Storage> std::fmt::Debug for Arena<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("used", &self.cursor)
            .field("alignment", &self.alignment)
            .field("allocations", &self.allocations)
            .field("dead_bytes", &self.dead_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_aligned() {
        let mut arena = Arena::new(1024, 8);
        let a = arena.allocate(3).unwrap();
        let b = arena.allocate(5).unwrap();
        let c = arena.allocate(1).unwrap();

        assert_eq!(a.as_usize(), 8, "first offset follows the reserved prefix");
        assert_eq!(b.as_usize(), 16);
        assert_eq!(c.as_usize(), 24);
        for off in [a, b, c] {
            assert_eq!(off.as_usize() % 8, 0);
            assert!(off.as_usize() >= arena.reserved());
        }
        assert_eq!(arena.used(), 25);
        assert_eq!(arena.stats().allocations, 3);
    }

    #[test]
    fn test_out_of_memory_has_no_side_effects() {
        let mut arena = Arena::new(32, 4);
        arena.allocate(20).unwrap();
        let used = arena.used();

        let err = arena.allocate(9).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfMemory {
                requested: 9,
                available: 8
            }
        ));
        assert_eq!(arena.used(), used);
        assert_eq!(arena.stats().allocations, 1);

        // Exactly the remaining space still fits.
        arena.allocate(8).unwrap();
        assert_eq!(arena.remaining(), 0);
        assert!(arena.allocate(1).is_err());
    }

    #[test]
    fn test_retire_is_bookkeeping_only() {
        let mut arena = Arena::new(256, 4);
        let a = arena.allocate(16).unwrap();
        let used = arena.used();

        arena.retire(a, 16);
        assert_eq!(arena.used(), used, "retired memory is never reclaimed");
        assert_eq!(arena.dead_regions(), &[DeadRegion { offset: a, size: 16 }]);

        let stats = arena.stats();
        assert_eq!(stats.dead_allocations, 1);
        assert_eq!(stats.dead_bytes, 16);

        let b = arena.allocate(16).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_borrowed_storage() {
        let mut buf = [0xAAu8; 64];
        let mut arena = Arena::with_storage(&mut buf[..], 4);
        let off = arena.allocate(4).unwrap();
        arena.write_u32(off.as_usize(), 0xDEAD_BEEF);
        assert_eq!(arena.read_u32(off.as_usize()), 0xDEAD_BEEF);
        assert_eq!(arena.capacity(), 64);
        drop(arena);
        assert_eq!(&buf[4..8], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_relocate_preserves_offsets() {
        let mut arena = Arena::new(128, 4);
        let off = arena.allocate(4).unwrap();
        arena.write_u32(off.as_usize(), 42);
        arena.retire(off, 4);

        let moved = arena.relocate(vec![0u8; 256]).unwrap();
        assert_ne!(moved.base_ptr(), arena.base_ptr());
        assert_eq!(moved.read_u32(off.as_usize()), 42);
        assert_eq!(moved.used(), arena.used());
        assert_eq!(moved.capacity(), 256);
        assert_eq!(moved.stats().dead_bytes, 4);

        assert!(arena.relocate(vec![0u8; 4]).is_err());
    }

    #[test]
    fn test_map_anon() {
        let mut arena = Arena::map_anon(4096, 16).unwrap();
        let off = arena.allocate(100).unwrap();
        assert_eq!(off.as_usize(), 16);
        arena.write_u32(off.as_usize() + 96, 7);
        assert_eq!(arena.read_u32(off.as_usize() + 96), 7);

        assert!(matches!(
            Arena::map_anon(4096, 3),
            Err(Error::InvalidAlignment(3))
        ));
    }

    #[test]
    fn test_validate_layout() {
        assert!(validate_layout(1024, 4).is_ok());
        assert!(matches!(
            validate_layout(1024, 2),
            Err(Error::InvalidAlignment(2))
        ));
        assert!(matches!(
            validate_layout(1024, 12),
            Err(Error::InvalidAlignment(12))
        ));
        assert!(matches!(
            validate_layout(2, 4),
            Err(Error::InvalidCapacity { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_bad_alignment_panics() {
        let _ = Arena::new(64, 6);
    }
}
