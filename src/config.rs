//! Tree and arena configuration.

use crate::arena::{self, MIN_ALIGNMENT};
use crate::error::Result;
use crate::node::{node_size, FANOUT};

/// Default arena size (1 MiB).
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

/// How many spare slots nodes get when they are created or reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Spare slots for freshly created single-slot nodes.
    pub initial_spare: u8,
    /// Spare slots added on reallocation, as a percentage of the new span.
    pub spare_percent: u8,
    /// Lower bound for the spare slots added on reallocation.
    pub min_spare: u8,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            initial_spare: 0,
            spare_percent: 50,
            min_spare: 1,
        }
    }
}

impl GrowthPolicy {
    /// Never reserve spare slots: every span growth reallocates.
    pub const fn exact() -> Self {
        Self {
            initial_spare: 0,
            spare_percent: 0,
            min_spare: 0,
        }
    }

    /// Spare slots for a reallocated node spanning `span` byte values.
    pub fn spare_for(&self, span: usize) -> u8 {
        debug_assert!((1..=FANOUT).contains(&span));
        let wanted = (span * usize::from(self.spare_percent) / 100).max(usize::from(self.min_spare));
        wanted.min(FANOUT - span).min(usize::from(u8::MAX)) as u8
    }

    /// Spare slots for a new singleton node.
    pub fn initial_spare(&self) -> u8 {
        self.initial_spare.min((FANOUT - 1) as u8)
    }
}

/// Configuration for a [`Tree`](crate::Tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Arena size in bytes for owned and anonymously mapped arenas. Trees over
    /// caller-supplied memory use the buffer length instead.
    pub capacity: usize,
    /// Offset alignment: a power of two, at least 4.
    pub alignment: usize,
    /// Slots reserved in the initially empty root node.
    pub root_spare: u8,
    pub growth: GrowthPolicy,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            alignment: MIN_ALIGNMENT,
            root_spare: 16,
            growth: GrowthPolicy::default(),
        }
    }
}

impl TreeConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_root_spare(mut self, root_spare: u8) -> Self {
        self.root_spare = root_spare;
        self
    }

    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    /// Smallest arena that can hold the reserved prefix and the root.
    pub fn min_capacity(&self) -> usize {
        self.alignment + node_size(usize::from(self.root_spare))
    }

    /// Validate against an arena of `capacity` bytes.
    pub fn validate_for(&self, capacity: usize) -> Result<()> {
        arena::validate_layout(capacity, self.alignment)?;
        let min = self.min_capacity();
        if capacity < min {
            return Err(crate::Error::InvalidCapacity {
                capacity,
                min,
                max: arena::MAX_CAPACITY,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_for(self.capacity)
    }
}
