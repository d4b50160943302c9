//! Resource identifiers and the ranges type handlers claim
//!
//! Identifiers are plain integers. Every registered resource type owns a
//! contiguous, non-overlapping block of them; a handler sees identifiers
//! relative to the start of its block.

use core::fmt;

/// Unique identifier for a streamed resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ResourceId(pub u32);

impl ResourceId {
    /// Create a new resource ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ResourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Half-open block of identifiers `[base, base + count)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdRange {
    /// First identifier in the block
    pub base: ResourceId,
    /// Number of identifiers in the block
    pub count: u32,
}

impl IdRange {
    /// Build a range, rejecting empty blocks and blocks that run past `u32::MAX`
    pub fn new(base: ResourceId, count: u32) -> Option<Self> {
        if count == 0 {
            return None;
        }
        base.0.checked_add(count)?;
        Some(Self { base, count })
    }

    /// One past the last identifier
    pub fn end(&self) -> u32 {
        // Overflow is rejected in `new`.
        self.base.0 + self.count
    }

    /// Check whether `id` falls inside the block
    pub fn contains(&self, id: ResourceId) -> bool {
        id.0 >= self.base.0 && id.0 < self.end()
    }

    /// Check whether two blocks share at least one identifier
    pub fn overlaps(&self, other: &IdRange) -> bool {
        self.base.0 < other.end() && other.base.0 < self.end()
    }

    /// Identifier relative to the start of the block
    pub fn local(&self, id: ResourceId) -> Option<u32> {
        self.contains(id).then(|| id.0 - self.base.0)
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.base.0, self.end())
    }
}
