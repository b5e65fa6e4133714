use std::fmt;

/// Inclusive range of block numbers `[from_block, to_block]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub const fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
        }
    }

    /// A range is only queryable when it is non-empty.
    pub const fn is_valid(&self) -> bool {
        self.from_block <= self.to_block
    }

    /// Number of blocks covered, zero for an inverted range.
    pub const fn len(&self) -> u64 {
        if self.is_valid() {
            (self.to_block - self.from_block).saturating_add(1)
        } else {
            0
        }
    }

    pub const fn is_empty(&self) -> bool {
        !self.is_valid()
    }

    pub const fn contains(&self, block_number: u64) -> bool {
        self.from_block <= block_number && block_number <= self.to_block
    }

    /// Caps the upper bound at `max_block`, keeping the lower bound as is.
    pub fn clamp_to(&self, max_block: u64) -> Self {
        Self {
            from_block: self.from_block,
            to_block: self.to_block.min(max_block),
        }
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}
