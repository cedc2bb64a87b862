use serde::{Deserialize, Serialize};
use std::fmt;

/// Deepest level a ledger may be configured with. Keeps `2^level` and the
/// child arithmetic inside `u64`.
pub const MAX_SUPPORTED_LEVEL: u32 = 62;

// ----------------------------------------------------------------------------
// Coordinate System
// ----------------------------------------------------------------------------

/// Identifies one triangular cell of the gasket: `(x, y)` on the lattice of
/// subdivision depth `level` (0 is the root triangle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: u64,
    pub y: u64,
    pub level: u32,
}

impl Coordinate {
    #[inline]
    pub const fn new(x: u64, y: u64, level: u32) -> Self {
        Coordinate { x, y, level }
    }

    /// The root triangle `(0, 0, 0)`.
    pub const fn root() -> Self {
        Coordinate::new(0, 0, 0)
    }

    pub fn is_root(&self) -> bool {
        *self == Coordinate::root()
    }

    /// Lattice extent `2^level`, or `None` past the supported depth.
    pub fn side(level: u32) -> Option<u64> {
        if level > MAX_SUPPORTED_LEVEL {
            return None;
        }
        1u64.checked_shl(level)
    }

    /// Checks `0 <= x`, `0 <= y` and `x + y <= 2^level`.
    pub fn within_bounds(&self) -> bool {
        match (Self::side(self.level), self.x.checked_add(self.y)) {
            (Some(side), Some(sum)) => sum <= side,
            _ => false,
        }
    }

    /// True if this cell, or any ancestor of it, is the excluded fourth child
    /// of its parent. Every step below the root halves both axes, so an
    /// ancestor at depth `k` is a hole iff bit `level - k` is set in both
    /// `x` and `y`.
    pub fn in_hole(&self) -> bool {
        let Some(side) = Self::side(self.level) else {
            return true;
        };
        (self.x & self.y) & (side - 1) != 0
    }

    /// Gasket membership: within bounds and not inside any hole.
    pub fn in_gasket(&self) -> bool {
        self.within_bounds() && !self.in_hole()
    }

    // ------------------------------------------------------------------------
    // Subdivision
    // ------------------------------------------------------------------------

    /// `(x/2, y/2, level-1)`. Ancestry is always recomputed from the
    /// coordinate itself; nothing links children back to parents.
    pub fn parent(&self) -> Option<Coordinate> {
        if self.level == 0 {
            return None;
        }
        Some(Coordinate::new(self.x / 2, self.y / 2, self.level - 1))
    }

    /// The three corner cells at `level + 1`.
    pub fn children(&self) -> Option<[Coordinate; 3]> {
        let level = self.level.checked_add(1)?;
        let x = self.x.checked_mul(2)?;
        let y = self.y.checked_mul(2)?;
        Some([
            Coordinate::new(x, y, level),
            Coordinate::new(x.checked_add(1)?, y, level),
            Coordinate::new(x, y.checked_add(1)?, level),
        ])
    }

    /// The central inverted cell `(2x+1, 2y+1, level+1)` that subdivision omits.
    pub fn hole_child(&self) -> Option<Coordinate> {
        let level = self.level.checked_add(1)?;
        let x = self.x.checked_mul(2)?.checked_add(1)?;
        let y = self.y.checked_mul(2)?.checked_add(1)?;
        Some(Coordinate::new(x, y, level))
    }

    /// Ancestors from the parent up to level 0.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors { next: self.parent() }
    }

    /// Whether `self` lies strictly inside the subtree rooted at `other`.
    pub fn is_descendant_of(&self, other: &Coordinate) -> bool {
        if self.level <= other.level {
            return false;
        }
        let shift = self.level - other.level;
        if shift >= u64::BITS {
            return false;
        }
        self.x >> shift == other.x && self.y >> shift == other.y
    }

    pub fn is_ancestor_of(&self, other: &Coordinate) -> bool {
        other.is_descendant_of(self)
    }

    /// Whether `self` is `other` or lies below it.
    pub fn is_within(&self, other: &Coordinate) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// Fixed-layout bytes used wherever a coordinate is bound into a hash.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..16].copy_from_slice(&self.y.to_le_bytes());
        out[16..].copy_from_slice(&self.level.to_le_bytes());
        out
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.level)
    }
}

impl From<(u64, u64, u32)> for Coordinate {
    fn from((x, y, level): (u64, u64, u32)) -> Self {
        Coordinate::new(x, y, level)
    }
}

/// Iterator returned by [`Coordinate::ancestors`].
pub struct Ancestors {
    next: Option<Coordinate>,
}

impl Iterator for Ancestors {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

// ----------------------------------------------------------------------------
// Testing
// ----------------------------------------------------------------------------
