//! Logical simulation time.
//!
//! Time is an integer day counter.  Every sequencer, gate batch and tick
//! callback speaks in `Day`s; there is no wall-clock mapping in the kernel.

use std::fmt;

/// An absolute simulation day.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Day(pub u64);

impl Day {
    pub const ZERO: Day = Day(0);

    /// The last representable day.  Arithmetic saturates here, so a
    /// `Sleep(u64::MAX)` parks an agent forever instead of wrapping.
    pub const NEVER: Day = Day(u64::MAX);

    /// Return the day `n` steps after `self`, saturating at [`Day::NEVER`].
    #[inline]
    pub fn offset(self, n: u64) -> Day {
        Day(self.0.saturating_add(n))
    }

    /// The following day, saturating at [`Day::NEVER`].
    #[inline]
    pub fn next(self) -> Day {
        self.offset(1)
    }

    /// Days elapsed from `earlier` to `self`, saturating at zero.
    #[inline]
    pub fn since(self, earlier: Day) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<u64> for Day {
    type Output = Day;
    #[inline]
    fn add(self, rhs: u64) -> Day {
        self.offset(rhs)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}
