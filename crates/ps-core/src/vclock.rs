//! Vector clock used to track causal progress between ranks.
//!
//! Each rank owns one slot.  `incr` bumps the owner's slot; `merge` takes the
//! pointwise maximum with a clock received from another rank.  Both keep the
//! clock monotonically non-decreasing.

use std::cmp::Ordering;
use std::fmt;

use crate::Rank;

/// One counter per rank, plus the identity of the owning rank.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VectorClock {
    owner:  Rank,
    counts: Vec<u64>,
}

impl VectorClock {
    /// A zeroed clock for a world of `world_size` ranks, owned by `owner`.
    pub fn new(world_size: usize, owner: Rank) -> Self {
        Self { owner, counts: vec![0; world_size] }
    }

    pub fn owner(&self) -> Rank {
        self.owner
    }

    /// Advance the owner's own counter by one.
    pub fn incr(&mut self) {
        if let Some(slot) = self.counts.get_mut(self.owner.index()) {
            *slot += 1;
        }
    }

    /// The owner's own counter (its cycle number).
    pub fn own(&self) -> u64 {
        self.get(self.owner)
    }

    /// Counter for `rank`; zero for ranks outside the clock.
    pub fn get(&self, rank: Rank) -> u64 {
        self.counts.get(rank.index()).copied().unwrap_or(0)
    }

    /// Pointwise maximum with `other`.  A longer `other` extends this clock.
    pub fn merge(&mut self, other: &VectorClock) {
        if other.counts.len() > self.counts.len() {
            self.counts.resize(other.counts.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// A copy of this clock with the owner's identity kept; what goes out in
    /// each END chunk.
    pub fn snapshot(&self) -> VectorClock {
        self.clone()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Causal comparison: `Some(Less)` if every slot is `<=` and at least one
    /// is `<`, `None` if the clocks are concurrent.
    pub fn causal_cmp(&self, other: &VectorClock) -> Option<Ordering> {
        let len = self.counts.len().max(other.counts.len());
        let (mut le, mut ge) = (true, true);
        for i in 0..len {
            let a = self.counts.get(i).copied().unwrap_or(0);
            let b = other.counts.get(i).copied().unwrap_or(0);
            le &= a <= b;
            ge &= a >= b;
        }
        match (le, ge) {
            (true, true)   => Some(Ordering::Equal),
            (true, false)  => Some(Ordering::Less),
            (false, true)  => Some(Ordering::Greater),
            (false, false) => None,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for (i, c) in self.counts.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ">@{}", self.owner.0)
    }
}
