//! Strongly typed identifiers and the global address type.
//!
//! Local ids (`AgentKey`, `InteractantId`, `GateId`) are only meaningful
//! inside the patch that issued them.  Anything that crosses a patch or rank
//! boundary is named by a [`GblAddr`].

use std::fmt;

/// Generate a typed ID wrapper around a primitive integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// Cast to `usize` for direct use as a `Vec` index.
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl TryFrom<usize> for $name {
            type Error = std::num::TryFromIntError;
            fn try_from(n: usize) -> Result<$name, Self::Error> {
                <$inner>::try_from(n).map($name)
            }
        }
    };
}

typed_id! {
    /// One participating process in a distributed run.
    pub struct Rank(u32);
}

typed_id! {
    /// Handle of an agent inside one patch's main loop.  Reissued when the
    /// agent is re-homed into another patch.
    pub struct AgentKey(u64);
}

typed_id! {
    /// Index of an interactant in its patch's `InteractantTable`.
    pub struct InteractantId(u32);
}

typed_id! {
    /// Index of a gate entrance or exit within its patch.
    pub struct GateId(u32);
}

// ── LocalId ───────────────────────────────────────────────────────────────────

/// The rank-local half of a [`GblAddr`].
///
/// Patches and the gates they own use the two-level `Pair(patch, sub)` form;
/// sub-id 0 is the patch itself.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LocalId {
    Single(u32),
    Pair(u32, u32),
}

impl LocalId {
    /// The partition component: the whole id for `Single`, the first half
    /// for `Pair`.
    pub fn partition(self) -> u32 {
        match self {
            LocalId::Single(id) | LocalId::Pair(id, _) => id,
        }
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalId::Single(id)  => write!(f, "{id}"),
            LocalId::Pair(a, b)  => write!(f, "{a}_{b}"),
        }
    }
}

// ── GblAddr ───────────────────────────────────────────────────────────────────

/// A globally unique address: `(rank, local-id)`.
///
/// Ordered lexicographically by rank, then local id (field order matters for
/// the derived `Ord`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GblAddr {
    pub rank:  Rank,
    pub local: LocalId,
}

impl GblAddr {
    pub fn new(rank: Rank, local: LocalId) -> Self {
        Self { rank, local }
    }

    /// Address of patch `patch` on `rank`.
    pub fn patch(rank: Rank, patch: u32) -> Self {
        Self { rank, local: LocalId::Pair(patch, 0) }
    }

    /// Address of sub-object `sub` (a gate, usually) owned by this patch.
    ///
    /// # Panics
    /// Panics in debug mode if `sub` is 0, which names the patch itself.
    pub fn child(self, sub: u32) -> Self {
        debug_assert!(sub != 0, "sub-id 0 is reserved for the patch address");
        Self { rank: self.rank, local: LocalId::Pair(self.local.partition(), sub) }
    }

    /// The address of the patch that owns this address.
    pub fn owning_patch(self) -> Self {
        Self::patch(self.rank, self.local.partition())
    }
}

impl fmt::Display for GblAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.rank.0, self.local)
    }
}
