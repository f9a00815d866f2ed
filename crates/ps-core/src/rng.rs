//! Deterministic per-patch RNG.
//!
//! Each patch gets its own `SmallRng` seeded by
//!
//!   seed = run_seed XOR (rank * MIXING_CONSTANT) XOR (partition * MIXING_CONSTANT²)
//!
//! so the draws a patch makes do not depend on how many other patches share
//! its process, or on the order ranks were started in.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::GblAddr;

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Random source owned by one patch and lent to its agents through the
/// dispatch context.
pub struct SimRng(SmallRng);

impl SimRng {
    pub fn new(seed: u64) -> Self {
        SimRng(SmallRng::seed_from_u64(seed))
    }

    /// Seed deterministically from the run seed and a patch address.
    pub fn for_patch(run_seed: u64, patch: GblAddr) -> Self {
        let rank_mix = (patch.rank.0 as u64).wrapping_mul(MIXING_CONSTANT);
        let part_mix = (patch.local.partition() as u64)
            .wrapping_mul(MIXING_CONSTANT)
            .wrapping_mul(MIXING_CONSTANT);
        SimRng::new(run_seed ^ rank_mix ^ part_mix)
    }

    /// Expose the inner `SmallRng` for use with `rand` distribution types.
    #[inline]
    pub fn inner(&mut self) -> &mut SmallRng {
        &mut self.0
    }

    #[inline]
    pub fn random<T>(&mut self) -> T
    where
        rand::distributions::Standard: rand::distributions::Distribution<T>,
    {
        self.0.r#gen()
    }

    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    /// `true` with probability `p` (clamped to [0, 1]).
    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Choose a random element from a slice.  `None` if the slice is empty.
    #[inline]
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        use rand::seq::SliceRandom;
        slice.choose(&mut self.0)
    }
}
