//! Kernel configuration.
//!
//! Built by the embedding application (from whatever source it likes) and
//! handed to `PatchGroupBuilder`.  No file format is defined here.

use crate::{Day, KernelError, KernelResult};

/// Knobs shared by every patch in a process.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KernelConfig {
    /// Master RNG seed.  The same seed always produces identical runs.
    pub seed: u64,

    /// Last simulated day.  A patch whose clock passes this day stops
    /// dispatching; once every local patch has stopped the rank declares
    /// itself done.
    pub last_day: Day,

    /// Maximum number of messages carried by one physical transport chunk.
    /// Larger batches are split into CONTINUE chunks plus a final END chunk.
    pub max_items_per_chunk: usize,

    /// Abort a patch slice after this many agent dispatches without the
    /// gate agent handing control back.  Catches agents that never yield.
    pub max_dispatch_per_slice: u64,

    /// Abort the run after this many network cycles.  `None` disables.
    pub max_cycles: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            seed:                   0,
            last_day:               Day(365),
            max_items_per_chunk:    1_000,
            max_dispatch_per_slice: 10_000_000,
            max_cycles:             None,
        }
    }
}

impl KernelConfig {
    /// Reject settings the kernel cannot run with.
    pub fn validate(&self) -> KernelResult<()> {
        if self.max_items_per_chunk == 0 {
            return Err(KernelError::Config("max_items_per_chunk must be > 0".into()));
        }
        if self.max_dispatch_per_slice == 0 {
            return Err(KernelError::Config("max_dispatch_per_slice must be > 0".into()));
        }
        Ok(())
    }
}
