//! Group observer trait for progress reporting and diagnostics.

use ps_core::Rank;

use crate::group::{CycleSummary, RunSummary};
use crate::patch::{PatchStatus, SliceEnd};

/// Callbacks invoked by [`PatchGroup::run`][crate::PatchGroup::run] at key
/// points of the outer cycle.
///
/// All methods have default no-op implementations so implementors only need
/// to override what they care about.
///
/// # Example: progress printer
///
/// ```rust,ignore
/// struct Progress { every: u64 }
///
/// impl GroupObserver for Progress {
///     fn on_cycle_end(&mut self, s: &CycleSummary) {
///         if s.cycle % self.every == 0 {
///             println!("rank {} cycle {}: {} patches finished", s.rank, s.cycle, s.finished());
///         }
///     }
/// }
/// ```
pub trait GroupObserver {
    /// Called before any patch runs in this cycle.
    fn on_cycle_start(&mut self, _rank: Rank, _cycle: u64) {}

    /// Called after each patch hands control back.
    fn on_patch_slice(&mut self, _status: &PatchStatus, _end: SliceEnd) {}

    /// Called after the cycle's receives have been delivered.
    fn on_cycle_end(&mut self, _summary: &CycleSummary) {}

    /// Called once after the termination protocol completes.
    fn on_run_end(&mut self, _summary: &RunSummary) {}
}

/// A [`GroupObserver`] that does nothing.
pub struct NoopObserver;

impl GroupObserver for NoopObserver {}
