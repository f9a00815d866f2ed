//! Errors raised while assembling or running a `PatchGroup`.

use ps_core::{GblAddr, KernelError, Rank};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("patch {0} was added twice")]
    DuplicatePatch(GblAddr),

    #[error("no local patch at {0}")]
    UnknownPatch(GblAddr),

    #[error("{addr} belongs to rank {}, this group is rank {rank}", .addr.rank)]
    NotLocal { addr: GblAddr, rank: Rank },

    #[error("gate {from} -> {to} must connect two patch addresses")]
    BadGate { from: GblAddr, to: GblAddr },

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type SimResult<T> = Result<T, SimError>;
