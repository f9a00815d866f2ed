//! Kernel error taxonomy.
//!
//! Every variant of [`KernelError`] is fatal: it marks a defect in how the
//! kernel is being used (or a broken transport), and `PatchGroup::run`
//! returns it to the embedding program instead of trying to recover.
//!
//! Running out of a resource is not an error in this sense.  It is reported
//! as [`ExhaustedResource`], a plain value the calling agent handles in its
//! own control flow (usually by sleeping and trying again).

use thiserror::Error;

use crate::{AgentKey, Day, GblAddr, InteractantId, Rank};

/// Fatal kernel failures.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("temporal violation: enqueue at {when} but sequencer is already at {now}")]
    TemporalViolation { when: Day, now: Day },

    #[error("lock ownership violation: {agent} unlocked {resource:?}, held by {holder}")]
    LockOwnershipViolation {
        resource: String,
        agent:    AgentKey,
        holder:   String,
    },

    #[error("no callback registered for messages {src} -> {dest}")]
    UnknownMessageSource { src: GblAddr, dest: GblAddr },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport failure talking to rank {peer}: {detail}")]
    TransportFailure { peer: Rank, detail: String },

    #[error("interactant {0} does not exist in this patch")]
    UnknownInteractant(InteractantId),

    #[error("agent {0} does not exist in this patch")]
    UnknownAgent(AgentKey),

    #[error("safety limit exceeded: {0}")]
    SafetyLimit(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl KernelError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }
}

/// Shorthand result type for all `ps-*` crates.
pub type KernelResult<T> = Result<T, KernelError>;

/// A resource search found nothing free.  Recoverable; never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no free resource among {searched} candidates")]
pub struct ExhaustedResource {
    pub searched: usize,
}
