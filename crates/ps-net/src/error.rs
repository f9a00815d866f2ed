//! Transport-level errors.
//!
//! Every `NetError` is fatal once it reaches the kernel; it converts into
//! `KernelError::TransportFailure` or `KernelError::ProtocolViolation`.

use std::time::Duration;

use ps_core::{KernelError, Rank};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("rank {peer} hung up")]
    Disconnected { peer: Rank },

    #[error("nothing from rank {peer} (or any other posted source) within {waited:?}")]
    Timeout { peer: Rank, waited: Duration },

    #[error("rank {0} is not part of this transport")]
    UnknownPeer(Rank),

    #[error("wait_any called with no posted receives")]
    NothingPosted,

    #[error("chunk encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type NetResult<T> = Result<T, NetError>;

impl From<NetError> for KernelError {
    fn from(e: NetError) -> Self {
        match &e {
            NetError::Disconnected { peer } | NetError::Timeout { peer, .. } | NetError::UnknownPeer(peer) => {
                KernelError::TransportFailure { peer: *peer, detail: e.to_string() }
            }
            NetError::NothingPosted | NetError::Encode(_) => KernelError::protocol(e.to_string()),
        }
    }
}
