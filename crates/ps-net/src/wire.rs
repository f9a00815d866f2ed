//! Wire format for one rank-to-rank batch.
//!
//! A batch is the list of items one rank sends another in one cycle.  It is
//! split into chunks of at most `max_items_per_chunk` items:
//!
//! ```text
//! Continue  [item, item, …]
//! Continue  [item, item, …]
//! End       [item, …]  + tail { vector clock, done signal? }
//! ```
//!
//! Exactly the last chunk carries a tail, and the frame's tag must agree
//! with it.  Bodies are JSON so the transport only ever sees bytes.

use ps_core::{GblAddr, KernelError, KernelResult, Rank, VectorClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::NetResult;
use crate::transport::{ChunkTag, Frame};

/// Explicit switch over the payload kinds the kernel moves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgKind {
    /// A batch of agents crossing a gate.
    Gate,
    /// A domain-level message from one agent's patch to another address.
    Domain,
}

/// One addressed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireItem<B> {
    pub kind: MsgKind,
    pub src:  GblAddr,
    pub dest: GblAddr,
    pub body: B,
}

/// "Rank `rank` declared itself done at cycle `cycle`."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneSignal {
    pub rank:  Rank,
    pub cycle: u64,
}

/// Trailer carried by the `End` chunk only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkTail {
    pub clock: VectorClock,
    pub done:  Option<DoneSignal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk<B> {
    pub items: Vec<WireItem<B>>,
    pub tail:  Option<ChunkTail>,
}

impl<B> Chunk<B> {
    pub fn tag(&self) -> ChunkTag {
        if self.tail.is_some() { ChunkTag::End } else { ChunkTag::Continue }
    }

    /// Split `items` into chunks of at most `max_items`, the last one
    /// carrying `tail`.  Always yields at least one (possibly empty) chunk.
    pub fn split(mut items: Vec<WireItem<B>>, max_items: usize, tail: ChunkTail) -> Vec<Chunk<B>> {
        let max_items = max_items.max(1);
        let mut chunks = Vec::with_capacity(items.len() / max_items + 1);
        while items.len() > max_items {
            let rest = items.split_off(max_items);
            chunks.push(Chunk { items, tail: None });
            items = rest;
        }
        chunks.push(Chunk { items, tail: Some(tail) });
        chunks
    }
}

impl<B: Serialize> Chunk<B> {
    pub fn encode(&self) -> NetResult<Frame> {
        Ok(Frame { tag: self.tag(), body: serde_json::to_vec(self)? })
    }
}

impl<B: DeserializeOwned> Chunk<B> {
    /// Parse a frame, rejecting malformed bodies and tag/tail mismatches.
    pub fn decode(frame: &Frame, from: Rank) -> KernelResult<Chunk<B>> {
        let chunk: Chunk<B> = serde_json::from_slice(&frame.body)
            .map_err(|e| KernelError::protocol(format!("undecodable chunk from rank {from}: {e}")))?;
        if chunk.tag() != frame.tag {
            return Err(KernelError::protocol(format!(
                "chunk from rank {from} tagged {:?} but {} a tail",
                frame.tag,
                if chunk.tail.is_some() { "carries" } else { "lacks" },
            )));
        }
        Ok(chunk)
    }
}
