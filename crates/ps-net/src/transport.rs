//! The point-to-point transport seam.
//!
//! [`Transport`] is the narrow interface the network layer needs from an
//! MPI-like message-passing system: post a send without blocking, later wait
//! for all posted sends, and block until a frame arrives from any of a set of
//! sources.  Delivery is assumed reliable and FIFO per (sender, receiver)
//! pair; there is no retry anywhere above this trait.
//!
//! [`ChannelTransport`] implements it for ranks running as threads of one
//! process, with one crossbeam channel per ordered pair of ranks.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, Select, Sender};
use ps_core::Rank;

use crate::error::{NetError, NetResult};

// ── Frame ─────────────────────────────────────────────────────────────────────

/// Continuation tag on a physical message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkTag {
    /// More chunks of the same batch follow.
    Continue,
    /// Last chunk of the batch; carries the clock and any done signal.
    End,
}

/// One physical message: a tag plus an opaque encoded body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag:  ChunkTag,
    pub body: Vec<u8>,
}

/// Handle to a posted send, redeemed by [`Transport::complete_sends`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub dest: Rank,
    pub seq:  u64,
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub trait Transport: Send {
    /// This process's rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the run.
    fn world_size(&self) -> usize;

    /// Start sending `frame` to `dest` without blocking.
    fn post_send(&mut self, dest: Rank, frame: Frame) -> NetResult<SendRequest>;

    /// Block until every request in `pending` has completed.
    fn complete_sends(&mut self, pending: Vec<SendRequest>) -> NetResult<()>;

    /// Block until a frame arrives from one of `sources`, returning the
    /// sender and the frame.  Frames from one sender arrive in send order.
    fn wait_any(&mut self, sources: &[Rank]) -> NetResult<(Rank, Frame)>;
}

// ── ChannelTransport ──────────────────────────────────────────────────────────

/// In-process reliable mesh.  Sends complete as soon as they are posted.
pub struct ChannelTransport {
    rank:     Rank,
    /// `outboxes[d]` feeds rank `d`'s inbox for frames from this rank.
    outboxes: Vec<Sender<Frame>>,
    /// `inboxes[s]` holds frames sent by rank `s`.
    inboxes:  Vec<Receiver<Frame>>,
    timeout:  Option<Duration>,
    next_seq: u64,
}

impl ChannelTransport {
    /// A fully connected mesh of `n` ranks, one endpoint per rank in rank
    /// order.  Move each endpoint onto its own thread.
    pub fn mesh(n: usize) -> Vec<ChannelTransport> {
        // pairs[src][dest]
        let pairs: Vec<Vec<(Sender<Frame>, Receiver<Frame>)>> =
            (0..n).map(|_| (0..n).map(|_| channel::unbounded()).collect()).collect();

        let mut outboxes: Vec<Vec<Sender<Frame>>> = vec![Vec::with_capacity(n); n];
        let mut inboxes: Vec<Vec<Receiver<Frame>>> = vec![Vec::with_capacity(n); n];
        for (src, row) in pairs.into_iter().enumerate() {
            for (dest, (tx, rx)) in row.into_iter().enumerate() {
                outboxes[src].push(tx);
                inboxes[dest].push(rx);
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(r, (outboxes, inboxes))| ChannelTransport {
                rank: Rank(r as u32),
                outboxes,
                inboxes,
                timeout: None,
                next_seq: 0,
            })
            .collect()
    }

    /// Fail `wait_any` with `NetError::Timeout` instead of blocking forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Transport for ChannelTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.outboxes.len()
    }

    fn post_send(&mut self, dest: Rank, frame: Frame) -> NetResult<SendRequest> {
        let tx = self.outboxes.get(dest.index()).ok_or(NetError::UnknownPeer(dest))?;
        tx.send(frame).map_err(|_| NetError::Disconnected { peer: dest })?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(SendRequest { dest, seq })
    }

    fn complete_sends(&mut self, pending: Vec<SendRequest>) -> NetResult<()> {
        // Channel sends are complete once posted; only the peers need checking.
        for req in pending {
            if req.dest.index() >= self.outboxes.len() {
                return Err(NetError::UnknownPeer(req.dest));
            }
        }
        Ok(())
    }

    fn wait_any(&mut self, sources: &[Rank]) -> NetResult<(Rank, Frame)> {
        let Some(&first) = sources.first() else {
            return Err(NetError::NothingPosted);
        };
        let mut sel = Select::new();
        for &src in sources {
            let rx = self.inboxes.get(src.index()).ok_or(NetError::UnknownPeer(src))?;
            sel.recv(rx);
        }
        let oper = match self.timeout {
            Some(waited) => sel
                .select_timeout(waited)
                .map_err(|_| NetError::Timeout { peer: first, waited })?,
            None => sel.select(),
        };
        let src = sources[oper.index()];
        let frame = oper
            .recv(&self.inboxes[src.index()])
            .map_err(|_| NetError::Disconnected { peer: src })?;
        Ok((src, frame))
    }
}
