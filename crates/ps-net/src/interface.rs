//! `NetworkInterface` — one process's side of the cross-rank day cycle.
//!
//! # Cycle
//!
//! ```text
//! finish_send   wait for every send posted by the last start_send
//! finish_recv   incr own clock; deliver local items; read chunks from each
//!               posted source until its End; merge clocks; dispatch
//! start_recv    post one receive per partner
//! start_send    divert same-rank items locally; chunk the rest per partner,
//!               attaching clock + pending done signal to each End chunk
//! ```
//!
//! Every partner gets an `End` chunk every cycle, empty or not, so every
//! posted receive completes and the ranks advance in lock-step.
//!
//! # Ordering
//!
//! Chunks from one sender are read in send order and a sender is not read
//! past its `End` within a cycle.  After all receives complete, items are
//! dispatched local first, then by ascending sender rank, each in buffer
//! order, so a run is reproducible regardless of arrival interleaving.
//!
//! # Termination
//!
//! A rank that has run out of work calls [`NetworkInterface::send_done_signal`]
//! every cycle.  The first call attaches `(rank, cycle)` to the next `End`
//! chunk to every partner.  The call returns `true` once every partner has
//! declared too and the own cycle exceeds the largest declared cycle; by
//! then every chunk anyone sent before declaring has been consumed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ps_core::{GblAddr, KernelError, KernelResult, LocalId, Rank, VectorClock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace};

use crate::transport::{SendRequest, Transport};
use crate::wire::{Chunk, ChunkTail, DoneSignal, MsgKind, WireItem};

/// Callback lookup key: (source rank, source local id, destination local id).
pub type RouteKey = (Rank, LocalId, LocalId);

/// Counters accumulated over a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NetStats {
    pub cycles:         u64,
    pub chunks_sent:    u64,
    pub items_sent:     u64,
    pub items_received: u64,
    pub local_items:    u64,
}

pub struct NetworkInterface<B, R> {
    transport:      Box<dyn Transport>,
    rank:           Rank,
    max_items:      usize,
    vclock:         VectorClock,

    partners:       BTreeSet<Rank>,
    routes:         HashMap<RouteKey, R>,

    outgoing:       BTreeMap<Rank, Vec<WireItem<B>>>,
    local:          Vec<WireItem<B>>,
    pending_sends:  Vec<SendRequest>,
    posted:         BTreeSet<Rank>,
    inbound:        BTreeMap<Rank, Vec<WireItem<B>>>,

    declared:       Option<u64>,
    done_pending:   bool,
    done_seen:      BTreeSet<Rank>,
    done_max_cycle: u64,

    stats:          NetStats,
}

impl<B, R> NetworkInterface<B, R>
where
    B: Serialize + DeserializeOwned,
    R: Copy,
{
    pub fn new(transport: Box<dyn Transport>, max_items_per_chunk: usize) -> Self {
        let rank = transport.rank();
        let vclock = VectorClock::new(transport.world_size(), rank);
        Self {
            transport,
            rank,
            max_items: max_items_per_chunk.max(1),
            vclock,
            partners: BTreeSet::new(),
            routes: HashMap::new(),
            outgoing: BTreeMap::new(),
            local: Vec::new(),
            pending_sends: Vec::new(),
            posted: BTreeSet::new(),
            inbound: BTreeMap::new(),
            declared: None,
            done_pending: false,
            done_seen: BTreeSet::new(),
            done_max_cycle: 0,
            stats: NetStats::default(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.transport.world_size()
    }

    /// Number of completed receive phases.
    pub fn cycle(&self) -> u64 {
        self.vclock.own()
    }

    pub fn vclock(&self) -> &VectorClock {
        &self.vclock
    }

    pub fn partners(&self) -> impl Iterator<Item = Rank> + '_ {
        self.partners.iter().copied()
    }

    pub fn stats(&self) -> NetStats {
        self.stats
    }

    pub fn has_declared(&self) -> bool {
        self.declared.is_some()
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Exchange a batch with `rank` every cycle.  A rank is never its own
    /// partner.
    pub fn add_partner(&mut self, rank: Rank) {
        if rank != self.rank {
            self.partners.insert(rank);
        }
    }

    /// Route items sent from `src` to `dest` to `route`.  Re-registering the
    /// same pair replaces the previous route.
    pub fn expect(&mut self, src: GblAddr, dest: GblAddr, route: R) {
        self.routes.insert((src.rank, src.local, dest.local), route);
    }

    /// Buffer an outgoing item for the next `start_send`.
    pub fn enqueue(&mut self, kind: MsgKind, body: B, src: GblAddr, dest: GblAddr) {
        self.outgoing.entry(dest.rank).or_default().push(WireItem { kind, src, dest, body });
    }

    /// Items enqueued or diverted locally that no receive has handed out yet.
    pub fn buffered(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum::<usize>() + self.local.len()
    }

    // ── Cycle ─────────────────────────────────────────────────────────────

    /// Post one receive for every partner.
    pub fn start_recv(&mut self) {
        self.posted.extend(self.partners.iter().copied());
    }

    pub fn start_send(&mut self) -> KernelResult<()> {
        if let Some(items) = self.outgoing.remove(&self.rank) {
            self.stats.local_items += items.len() as u64;
            self.local.extend(items);
        }

        let done = if self.done_pending {
            self.done_pending = false;
            self.declared.map(|cycle| DoneSignal { rank: self.rank, cycle })
        } else {
            None
        };

        for &peer in &self.partners {
            let items = self.outgoing.remove(&peer).unwrap_or_default();
            self.stats.items_sent += items.len() as u64;
            let tail = ChunkTail { clock: self.vclock.snapshot(), done };
            for chunk in Chunk::split(items, self.max_items, tail) {
                let frame = chunk.encode()?;
                let req = self.transport.post_send(peer, frame)?;
                self.pending_sends.push(req);
                self.stats.chunks_sent += 1;
            }
        }

        if let Some((&stray, _)) = self.outgoing.iter().next() {
            return Err(KernelError::protocol(format!(
                "rank {} has items for rank {stray}, which is not a partner",
                self.rank
            )));
        }
        trace!(rank = %self.rank, sends = self.pending_sends.len(), "sends posted");
        Ok(())
    }

    pub fn finish_send(&mut self) -> KernelResult<()> {
        let pending = std::mem::take(&mut self.pending_sends);
        self.transport.complete_sends(pending)?;
        Ok(())
    }

    /// Complete this cycle's receives and hand every item to `deliver`
    /// together with its registered route.
    ///
    /// Fails with `UnknownMessageSource` for an item nobody expects.
    pub fn finish_recv(&mut self, mut deliver: impl FnMut(R, WireItem<B>) -> KernelResult<()>) -> KernelResult<()> {
        self.vclock.incr();
        self.stats.cycles += 1;

        while !self.posted.is_empty() {
            let sources: Vec<Rank> = self.posted.iter().copied().collect();
            let (src, frame) = self.transport.wait_any(&sources)?;
            let chunk: Chunk<B> = Chunk::decode(&frame, src)?;
            self.stats.items_received += chunk.items.len() as u64;
            self.inbound.entry(src).or_default().extend(chunk.items);

            // A Continue chunk leaves the receive from `src` posted.
            if let Some(tail) = chunk.tail {
                self.posted.remove(&src);
                if let Some(signal) = tail.done {
                    self.note_done(signal);
                }
                self.vclock.merge(&tail.clock);
            }
        }

        let local = std::mem::take(&mut self.local);
        let inbound = std::mem::take(&mut self.inbound);
        let n_local = local.len();
        for item in local.into_iter().chain(inbound.into_values().flatten()) {
            let key = (item.src.rank, item.src.local, item.dest.local);
            let route = *self
                .routes
                .get(&key)
                .ok_or(KernelError::UnknownMessageSource { src: item.src, dest: item.dest })?;
            deliver(route, item)?;
        }

        debug!(rank = %self.rank, cycle = self.cycle(), clock = %self.vclock, local = n_local, "receives complete");
        Ok(())
    }

    // ── Termination ───────────────────────────────────────────────────────

    fn note_done(&mut self, signal: DoneSignal) {
        if self.done_seen.insert(signal.rank) {
            debug!(rank = %self.rank, from = %signal.rank, at = signal.cycle, "done signal received");
        }
        self.done_max_cycle = self.done_max_cycle.max(signal.cycle);
    }

    /// Declare this rank done (once) and report whether the whole run may
    /// stop.
    pub fn send_done_signal(&mut self) -> bool {
        if self.declared.is_none() {
            let cycle = self.cycle();
            info!(rank = %self.rank, cycle, "declaring done");
            self.declared = Some(cycle);
            self.done_pending = true;
            self.done_max_cycle = self.done_max_cycle.max(cycle);
        }
        self.partners.iter().all(|p| self.done_seen.contains(p)) && self.cycle() > self.done_max_cycle
    }
}
