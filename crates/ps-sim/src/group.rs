//! `PatchGroup` — the per-process driver and its outer cycle.
//!
//! # Cycle
//!
//! ```text
//! start():  partners = every other rank; start_recv; start_send
//! loop:
//!   1. Slices   each patch runs until its gate agent flushes (round-robin);
//!               departures and domain messages go to the network buffers
//!   2. Network  finish_send; finish_recv delivers batches to gate exits
//!               and domain messages to their handlers
//!   3. Freeze   each patch re-evaluates its freeze rule
//!   4. Done?    once every patch is past the last day, declare done; stop
//!               when the done-signal protocol says so
//!   5. Network  start_recv; start_send
//! ```

use ps_core::{GblAddr, KernelConfig, KernelError, KernelResult, Rank, VectorClock};
use ps_net::{MsgKind, NetStats, NetworkInterface, WireItem};
use ps_sched::Agent;
use tracing::{debug, info, warn};

use crate::error::SimResult;
use crate::observer::GroupObserver;
use crate::patch::{Patch, PatchStatus};
use crate::payload::{Migrant, Payload};

/// Domain message callback: `(destination patch, source address, message)`.
pub type MessageHandler<A> =
    Box<dyn FnMut(&mut Patch<A>, GblAddr, <A as Agent>::Message) -> KernelResult<()> + Send>;

/// Where an incoming item is delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Exit { patch: usize, exit: usize },
    Handler { patch: usize, handler: usize },
}

pub(crate) type WireBody<A> = Payload<A, <A as Agent>::Message>;

// ── Summaries ─────────────────────────────────────────────────────────────────

/// State of every local patch after one cycle.
#[derive(Clone, Debug)]
pub struct CycleSummary {
    pub rank:    Rank,
    pub cycle:   u64,
    pub clock:   VectorClock,
    pub patches: Vec<PatchStatus>,
}

impl CycleSummary {
    /// `true` when no local patch has real work left today.
    pub fn all_done_today(&self) -> bool {
        self.patches.iter().all(|p| p.done_today)
    }

    pub fn all_finished(&self) -> bool {
        self.patches.iter().all(|p| p.finished)
    }

    pub fn finished(&self) -> usize {
        self.patches.iter().filter(|p| p.finished).count()
    }
}

/// Counters accumulated by one group over a whole run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub departures: u64,
    pub arrivals:   u64,
    pub messages:   u64,
}

/// Returned by [`PatchGroup::run`].
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub rank:            Rank,
    pub cycles:          u64,
    pub patches:         Vec<PatchStatus>,
    pub stats:           GroupStats,
    pub clamped_batches: u64,
    /// Domain messages and gate batches still buffered at shutdown, either
    /// in a patch outbox or waiting for a send that never came.
    pub undelivered:     usize,
    pub net:             NetStats,
}

impl RunSummary {
    pub fn agents(&self) -> usize {
        self.patches.iter().map(|p| p.agents).sum()
    }
}

// ── PatchGroup ────────────────────────────────────────────────────────────────

/// All patches of one process plus its network interface.
///
/// Create via [`PatchGroupBuilder`][crate::PatchGroupBuilder].
pub struct PatchGroup<A: Migrant> {
    pub(crate) config:   KernelConfig,
    pub(crate) rank:     Rank,
    pub(crate) patches:  Vec<Patch<A>>,
    pub(crate) net:      NetworkInterface<WireBody<A>, Route>,
    pub(crate) handlers: Vec<MessageHandler<A>>,
    pub(crate) stats:    GroupStats,
    pub(crate) started:  bool,
}

impl<A: Migrant> PatchGroup<A> {
    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn patches(&self) -> &[Patch<A>] {
        &self.patches
    }

    pub fn patch(&self, addr: GblAddr) -> Option<&Patch<A>> {
        self.patches.iter().find(|p| p.addr() == addr)
    }

    pub fn patch_mut(&mut self, addr: GblAddr) -> Option<&mut Patch<A>> {
        self.patches.iter_mut().find(|p| p.addr() == addr)
    }

    /// Completed network cycles.
    pub fn cycle(&self) -> u64 {
        self.net.cycle()
    }

    pub fn stats(&self) -> GroupStats {
        self.stats
    }

    // ── Run ───────────────────────────────────────────────────────────────

    /// Open the first network cycle.  Every other rank is a partner, so all
    /// ranks advance and stop together.  Calling it again is a no-op.
    pub fn start(&mut self) -> KernelResult<()> {
        if self.started {
            return Ok(());
        }
        for r in 0..self.net.world_size() {
            self.net.add_partner(Rank(r as u32));
        }
        self.net.start_recv();
        self.net.start_send()?;
        self.started = true;
        Ok(())
    }

    /// Run until every rank has finished its last day and the done-signal
    /// protocol completes.  Any fatal kernel error ends the run.
    pub fn run<O: GroupObserver>(&mut self, observer: &mut O) -> SimResult<RunSummary> {
        self.start()?;
        info!(
            rank = %self.rank,
            patches = self.patches.len(),
            last_day = %self.config.last_day,
            "run starting"
        );

        loop {
            let cycle = self.net.cycle() + 1;
            if self.config.max_cycles.is_some_and(|max| cycle > max) {
                return Err(KernelError::SafetyLimit(format!("rank {} exceeded {cycle} network cycles", self.rank)).into());
            }
            observer.on_cycle_start(self.rank, cycle);

            // 1. Slices
            for i in 0..self.patches.len() {
                let end = self.patches[i].run_slice()?;
                observer.on_patch_slice(&self.patches[i].status(), end);
                self.collect(i);
            }

            // 2. Network
            self.net.finish_send()?;
            self.finish_recv()?;

            // 3. Freeze
            for p in &mut self.patches {
                p.apply_freeze_rule();
            }

            let summary = self.cycle_summary();
            debug!(
                rank = %self.rank,
                cycle = summary.cycle,
                done_today = summary.all_done_today(),
                finished = summary.finished(),
                "cycle complete"
            );
            observer.on_cycle_end(&summary);

            // 4. Done?
            if (summary.all_finished() || self.net.has_declared()) && self.net.send_done_signal() {
                break;
            }

            // 5. Network
            self.net.start_recv();
            self.net.start_send()?;
        }

        let summary = self.run_summary();
        if summary.undelivered > 0 {
            warn!(rank = %self.rank, n = summary.undelivered, "items left undelivered at shutdown");
        }
        info!(
            rank = %self.rank,
            cycles = summary.cycles,
            agents = summary.agents(),
            departures = summary.stats.departures,
            arrivals = summary.stats.arrivals,
            "run complete"
        );
        observer.on_run_end(&summary);
        Ok(summary)
    }

    /// Move patch `i`'s departures, exit registrations, and domain messages
    /// into the network buffers.
    pub(crate) fn collect(&mut self, i: usize) {
        let out = self.patches[i].take_output();
        for exp in out.expects {
            self.net.expect(exp.src, exp.dest, Route::Exit { patch: i, exit: exp.exit });
        }
        for dep in out.departures {
            self.stats.departures += dep.batch.agents.len() as u64;
            self.net.enqueue(MsgKind::Gate, Payload::GateBatch(dep.batch), dep.src, dep.dest);
        }
        for msg in self.patches[i].main_loop_mut().take_outbox() {
            self.net.enqueue(MsgKind::Domain, Payload::Domain(msg.msg), msg.src, msg.dest);
        }
    }

    fn finish_recv(&mut self) -> KernelResult<()> {
        let patches = &mut self.patches;
        let handlers = &mut self.handlers;
        let stats = &mut self.stats;
        self.net.finish_recv(|route, item| deliver(patches, handlers, stats, route, item))
    }

    fn cycle_summary(&self) -> CycleSummary {
        CycleSummary {
            rank:    self.rank,
            cycle:   self.net.cycle(),
            clock:   self.net.vclock().clone(),
            patches: self.patches.iter().map(Patch::status).collect(),
        }
    }

    pub(crate) fn run_summary(&mut self) -> RunSummary {
        let outboxes: usize = self
            .patches
            .iter()
            .map(|p| p.main_loop().outbox_len())
            .sum();
        let undelivered = outboxes + self.net.buffered();
        let clamped_batches = self
            .patches
            .iter()
            .flat_map(|p| p.gates().exits())
            .map(|x| x.clamped)
            .sum();
        RunSummary {
            rank: self.rank,
            cycles: self.net.cycle(),
            patches: self.patches.iter().map(Patch::status).collect(),
            stats: self.stats,
            clamped_batches,
            undelivered,
            net: self.net.stats(),
        }
    }
}

fn deliver<A: Migrant>(
    patches:  &mut [Patch<A>],
    handlers: &mut [MessageHandler<A>],
    stats:    &mut GroupStats,
    route:    Route,
    item:     WireItem<WireBody<A>>,
) -> KernelResult<()> {
    let src = item.src;
    if item.kind != item.body.kind() {
        return Err(KernelError::protocol(format!(
            "item from {src} labelled {:?} carries a {:?} body",
            item.kind,
            item.body.kind()
        )));
    }
    match (route, item.body) {
        (Route::Exit { patch, exit }, Payload::GateBatch(batch)) => {
            let p = patches
                .get_mut(patch)
                .ok_or_else(|| KernelError::protocol(format!("route to missing patch #{patch}")))?;
            stats.arrivals += p.handle_incoming(exit, batch)? as u64;
        }
        (Route::Handler { patch, handler }, Payload::Domain(msg)) => {
            let p = patches
                .get_mut(patch)
                .ok_or_else(|| KernelError::protocol(format!("route to missing patch #{patch}")))?;
            let h = handlers
                .get_mut(handler)
                .ok_or_else(|| KernelError::protocol(format!("route to missing handler #{handler}")))?;
            h(p, src, msg)?;
            stats.messages += 1;
        }
        (route, body) => {
            return Err(KernelError::protocol(format!(
                "{:?} item from {src} routed to {route:?}",
                body.kind()
            )));
        }
    }
    Ok(())
}
