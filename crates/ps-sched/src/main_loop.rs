//! `MainLoop` — cooperative dispatch for one patch.
//!
//! # Dispatch cycle
//!
//! ```text
//! loop:
//!   (runnable, day) = sequencer.next()
//!   Agent(k) → run k until it yields:
//!                Sleep(n)    → enqueue k at day + n
//!                Lock(id)    → granted: keep running k
//!                              queued:  k waits in id's queue
//!                Unlock(id)  → released: keep running k
//!                              handed off to w: enqueue w, then k, at day
//!                Done        → drop k
//!   Clock    → tick callbacks, maybe bump an idle day, sleep 1
//!   Gates    → return GateTurn to the owning patch
//! ```
//!
//! Exactly one agent runs at a time and only the yields above suspend it.

use std::collections::HashMap;

use ps_core::{AgentKey, Day, GblAddr, InteractantId, KernelError, KernelResult, SimRng};
use tracing::{debug, trace, warn};

use crate::agent::{Agent, AgentCtx, AgentRecord, Outgoing, Yield};
use crate::interactant::{CensusEntry, InteractantTable, LockOutcome, UnlockOutcome};
use crate::sequencer::{Sequencer, TimeRange};

/// An entry in a patch's sequencer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Runnable {
    Agent(AgentKey),
    /// The built-in timeless clock agent.
    Clock,
    /// The patch's timeless gate agent.
    Gates,
}

/// Why [`MainLoop::run_slice`] returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slice {
    /// The gate agent's turn came up on this day.
    GateTurn(Day),
    /// The next entry lies beyond the horizon.
    Horizon,
    /// Nothing left to run.
    Exhausted,
}

/// Argument passed to every per-tick callback.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TickInfo {
    pub patch:  GblAddr,
    pub before: Day,
    pub after:  Day,
}

pub type TickCallback = Box<dyn FnMut(&TickInfo) + Send>;

#[derive(Copy, Clone, Debug)]
enum ClockPhase {
    First,
    Notify { before: Day },
}

enum Resumed {
    Suspended,
    Finished,
}

pub struct MainLoop<A: Agent> {
    addr:         GblAddr,
    sequencer:    Sequencer<Runnable>,
    agents:       HashMap<AgentKey, AgentRecord<A>>,
    next_key:     u64,
    interactants: InteractantTable,
    clock:        ClockPhase,
    callbacks:    Vec<TickCallback>,
    frozen:       bool,
    rng:          SimRng,
    outbox:       Vec<Outgoing<A::Message>>,
    max_dispatch: u64,
}

impl<A: Agent> MainLoop<A> {
    /// A loop for the patch at `addr` whose clock starts on `start`.
    pub fn new(addr: GblAddr, start: Day, rng: SimRng, max_dispatch: u64) -> Self {
        let mut sequencer = Sequencer::new(start);
        // Cannot fail: `start` is the sequencer's own `now`.
        let _ = sequencer.enqueue(Runnable::Clock, start);
        Self {
            addr,
            sequencer,
            agents: HashMap::new(),
            next_key: 0,
            interactants: InteractantTable::new(),
            clock: ClockPhase::First,
            callbacks: Vec::new(),
            frozen: false,
            rng,
            outbox: Vec::new(),
            max_dispatch,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn addr(&self) -> GblAddr {
        self.addr
    }

    pub fn now(&self) -> Day {
        self.sequencer.now()
    }

    pub fn sequencer(&self) -> &Sequencer<Runnable> {
        &self.sequencer
    }

    pub fn interactants(&self) -> &InteractantTable {
        &self.interactants
    }

    pub fn interactants_mut(&mut self) -> &mut InteractantTable {
        &mut self.interactants
    }

    pub fn census(&self) -> Vec<CensusEntry> {
        self.interactants.census()
    }

    pub fn agent(&self, key: AgentKey) -> Option<&AgentRecord<A>> {
        self.agents.get(&key)
    }

    pub fn agents(&self) -> impl Iterator<Item = (AgentKey, &AgentRecord<A>)> + '_ {
        self.agents.iter().map(|(&k, r)| (k, r))
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn rng(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    // ── Time control ──────────────────────────────────────────────────────

    /// Stop the clock agent from fast-forwarding idle days.
    pub fn freeze_time(&mut self) {
        if !self.frozen {
            debug!(patch = %self.addr, now = %self.now(), "time frozen");
        }
        self.frozen = true;
    }

    pub fn unfreeze_time(&mut self) {
        if self.frozen {
            debug!(patch = %self.addr, now = %self.now(), "time unfrozen");
        }
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Register a callback run once per clock tick with the previous and
    /// current day.
    pub fn add_tick_callback(&mut self, cb: TickCallback) {
        self.callbacks.push(cb);
    }

    /// `(earliest relevant day, latest scheduled day)` for this patch.
    pub fn time_range(&self) -> TimeRange {
        let agents = &self.agents;
        self.sequencer.time_range(
            |r| !is_timeless(agents, r),
            self.interactants.timeless_contention(),
        )
    }

    /// `true` when no real agent is due today or earlier.
    pub fn done_today(&self) -> bool {
        let now = self.now();
        self.time_range().earliest_relevant.is_none_or(|d| d > now)
    }

    // ── Agent placement ───────────────────────────────────────────────────

    /// Create a new agent owned by this patch, first run on `at`.
    pub fn spawn(&mut self, body: A, at: Day) -> KernelResult<AgentKey> {
        let record = AgentRecord::new(body, self.addr);
        self.adopt(record, at)
    }

    /// Take ownership of an existing record and schedule it on `at`.
    pub fn adopt(&mut self, record: AgentRecord<A>, at: Day) -> KernelResult<AgentKey> {
        let key = AgentKey(self.next_key);
        self.sequencer.enqueue(Runnable::Agent(key), at)?;
        self.next_key += 1;
        self.agents.insert(key, record);
        Ok(key)
    }

    /// Remove an agent that is not scheduled (e.g. one waiting at a gate).
    pub fn remove_agent(&mut self, key: AgentKey) -> KernelResult<AgentRecord<A>> {
        self.agents.remove(&key).ok_or(KernelError::UnknownAgent(key))
    }

    /// Release every lock `key` still holds. Each contended interactant is
    /// handed to its next waiter, who is queued for today.
    pub fn release_locks(&mut self, key: AgentKey) -> KernelResult<Vec<InteractantId>> {
        let held = self.interactants.held_by(key);
        let now = self.sequencer.now();
        for &id in &held {
            if let UnlockOutcome::HandedOff(next) = self.interactants.unlock(id, key)? {
                trace!(patch = %self.addr, from = %key, to = %next, "lock handed off on release");
                self.sequencer.enqueue(Runnable::Agent(next), now)?;
            }
        }
        Ok(held)
    }

    /// Put the gate agent on the ready list for `at`.
    pub fn schedule_gates(&mut self, at: Day) -> KernelResult<()> {
        self.sequencer.enqueue(Runnable::Gates, at)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Domain messages queued by agents since the last call.
    pub fn take_outbox(&mut self) -> Vec<Outgoing<A::Message>> {
        std::mem::take(&mut self.outbox)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    /// Run ready entries until the gate agent's turn, the horizon, or an
    /// empty queue.
    pub fn run_slice(&mut self, horizon: Day) -> KernelResult<Slice> {
        let mut dispatched = 0u64;
        loop {
            match self.sequencer.peek_day() {
                None                    => return Ok(Slice::Exhausted),
                Some(d) if d > horizon  => return Ok(Slice::Horizon),
                Some(_)                 => {}
            }
            let Some((runnable, day)) = self.sequencer.next_ready() else {
                return Ok(Slice::Exhausted);
            };
            match runnable {
                Runnable::Gates      => return Ok(Slice::GateTurn(day)),
                Runnable::Clock      => self.step_clock(day)?,
                Runnable::Agent(key) => self.dispatch(key, day, &mut dispatched)?,
            }
        }
    }

    fn step_clock(&mut self, day: Day) -> KernelResult<()> {
        if let ClockPhase::Notify { before } = self.clock {
            let info = TickInfo { patch: self.addr, before, after: day };
            for cb in &mut self.callbacks {
                cb(&info);
            }
        }
        if !self.frozen {
            let agents = &self.agents;
            let contended = self.interactants.any_contention();
            if self.sequencer.bump_if_all_timeless(|r| is_timeless(agents, r), contended) {
                trace!(patch = %self.addr, from = %day, to = %self.sequencer.now(), "idle day bumped");
            }
        }
        self.clock = ClockPhase::Notify { before: day };
        let now = self.sequencer.now();
        self.sequencer.enqueue(Runnable::Clock, now.next())
    }

    fn dispatch(&mut self, key: AgentKey, day: Day, dispatched: &mut u64) -> KernelResult<()> {
        let mut spawned: Vec<(A, Day)> = Vec::new();

        // Explicit field borrows so the borrow checker sees disjoint access.
        let addr         = self.addr;
        let limit        = self.max_dispatch;
        let sequencer    = &mut self.sequencer;
        let interactants = &mut self.interactants;
        let rng          = &mut self.rng;
        let outbox       = &mut self.outbox;
        let record       = self.agents.get_mut(&key).ok_or(KernelError::UnknownAgent(key))?;

        let resumed = loop {
            *dispatched += 1;
            if *dispatched > limit {
                return Err(KernelError::SafetyLimit(format!(
                    "patch {addr} dispatched {limit} times in one slice (last agent {:?})",
                    record.name
                )));
            }

            let yielded = {
                let mut ctx = AgentCtx {
                    now:          day,
                    key,
                    name:         &record.name,
                    owner:        record.owner,
                    interactants: &mut *interactants,
                    rng:          &mut *rng,
                    spawned:      &mut spawned,
                    outbox:       &mut *outbox,
                };
                record.body.run(&mut ctx)
            };

            match yielded {
                Yield::Sleep(n) => {
                    sequencer.enqueue(Runnable::Agent(key), day + n)?;
                    break Resumed::Suspended;
                }
                Yield::Lock(id) => match interactants.lock(id, key, record.timeless)? {
                    LockOutcome::Granted => continue,
                    LockOutcome::Queued  => break Resumed::Suspended,
                },
                Yield::Unlock(id) => match interactants.unlock(id, key)? {
                    UnlockOutcome::Released => continue,
                    UnlockOutcome::HandedOff(next) => {
                        trace!(patch = %addr, from = %key, to = %next, "lock handed off");
                        sequencer.enqueue(Runnable::Agent(next), day)?;
                        sequencer.enqueue(Runnable::Agent(key), day)?;
                        break Resumed::Suspended;
                    }
                },
                Yield::Done => break Resumed::Finished,
            }
        };

        if let Resumed::Finished = resumed {
            let held = self.release_locks(key)?;
            if !held.is_empty() {
                warn!(patch = %self.addr, agent = %key, held = ?held, "agent finished while holding locks; released");
            }
            self.agents.remove(&key);
        }

        for (body, at) in spawned {
            self.spawn(body, at)?;
        }
        Ok(())
    }
}

fn is_timeless<A>(agents: &HashMap<AgentKey, AgentRecord<A>>, r: &Runnable) -> bool {
    match r {
        Runnable::Clock | Runnable::Gates => true,
        Runnable::Agent(key) => agents.get(key).is_none_or(|a| a.timeless),
    }
}
