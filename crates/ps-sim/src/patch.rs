//! `Patch` — one partition: a main loop, its gates, and its resources.

use std::any::Any;

use ps_core::{AgentKey, Day, GateId, GblAddr, InteractantId, KernelConfig, KernelError, KernelResult, SimRng};
use ps_sched::{Agent, InteractantTable, MainLoop, Slice, TickCallback};

use crate::gate::{GateAgent, GateEntrance, GateExit, GateOutput};
use crate::payload::GateBatch;

/// How a call to [`Patch::run_slice`] ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SliceEnd {
    /// The gate agent flushed its entrances on this day.
    Flushed(Day),
    /// Nothing is left to run on or before the last simulated day.
    Finished,
}

/// Point-in-time view of a patch for observers and summaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchStatus {
    pub addr:       GblAddr,
    pub now:        Day,
    pub agents:     usize,
    pub frozen:     bool,
    pub finished:   bool,
    pub done_today: bool,
}

pub struct Patch<A: Agent> {
    addr:      GblAddr,
    name:      String,
    main_loop: MainLoop<A>,
    gates:     GateAgent,
    last_day:  Day,
    output:    GateOutput<A>,
}

impl<A: Agent> Patch<A> {
    /// A patch at `addr` whose clock and gate agent start on `start`.
    pub fn new(addr: GblAddr, name: impl Into<String>, start: Day, config: &KernelConfig) -> KernelResult<Self> {
        let rng = SimRng::for_patch(config.seed, addr);
        let mut main_loop = MainLoop::new(addr, start, rng, config.max_dispatch_per_slice);
        main_loop.schedule_gates(start)?;
        Ok(Self {
            addr,
            name: name.into(),
            main_loop,
            gates: GateAgent::default(),
            last_day: config.last_day,
            output: GateOutput::default(),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn addr(&self) -> GblAddr {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now(&self) -> Day {
        self.main_loop.now()
    }

    pub fn main_loop(&self) -> &MainLoop<A> {
        &self.main_loop
    }

    pub fn main_loop_mut(&mut self) -> &mut MainLoop<A> {
        &mut self.main_loop
    }

    pub fn interactants(&self) -> &InteractantTable {
        self.main_loop.interactants()
    }

    pub fn gates(&self) -> &GateAgent {
        &self.gates
    }

    /// `true` once nothing is queued on or before the last simulated day.
    pub fn is_finished(&self) -> bool {
        self.main_loop.sequencer().peek_day().is_none_or(|d| d > self.last_day)
    }

    pub fn status(&self) -> PatchStatus {
        PatchStatus {
            addr:       self.addr,
            now:        self.now(),
            agents:     self.main_loop.agent_count(),
            frozen:     self.main_loop.is_frozen(),
            finished:   self.is_finished(),
            done_today: self.main_loop.done_today(),
        }
    }

    // ── Setup ─────────────────────────────────────────────────────────────

    pub fn add_interactant(&mut self, name: impl Into<String>) -> InteractantId {
        self.main_loop.interactants_mut().add(name)
    }

    pub fn add_interactant_with_payload<T: Any + Send>(&mut self, name: impl Into<String>, payload: T) -> InteractantId {
        self.main_loop.interactants_mut().add_with_payload(name, payload)
    }

    /// Start a new agent here on day `at`.
    pub fn spawn(&mut self, body: A, at: Day) -> KernelResult<AgentKey> {
        self.main_loop.spawn(body, at)
    }

    pub fn add_tick_callback(&mut self, cb: TickCallback) {
        self.main_loop.add_tick_callback(cb);
    }

    pub(crate) fn add_entrance(&mut self, addr: GblAddr, dest: GblAddr) -> InteractantId {
        let id = GateId(self.gates.entrances().len() as u32);
        let interactant = self
            .main_loop
            .interactants_mut()
            .add_gate_entrance(format!("gate {addr} -> {dest}"), id);
        self.gates.push_entrance(GateEntrance { id, interactant, addr, dest, shipped: 0 });
        interactant
    }

    pub(crate) fn add_exit(&mut self, addr: GblAddr, src: GblAddr) -> usize {
        let id = GateId(self.gates.exits().len() as u32);
        self.gates.push_exit(GateExit {
            id,
            addr,
            src,
            last_sender_day: None,
            arrivals: 0,
            clamped: 0,
        })
    }

    // ── Running ───────────────────────────────────────────────────────────

    /// Dispatch until the gate agent flushes its entrances, or until nothing
    /// remains on or before the last day.
    pub fn run_slice(&mut self) -> KernelResult<SliceEnd> {
        loop {
            match self.main_loop.run_slice(self.last_day)? {
                Slice::GateTurn(day) => {
                    if self.gates.turn(&mut self.main_loop, day, &mut self.output)? {
                        return Ok(SliceEnd::Flushed(day));
                    }
                }
                Slice::Horizon | Slice::Exhausted => return Ok(SliceEnd::Finished),
            }
        }
    }

    /// Departures and exit registrations produced since the last call.
    pub(crate) fn take_output(&mut self) -> GateOutput<A> {
        std::mem::take(&mut self.output)
    }

    /// Deliver a batch that arrived on exit number `exit`.
    pub(crate) fn handle_incoming(&mut self, exit: usize, batch: GateBatch<A>) -> KernelResult<usize> {
        let addr = self.addr;
        let x = self
            .gates
            .exit_mut(exit)
            .ok_or_else(|| KernelError::protocol(format!("patch {addr} has no exit #{exit}")))?;
        x.handle_incoming(&mut self.main_loop, batch)
    }

    /// Freeze this patch while its earliest pending work lies beyond its
    /// least-advanced neighbor's day; unfreeze otherwise.  Returns whether
    /// the patch is now frozen.
    pub fn apply_freeze_rule(&mut self) -> bool {
        let freeze = match self.gates.least_advanced_neighbor() {
            None => false,
            Some(neighbor) => self
                .main_loop
                .time_range()
                .earliest_relevant
                .is_none_or(|d| d > neighbor),
        };
        if freeze {
            self.main_loop.freeze_time();
        } else {
            self.main_loop.unfreeze_time();
        }
        freeze
    }
}
