//! Gates — directed edges along which agents leave one patch for another.
//!
//! A gate is a pair of objects living in two different patches:
//!
//! ```text
//!   patch S                                        patch D
//!   agent ──lock──▶ GateEntrance ══ batch ══▶ GateExit ──adopt──▶ sequencer
//!                   (S.child(k))               (D.child(k))
//! ```
//!
//! The entrance is an interactant that its gate holds forever, so an agent
//! that locks it simply joins the wait queue.  Once per day the patch's
//! `GateAgent` flushes every entrance queue into a [`GateBatch`] stamped with
//! the sending day.  The exit re-homes each arriving agent and schedules it
//! no earlier than the receiving patch's current day.

use ps_core::{Day, GateId, GblAddr, InteractantId, KernelResult};
use ps_sched::{Agent, MainLoop};
use tracing::{debug, trace, warn};

use crate::payload::GateBatch;

// ── Entrance ──────────────────────────────────────────────────────────────────

/// Outgoing side of a gate.
#[derive(Clone, Debug)]
pub struct GateEntrance {
    pub id:          GateId,
    /// Agents lock this to leave.
    pub interactant: InteractantId,
    pub addr:        GblAddr,
    /// Address of the matching [`GateExit`].
    pub dest:        GblAddr,
    pub shipped:     u64,
}

/// One flushed entrance queue, ready for the network.
pub struct Departure<A> {
    pub src:   GblAddr,
    pub dest:  GblAddr,
    pub batch: GateBatch<A>,
}

impl GateEntrance {
    fn cycle_start<A: Agent>(&mut self, ml: &mut MainLoop<A>) -> KernelResult<Departure<A>> {
        let keys = ml.interactants_mut().drain_waiters(self.interactant)?;
        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            let held = ml.release_locks(key)?;
            if !held.is_empty() {
                warn!(gate = %self.addr, agent = %key, held = ?held, "agent left its patch holding locks; released");
            }
            agents.push(ml.remove_agent(key)?);
        }
        self.shipped += agents.len() as u64;
        Ok(Departure {
            src:   self.addr,
            dest:  self.dest,
            batch: GateBatch { sender_day: ml.now(), agents },
        })
    }
}

// ── Exit ──────────────────────────────────────────────────────────────────────

/// Incoming side of a gate.
#[derive(Clone, Debug)]
pub struct GateExit {
    pub id:              GateId,
    pub addr:            GblAddr,
    /// Address of the matching [`GateEntrance`].
    pub src:             GblAddr,
    /// Latest day any batch from `src` was stamped with.
    pub last_sender_day: Option<Day>,
    pub arrivals:        u64,
    /// Non-empty batches stamped earlier than the local day on arrival.
    pub clamped:         u64,
}

impl GateExit {
    /// Adopt every agent in `batch` into `ml`, scheduled on
    /// `max(sender_day, now)`.  Returns how many arrived.
    pub(crate) fn handle_incoming<A: Agent>(&mut self, ml: &mut MainLoop<A>, batch: GateBatch<A>) -> KernelResult<usize> {
        let GateBatch { sender_day, agents } = batch;
        self.last_sender_day = Some(self.last_sender_day.map_or(sender_day, |d| d.max(sender_day)));

        let now = ml.now();
        let at = sender_day.max(now);
        if sender_day < now && !agents.is_empty() {
            self.clamped += 1;
            debug!(gate = %self.addr, sent = %sender_day, now = %now, n = agents.len(), "batch from the past clamped forward");
        }

        let n = agents.len();
        let home = ml.addr();
        for mut record in agents {
            record.rehome(home);
            ml.adopt(record, at)?;
        }
        self.arrivals += n as u64;
        Ok(n)
    }
}

// ── GateAgent ─────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GatePhase {
    /// Next turn flushes entrances and re-arms exits.
    Start,
    /// Next turn closes the day and sleeps until tomorrow.
    Finish,
}

/// Routing request an exit re-registers every cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Expectation {
    pub src:  GblAddr,
    pub dest: GblAddr,
    /// Index of the exit within its patch.
    pub exit: usize,
}

/// Everything one `Start` turn produced for the patch group.
pub struct GateOutput<A> {
    pub departures: Vec<Departure<A>>,
    pub expects:    Vec<Expectation>,
}

impl<A> Default for GateOutput<A> {
    fn default() -> Self {
        Self { departures: Vec::new(), expects: Vec::new() }
    }
}

/// The timeless driver of one patch's gates.
pub struct GateAgent {
    phase:     GatePhase,
    entrances: Vec<GateEntrance>,
    exits:     Vec<GateExit>,
}

impl Default for GateAgent {
    fn default() -> Self {
        Self { phase: GatePhase::Start, entrances: Vec::new(), exits: Vec::new() }
    }
}

impl GateAgent {
    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn entrances(&self) -> &[GateEntrance] {
        &self.entrances
    }

    pub fn exits(&self) -> &[GateExit] {
        &self.exits
    }

    pub(crate) fn exit_mut(&mut self, i: usize) -> Option<&mut GateExit> {
        self.exits.get_mut(i)
    }

    pub(crate) fn push_entrance(&mut self, e: GateEntrance) {
        self.entrances.push(e);
    }

    pub(crate) fn push_exit(&mut self, x: GateExit) -> usize {
        self.exits.push(x);
        self.exits.len() - 1
    }

    /// Least-advanced neighbor: the smallest latest day heard on any exit.
    /// `None` until every exit has heard at least once.
    pub fn least_advanced_neighbor(&self) -> Option<Day> {
        self.exits.iter().map(|x| x.last_sender_day).min().flatten()
    }

    /// Run one gate turn on `day`.  Returns `true` after a `Start` turn,
    /// when the patch should hand control back to its group.
    pub(crate) fn turn<A: Agent>(&mut self, ml: &mut MainLoop<A>, day: Day, out: &mut GateOutput<A>) -> KernelResult<bool> {
        match self.phase {
            GatePhase::Start => {
                for e in &mut self.entrances {
                    out.departures.push(e.cycle_start(ml)?);
                }
                for (exit, x) in self.exits.iter().enumerate() {
                    out.expects.push(Expectation { src: x.src, dest: x.addr, exit });
                }
                self.phase = GatePhase::Finish;
                ml.schedule_gates(day)?;
                Ok(true)
            }
            GatePhase::Finish => {
                trace!(patch = %ml.addr(), day = %day, "gates closed for the day");
                self.phase = GatePhase::Start;
                ml.schedule_gates(day.next())?;
                Ok(false)
            }
        }
    }
}
