//! The `Agent` trait — the main extension point for domain code.
//!
//! Agents are explicit state machines.  The main loop calls
//! [`Agent::run`] at the agent's resumption point; the agent does as much
//! work as it can and hands back a [`Yield`] naming the one thing it is
//! waiting on.  Where an agent left off is the agent's own state (usually an
//! enum field), not a call stack.
//!
//! # Suspension points
//!
//! | Yield          | Suspends when                                   |
//! |----------------|-------------------------------------------------|
//! | `Sleep(n)`     | always; resumes on `now + n`                    |
//! | `Lock(id)`     | the interactant is held by someone else         |
//! | `Unlock(id)`   | a waiter is handed ownership; both resume today |
//! | `Done`         | never resumes; the agent is dropped             |
//!
//! A lock that is granted on the spot, or an unlock with nobody waiting,
//! re-enters `run` immediately within the same dispatch.

use std::any::Any;

use ps_core::{AgentKey, Day, ExhaustedResource, GblAddr, InteractantId, SimRng};

use crate::interactant::{Holder, Interactant, InteractantTable};

// ── Yield ─────────────────────────────────────────────────────────────────────

/// What an agent wants to wait on when it returns from [`Agent::run`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Yield {
    /// Resume `n` days from now.  `Sleep(0)` goes to the back of today's list.
    Sleep(u64),
    /// Acquire the interactant; resume once it is ours.
    Lock(InteractantId),
    /// Release the interactant.
    Unlock(InteractantId),
    /// The run behavior has returned; drop the agent.
    Done,
}

// ── Agent ─────────────────────────────────────────────────────────────────────

/// A cooperatively scheduled unit of domain logic.
///
/// Implement this on one type per simulation (an enum of agent kinds is the
/// usual shape).  To let agents move between ranks the type must also be
/// serde-serializable; see `ps-sim`.
///
/// # Example
///
/// ```rust,ignore
/// enum Phase { Arrive, Treat, Leave }
///
/// struct Patient { name: String, ward: InteractantId, phase: Phase }
///
/// impl Agent for Patient {
///     type Message = ();
///     fn name(&self) -> &str { &self.name }
///     fn run(&mut self, _ctx: &mut AgentCtx<'_, Self>) -> Yield {
///         match self.phase {
///             Phase::Arrive => { self.phase = Phase::Treat; Yield::Lock(self.ward) }
///             Phase::Treat  => { self.phase = Phase::Leave; Yield::Sleep(3) }
///             Phase::Leave  => Yield::Unlock(self.ward),
///         }
///     }
/// }
/// ```
pub trait Agent: Send + Sized + 'static {
    /// Domain message type this agent can send through [`AgentCtx::send`].
    /// Use `()` if the model has none.
    type Message: Send + 'static;

    /// Diagnostic identity.
    fn name(&self) -> &str;

    /// Infrastructure agents are timeless: they are ignored when deciding
    /// whether a patch still has work for today.
    fn timeless(&self) -> bool {
        false
    }

    /// Resume the agent.  Must return quickly with the next suspension point.
    fn run(&mut self, ctx: &mut AgentCtx<'_, Self>) -> Yield;

    /// Called after the agent has crossed a gate and been adopted by the
    /// patch at `to`.
    fn on_rehome(&mut self, _from: GblAddr, _to: GblAddr) {}
}

// ── AgentRecord ───────────────────────────────────────────────────────────────

/// An agent together with the kernel-owned fields that travel with it.
///
/// Crossing a gate rewrites `owner` and nothing else.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AgentRecord<A> {
    pub name:     String,
    pub timeless: bool,
    /// Owning patch; where control returns when the agent finishes.
    pub owner:    GblAddr,
    pub body:     A,
}

impl<A: Agent> AgentRecord<A> {
    pub fn new(body: A, owner: GblAddr) -> Self {
        Self {
            name:     body.name().to_owned(),
            timeless: body.timeless(),
            owner,
            body,
        }
    }

    /// Adopt this agent into the patch at `to`.
    pub fn rehome(&mut self, to: GblAddr) {
        let from = self.owner;
        self.owner = to;
        self.body.on_rehome(from, to);
    }
}

/// A domain message an agent asked to send.
#[derive(Clone, Debug, PartialEq)]
pub struct Outgoing<M> {
    pub src:  GblAddr,
    pub dest: GblAddr,
    pub msg:  M,
}

// ── AgentCtx ──────────────────────────────────────────────────────────────────

/// Everything an agent may touch while it runs.
///
/// Built by the main loop for a single dispatch and dropped before the next
/// agent runs, so no agent can observe another mid-step.
pub struct AgentCtx<'a, A: Agent> {
    pub(crate) now:          Day,
    pub(crate) key:          AgentKey,
    pub(crate) name:         &'a str,
    pub(crate) owner:        GblAddr,
    pub(crate) interactants: &'a mut InteractantTable,
    pub(crate) rng:          &'a mut SimRng,
    pub(crate) spawned:      &'a mut Vec<(A, Day)>,
    pub(crate) outbox:       &'a mut Vec<Outgoing<A::Message>>,
}

impl<'a, A: Agent> AgentCtx<'a, A> {
    /// The simulation day at which the agent resumed.
    #[inline]
    pub fn now(&self) -> Day {
        self.now
    }

    #[inline]
    pub fn key(&self) -> AgentKey {
        self.key
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Address of the patch currently owning this agent.
    pub fn owner(&self) -> GblAddr {
        self.owner
    }

    pub fn rng(&mut self) -> &mut SimRng {
        &mut *self.rng
    }

    pub fn interactant(&self, id: InteractantId) -> Option<&Interactant> {
        self.interactants.get(id).ok()
    }

    pub fn interactants(&self) -> &InteractantTable {
        &*self.interactants
    }

    /// Non-timeless waiters on `id`; zero for unknown ids.
    pub fn n_waiting(&self, id: InteractantId) -> usize {
        self.interactants.n_waiting(id).unwrap_or(0)
    }

    /// `true` if this agent currently holds `id`.
    pub fn holds(&self, id: InteractantId) -> bool {
        self.interactant(id)
            .and_then(Interactant::holder)
            .and_then(Holder::agent)
            == Some(self.key)
    }

    /// Read an interactant's domain payload.
    pub fn payload<T: Any + Send>(&self, id: InteractantId) -> Option<&T> {
        self.interactant(id)?.payload::<T>()
    }

    /// Mutate an interactant's domain payload.  Only the holder may; returns
    /// `None` otherwise.
    pub fn payload_mut<T: Any + Send>(&mut self, id: InteractantId) -> Option<&mut T> {
        if !self.holds(id) {
            return None;
        }
        self.interactants.get_mut(id).ok()?.payload_mut::<T>()
    }

    /// Resource search: first free, unqueued candidate.
    pub fn first_free(&self, candidates: &[InteractantId]) -> Result<InteractantId, ExhaustedResource> {
        self.interactants.first_free(candidates)
    }

    /// Start a new agent in this patch on day `at`.  Scheduled after the
    /// current agent yields; an `at` in the past is a fatal
    /// `TemporalViolation` at that point.
    pub fn spawn(&mut self, agent: A, at: Day) {
        self.spawned.push((agent, at));
    }

    /// Queue a domain message for delivery at the next network cycle.
    pub fn send(&mut self, dest: GblAddr, msg: A::Message) {
        self.outbox.push(Outgoing { src: self.owner, dest, msg });
    }
}
