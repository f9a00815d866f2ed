//! Interactants — lockable shared resources with a FIFO wait queue.
//!
//! # Locking discipline
//!
//! An interactant has at most one holder.  `lock` on a free interactant (or
//! one the caller already holds) is granted on the spot.  Otherwise the
//! caller joins the back of the wait queue and stays suspended until an
//! `unlock` hands ownership to it.  `unlock` by the holder either frees the
//! resource (empty queue) or passes it to the head of the queue.
//!
//! Invariant: `holder` is `None` only while the queue is empty.
//!
//! Every interactant lives in its patch's [`InteractantTable`], which also
//! serves as the census of live resources for diagnostics.
//!
//! # Payload
//!
//! Domain code can hang any `Send` value off an interactant (a bed table, a
//! ward roster).  It is stored type-erased and read back by downcast, the
//! same way application components are stored per type.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use ps_core::{AgentKey, ExhaustedResource, GateId, InteractantId, KernelError, KernelResult};

// ── Holder ────────────────────────────────────────────────────────────────────

/// Who currently owns an interactant.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Holder {
    /// A scheduled agent.
    Agent { key: AgentKey, timeless: bool },
    /// A gate entrance is permanently held by its gate; agents that lock it
    /// wait in its queue until the gate ships them.
    Gate(GateId),
}

impl Holder {
    pub fn is_timeless(self) -> bool {
        match self {
            Holder::Agent { timeless, .. } => timeless,
            Holder::Gate(_)                => true,
        }
    }

    pub fn agent(self) -> Option<AgentKey> {
        match self {
            Holder::Agent { key, .. } => Some(key),
            Holder::Gate(_)           => None,
        }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::Agent { key, .. } => write!(f, "{key}"),
            Holder::Gate(g)           => write!(f, "gate {g}"),
        }
    }
}

/// What `lock` did.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LockOutcome {
    /// Ownership granted without suspending.
    Granted,
    /// Caller appended to the wait queue; it must suspend.
    Queued,
}

/// What `unlock` did.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnlockOutcome {
    /// Resource is now free; the caller continues.
    Released,
    /// Ownership passed to this waiter.  Both parties must be rescheduled.
    HandedOff(AgentKey),
}

#[derive(Copy, Clone, Debug)]
struct Waiter {
    key:      AgentKey,
    timeless: bool,
}

// ── Interactant ───────────────────────────────────────────────────────────────

pub struct Interactant {
    id:        InteractantId,
    name:      String,
    holder:    Option<Holder>,
    queue:     VecDeque<Waiter>,
    /// Waiters that are not timeless.
    n_waiting: usize,
    payload:   Option<Box<dyn Any + Send>>,
}

impl Interactant {
    pub fn id(&self) -> InteractantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> Option<Holder> {
        self.holder
    }

    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    /// Count of non-timeless waiters.  Non-zero means real contention, as
    /// opposed to infrastructure idling in the queue.
    pub fn n_waiting(&self) -> usize {
        self.n_waiting
    }

    /// Count of all waiters, timeless included.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Waiting agents, head of the queue first.
    pub fn waiters(&self) -> impl Iterator<Item = AgentKey> + '_ {
        self.queue.iter().map(|w| w.key)
    }

    /// Domain payload, if one of type `T` is attached.
    pub fn payload<T: Any + Send>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    pub fn payload_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.payload.as_mut()?.downcast_mut::<T>()
    }

    fn lock(&mut self, key: AgentKey, timeless: bool) -> LockOutcome {
        match self.holder {
            None => {
                self.holder = Some(Holder::Agent { key, timeless });
                LockOutcome::Granted
            }
            Some(Holder::Agent { key: held, .. }) if held == key => LockOutcome::Granted,
            Some(_) => {
                self.queue.push_back(Waiter { key, timeless });
                if !timeless {
                    self.n_waiting += 1;
                }
                LockOutcome::Queued
            }
        }
    }

    fn unlock(&mut self, key: AgentKey) -> KernelResult<UnlockOutcome> {
        match self.holder {
            Some(Holder::Agent { key: held, .. }) if held == key => {}
            other => {
                return Err(KernelError::LockOwnershipViolation {
                    resource: self.name.clone(),
                    agent:    key,
                    holder:   other.map_or_else(|| "nobody".to_owned(), |h| h.to_string()),
                });
            }
        }
        match self.queue.pop_front() {
            None => {
                self.holder = None;
                Ok(UnlockOutcome::Released)
            }
            Some(next) => {
                if !next.timeless {
                    self.n_waiting -= 1;
                }
                self.holder = Some(Holder::Agent { key: next.key, timeless: next.timeless });
                Ok(UnlockOutcome::HandedOff(next.key))
            }
        }
    }
}

// ── Census ────────────────────────────────────────────────────────────────────

/// One line of [`InteractantTable::census`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CensusEntry {
    pub id:        InteractantId,
    pub name:      String,
    pub holder:    Option<Holder>,
    pub n_waiting: usize,
    pub queued:    usize,
}

// ── InteractantTable ──────────────────────────────────────────────────────────

/// All interactants of one patch, indexed by [`InteractantId`].
#[derive(Default)]
pub struct InteractantTable {
    items: Vec<Interactant>,
}

impl InteractantTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: String, holder: Option<Holder>, payload: Option<Box<dyn Any + Send>>) -> InteractantId {
        let id = InteractantId(self.items.len() as u32);
        self.items.push(Interactant {
            id,
            name,
            holder,
            queue: VecDeque::new(),
            n_waiting: 0,
            payload,
        });
        id
    }

    /// Register a plain lockable resource.
    pub fn add(&mut self, name: impl Into<String>) -> InteractantId {
        self.push(name.into(), None, None)
    }

    /// Register a resource carrying a domain payload.
    pub fn add_with_payload<T: Any + Send>(&mut self, name: impl Into<String>, payload: T) -> InteractantId {
        self.push(name.into(), None, Some(Box::new(payload)))
    }

    /// Register the lockable side of a gate entrance, held by `gate` for its
    /// whole life.
    pub fn add_gate_entrance(&mut self, name: impl Into<String>, gate: GateId) -> InteractantId {
        self.push(name.into(), Some(Holder::Gate(gate)), None)
    }

    pub fn get(&self, id: InteractantId) -> KernelResult<&Interactant> {
        self.items.get(id.index()).ok_or(KernelError::UnknownInteractant(id))
    }

    pub fn get_mut(&mut self, id: InteractantId) -> KernelResult<&mut Interactant> {
        self.items.get_mut(id.index()).ok_or(KernelError::UnknownInteractant(id))
    }

    pub fn lock(&mut self, id: InteractantId, key: AgentKey, timeless: bool) -> KernelResult<LockOutcome> {
        Ok(self.get_mut(id)?.lock(key, timeless))
    }

    /// Release `id`.  Fails with `LockOwnershipViolation` unless `key` holds it.
    pub fn unlock(&mut self, id: InteractantId, key: AgentKey) -> KernelResult<UnlockOutcome> {
        self.get_mut(id)?.unlock(key)
    }

    /// Empty the wait queue of `id`, returning the waiters in FIFO order.
    /// The holder is left untouched; used by gate entrances each cycle.
    pub fn drain_waiters(&mut self, id: InteractantId) -> KernelResult<Vec<AgentKey>> {
        let item = self.get_mut(id)?;
        item.n_waiting = 0;
        Ok(item.queue.drain(..).map(|w| w.key).collect())
    }

    pub fn n_waiting(&self, id: InteractantId) -> KernelResult<usize> {
        Ok(self.get(id)?.n_waiting)
    }

    /// `true` if any interactant has non-timeless waiters.
    pub fn any_contention(&self) -> bool {
        self.items.iter().any(|i| i.n_waiting > 0)
    }

    /// `true` if a timeless holder is keeping non-timeless agents waiting.
    pub fn timeless_contention(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.n_waiting > 0 && i.holder.is_some_and(Holder::is_timeless))
    }

    /// Interactants currently held by `key`.
    pub fn held_by(&self, key: AgentKey) -> Vec<InteractantId> {
        self.items
            .iter()
            .filter(|i| i.holder.and_then(Holder::agent) == Some(key))
            .map(|i| i.id)
            .collect()
    }

    /// First candidate that is free with nobody queued.
    pub fn first_free(&self, candidates: &[InteractantId]) -> Result<InteractantId, ExhaustedResource> {
        candidates
            .iter()
            .copied()
            .find(|&id| self.get(id).is_ok_and(|i| i.is_free() && i.queue.is_empty()))
            .ok_or(ExhaustedResource { searched: candidates.len() })
    }

    /// Snapshot of every interactant's lock state.
    pub fn census(&self) -> Vec<CensusEntry> {
        self.items
            .iter()
            .map(|i| CensusEntry {
                id:        i.id,
                name:      i.name.clone(),
                holder:    i.holder,
                n_waiting: i.n_waiting,
                queued:    i.queue.len(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interactant> + '_ {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
