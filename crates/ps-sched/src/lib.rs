//! `ps-sched` — cooperative scheduling inside one patch.
//!
//! # Crate layout
//!
//! | Module          | Contents                                                 |
//! |-----------------|----------------------------------------------------------|
//! | [`agent`]       | `Agent` trait, `Yield`, `AgentCtx`, `AgentRecord`, `Outgoing` |
//! | [`interactant`] | `Interactant`, `InteractantTable`, `Holder`, lock outcomes, census |
//! | [`sequencer`]   | `Sequencer<T>` (`BTreeMap<Day, VecDeque<T>>`), `TimeRange` |
//! | [`main_loop`]   | `MainLoop`, `Runnable`, `Slice`, tick callbacks          |
//!
//! # Dispatch model (summary)
//!
//! A patch's `MainLoop` pops `(runnable, day)` pairs from its `Sequencer` and
//! runs one agent at a time until it yields.  The only suspension points are
//! `Yield::Sleep`, a contended `Yield::Lock`, an `Yield::Unlock` that hands
//! the resource to a waiter, and `Yield::Done`.
//!
//! Two infrastructure runnables share the queue with domain agents:
//!
//! ```text
//! Clock   every day: fire tick callbacks, skip idle days unless frozen
//! Gates   hands control back to the owning patch (see ps-sim)
//! ```

pub mod agent;
pub mod interactant;
pub mod main_loop;
pub mod sequencer;

#[cfg(test)]
mod tests;

pub use agent::{Agent, AgentCtx, AgentRecord, Outgoing, Yield};
pub use interactant::{CensusEntry, Holder, Interactant, InteractantTable, LockOutcome, UnlockOutcome};
pub use main_loop::{MainLoop, Runnable, Slice, TickCallback, TickInfo};
pub use sequencer::{Sequencer, TimeRange};
