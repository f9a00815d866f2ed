//! `ps-sim` — patches, gates, and the per-process `PatchGroup` driver.
//!
//! # Crate layout
//!
//! | Module       | Contents                                                     |
//! |--------------|--------------------------------------------------------------|
//! | [`payload`]  | `Migrant` bound, `GateBatch`, `Payload` (wire body enum)     |
//! | [`gate`]     | `GateEntrance`, `GateExit`, `GateAgent`, `GatePhase`         |
//! | [`patch`]    | `Patch`, `SliceEnd`, `PatchStatus`                           |
//! | [`group`]    | `PatchGroup`, `CycleSummary`, `RunSummary`, `MessageHandler` |
//! | [`builder`]  | `PatchGroupBuilder`, `GateHandle`                            |
//! | [`observer`] | `GroupObserver` trait, `NoopObserver`                        |
//! | [`error`]    | `SimError`, `SimResult<T>`                                   |
//!
//! # Quick-start
//!
//! ```rust,ignore
//! use ps_core::{Day, KernelConfig};
//! use ps_net::ChannelTransport;
//! use ps_sim::{NoopObserver, PatchGroupBuilder};
//!
//! let transport = ChannelTransport::mesh(1).remove(0);
//! let mut b = PatchGroupBuilder::new(KernelConfig::default(), transport);
//! let ward = b.add_patch(0, "ward")?;
//! b.add_agent(ward, Patient::default(), Day(0))?;
//! let summary = b.build()?.run(&mut NoopObserver)?;
//! ```

pub mod builder;
pub mod error;
pub mod gate;
pub mod group;
pub mod observer;
pub mod patch;
pub mod payload;


pub use builder::{GateHandle, PatchGroupBuilder};
pub use error::{SimError, SimResult};
pub use gate::{GateAgent, GateEntrance, GateExit, GatePhase};
pub use group::{CycleSummary, GroupStats, MessageHandler, PatchGroup, RunSummary};
pub use observer::{GroupObserver, NoopObserver};
pub use patch::{Patch, PatchStatus, SliceEnd};
pub use payload::{GateBatch, Migrant, Payload};
