//! `ps-core` — foundational types for the `patchsim` kernel.
//!
//! This crate is a dependency of every other `ps-*` crate.  It has no `ps-*`
//! dependencies and minimal external ones (only `rand` and `thiserror`, plus
//! optional `serde`).
//!
//! # What lives here
//!
//! | Module      | Contents                                                   |
//! |-------------|------------------------------------------------------------|
//! | [`ids`]     | `Rank`, `AgentKey`, `InteractantId`, `GateId`, `LocalId`, `GblAddr` |
//! | [`time`]    | `Day`                                                      |
//! | [`vclock`]  | `VectorClock`                                              |
//! | [`rng`]     | `SimRng` (per patch)                                       |
//! | [`config`]  | `KernelConfig`                                             |
//! | [`error`]   | `KernelError`, `KernelResult`, `ExhaustedResource`         |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                     |
//! |---------|------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public types.        |
//!           | Required by `ps-net`.                                      |

pub mod config;
pub mod error;
pub mod ids;
pub mod rng;
pub mod time;
pub mod vclock;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::KernelConfig;
pub use error::{ExhaustedResource, KernelError, KernelResult};
pub use ids::{AgentKey, GateId, GblAddr, InteractantId, LocalId, Rank};
pub use rng::SimRng;
pub use time::Day;
pub use vclock::VectorClock;
