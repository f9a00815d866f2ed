//! `ps-net` — cross-rank transport for the `patchsim` kernel.
//!
//! # Crate layout
//!
//! | Module        | Contents                                                    |
//! |---------------|-------------------------------------------------------------|
//! | [`transport`] | `Transport` trait, `Frame`, `ChunkTag`, `ChannelTransport`  |
//! | [`wire`]      | `MsgKind`, `WireItem`, `Chunk`, `ChunkTail`, `DoneSignal`   |
//! | [`interface`] | `NetworkInterface`, `NetStats`, `RouteKey`                  |
//! | [`error`]     | `NetError`, `NetResult<T>`                                  |
//!
//! One `NetworkInterface` exists per process.  It is generic over the item
//! body `B` (anything serde can encode) and the route `R` a receiver
//! registers for each (source, destination) pair, so it knows nothing about
//! agents or gates.

pub mod error;
pub mod interface;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod tests;

pub use error::{NetError, NetResult};
pub use interface::{NetStats, NetworkInterface, RouteKey};
pub use transport::{ChannelTransport, ChunkTag, Frame, SendRequest, Transport};
pub use wire::{Chunk, ChunkTail, DoneSignal, MsgKind, WireItem};
