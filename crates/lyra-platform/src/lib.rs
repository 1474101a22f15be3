//! Platform capabilities injected into lyra components.
//!
//! Nothing in the player reads wall-clock time or global state directly.
//! Components receive a [`Clock`] at construction; production code uses
//! [`SystemClock`], tests use [`ManualClock`] and advance it explicitly.
//!
//! # Synchronization
//!
//! Re-exports [`parking_lot`] lock types so downstream crates share one
//! implementation.
//!
//! # Conditional trait bounds
//!
//! [`MaybeSend`] and [`MaybeSync`] equal `Send`/`Sync` on native targets and
//! are blanket-implemented on wasm32.

#![forbid(unsafe_code)]

mod clock;
mod maybe_send;
pub mod time;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use maybe_send::{MaybeSend, MaybeSync};
pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use web_time::Instant;
