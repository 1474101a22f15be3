#![forbid(unsafe_code)]

//! Observer event bus for the lyra HLS client.
//!
//! The player dispatches its internal events synchronously; every dispatched
//! event is also mirrored here in a compact, cloneable form so applications
//! can watch playback from other tasks.

mod abr;
mod bus;
mod event;
mod hls;

pub use abr::AbrEvent;
pub use bus::EventBus;
pub use event::Event;
pub use hls::{HlsEvent, LevelType, StreamType};
