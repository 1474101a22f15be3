use crate::{AbrEvent, HlsEvent};

/// Unified observer event.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    /// Playlist, fragment and buffer lifecycle.
    Hls(HlsEvent),
    /// Bandwidth estimation and level decisions.
    Abr(AbrEvent),
}

impl From<HlsEvent> for Event {
    fn from(e: HlsEvent) -> Self {
        Self::Hls(e)
    }
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}
