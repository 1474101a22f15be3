//! Request-id based loading.
//!
//! The player never performs I/O itself. Components ask the hub to issue a
//! [`LoadRequest`]; the host executes it (see [`crate::Driver`]) and feeds
//! progress and the final [`LoadOutcome`] back by request id. Ids that were
//! aborted in the meantime are ignored.

mod fragment;
mod key;
mod playlist;

use bytes::Bytes;
use lyra_platform::{Instant, MaybeSend};
use url::Url;

pub use self::{fragment::FragmentLoader, key::KeyLoader, playlist::PlaylistLoader};
use crate::{config::LoadPolicy, model::ByteRange};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Expected body type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Text,
    Binary,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadRequest {
    pub id: RequestId,
    pub url: Url,
    pub kind: ResponseKind,
    pub byte_range: Option<ByteRange>,
    pub policy: LoadPolicy,
}

/// Timing and size of one load.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadStats {
    pub trequest: Instant,
    /// First byte received.
    pub tfirst: Option<Instant>,
    /// Body complete.
    pub tload: Option<Instant>,
    pub tparsed: Option<Instant>,
    pub tbuffered: Option<Instant>,
    pub loaded: u64,
    pub total: Option<u64>,
    pub retry: u32,
    pub aborted: bool,
    /// Transport-measured bandwidth in bits per second.
    pub bw: Option<f64>,
}

impl LoadStats {
    pub fn new(trequest: Instant) -> Self {
        Self {
            trequest,
            tfirst: None,
            tload: None,
            tparsed: None,
            tbuffered: None,
            loaded: 0,
            total: None,
            retry: 0,
            aborted: false,
            bw: None,
        }
    }

    /// Completed load of `loaded` bytes.
    pub fn completed(trequest: Instant, tload: Instant, loaded: u64) -> Self {
        Self {
            tfirst: Some(trequest),
            tload: Some(tload),
            loaded,
            total: Some(loaded),
            ..Self::new(trequest)
        }
    }
}

/// Final result of a request.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Success { data: Bytes, stats: LoadStats },
    /// Transport or HTTP failure, `code` is the HTTP status when known.
    Error { code: Option<u16>, text: String },
    Timeout { stats: LoadStats },
}

/// Host-provided transport.
pub trait Loader: MaybeSend {
    fn load(&mut self, request: LoadRequest);

    fn abort(&mut self, id: RequestId);
}

/// What a playlist request is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaylistContextKind {
    Manifest,
    Level,
    AudioTrack,
    SubtitleTrack,
}

/// Playlist request description carried by load events and errors.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaylistContext {
    pub kind: PlaylistContextKind,
    pub url: Url,
    /// Level index for level requests.
    pub level: Option<usize>,
    /// Track id for audio/subtitle requests.
    pub id: Option<usize>,
    pub url_id: usize,
}
