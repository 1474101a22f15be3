#![forbid(unsafe_code)]

use thiserror::Error;

use crate::{loader::PlaylistContext, model::FragmentKey};

/// Failures returned by lyra-hls functions and component handlers.
///
/// These are programming/integration level errors. Player-visible failures
/// travel as [`ErrorData`] inside the error event.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Network error: {0}")]
    Net(#[from] lyra_net::NetError),

    #[error("Playlist parsing error: {0}")]
    PlaylistParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Level out of range: {0}")]
    LevelOutOfRange(usize),

    #[error("Demux error: {0}")]
    Demux(String),

    #[error("Media sink error: {0}")]
    Sink(String),

    #[error("Cancelled")]
    Cancelled,
}

pub type HlsResult<T> = Result<T, HlsError>;

/// Error family reported to the player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Media,
    KeySystem,
    Mux,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "networkError",
            Self::Media => "mediaError",
            Self::KeySystem => "keySystemError",
            Self::Mux => "muxError",
            Self::Other => "otherError",
        }
    }
}

/// Precise error cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorDetails {
    ManifestLoadError,
    ManifestLoadTimeout,
    ManifestParsingError,
    ManifestIncompatibleCodecsError,
    LevelLoadError,
    LevelLoadTimeout,
    LevelSwitchError,
    AudioTrackLoadError,
    AudioTrackLoadTimeout,
    SubtitleTrackLoadError,
    SubtitleTrackLoadTimeout,
    FragLoadError,
    FragLoadTimeout,
    FragDecryptError,
    FragParsingError,
    RemuxAllocError,
    KeyLoadError,
    KeyLoadTimeout,
    BufferAddCodecError,
    BufferAppendError,
    BufferAppendingError,
    BufferStalledError,
    BufferFullError,
    BufferSeekOverHole,
    BufferNudgeOnStall,
    InternalException,
}

impl ErrorDetails {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManifestLoadError => "manifestLoadError",
            Self::ManifestLoadTimeout => "manifestLoadTimeOut",
            Self::ManifestParsingError => "manifestParsingError",
            Self::ManifestIncompatibleCodecsError => "manifestIncompatibleCodecsError",
            Self::LevelLoadError => "levelLoadError",
            Self::LevelLoadTimeout => "levelLoadTimeOut",
            Self::LevelSwitchError => "levelSwitchError",
            Self::AudioTrackLoadError => "audioTrackLoadError",
            Self::AudioTrackLoadTimeout => "audioTrackLoadTimeOut",
            Self::SubtitleTrackLoadError => "subtitleTrackLoadError",
            Self::SubtitleTrackLoadTimeout => "subtitleTrackLoadTimeOut",
            Self::FragLoadError => "fragLoadError",
            Self::FragLoadTimeout => "fragLoadTimeOut",
            Self::FragDecryptError => "fragDecryptError",
            Self::FragParsingError => "fragParsingError",
            Self::RemuxAllocError => "remuxAllocError",
            Self::KeyLoadError => "keyLoadError",
            Self::KeyLoadTimeout => "keyLoadTimeOut",
            Self::BufferAddCodecError => "bufferAddCodecError",
            Self::BufferAppendError => "bufferAppendError",
            Self::BufferAppendingError => "bufferAppendingError",
            Self::BufferStalledError => "bufferStalledError",
            Self::BufferFullError => "bufferFullError",
            Self::BufferSeekOverHole => "bufferSeekOverHole",
            Self::BufferNudgeOnStall => "bufferNudgeOnStall",
            Self::InternalException => "internalException",
        }
    }

    /// Fragment or key download failures, recovered per level.
    pub fn is_fragment_load(self) -> bool {
        matches!(
            self,
            Self::FragLoadError | Self::FragLoadTimeout | Self::KeyLoadError | Self::KeyLoadTimeout
        )
    }

    pub fn is_level_load(self) -> bool {
        matches!(self, Self::LevelLoadError | Self::LevelLoadTimeout)
    }
}

/// Payload of the error event.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub details: ErrorDetails,
    pub fatal: bool,
    pub reason: Option<String>,
    /// Level index for level-scoped errors.
    pub level: Option<usize>,
    /// Fragment the failure relates to.
    pub frag: Option<FragmentKey>,
    /// Playlist request the failure relates to.
    pub context: Option<PlaylistContext>,
}

impl ErrorData {
    pub fn new(kind: ErrorKind, details: ErrorDetails, fatal: bool) -> Self {
        Self {
            kind,
            details,
            fatal,
            reason: None,
            level: None,
            frag: None,
            context: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_level(mut self, level: usize) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_frag(mut self, frag: FragmentKey) -> Self {
        self.frag = Some(frag);
        self
    }

    pub fn with_context(mut self, context: PlaylistContext) -> Self {
        self.context = Some(context);
        self
    }

    /// The same failure, promoted to fatal.
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Non-fatal report of a handler failure.
    pub fn internal(err: &HlsError) -> Self {
        Self::new(ErrorKind::Other, ErrorDetails::InternalException, false)
            .with_reason(err.to_string())
    }
}
