/// Playlist/track family a fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LevelType {
    Main,
    Audio,
    Subtitle,
}

impl LevelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
        }
    }
}

/// Elementary stream carried in a playback buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    Audio,
    Video,
}

/// Events emitted during HLS playback.
#[derive(Clone, Debug, PartialEq)]
pub enum HlsEvent {
    MediaAttached,
    MediaDetached,
    ManifestLoading {
        url: String,
    },
    ManifestLoaded {
        levels: usize,
        audio_tracks: usize,
        subtitle_tracks: usize,
    },
    /// Ladder is final (sorted, filtered).
    ManifestParsed {
        bitrates: Vec<u64>,
        first_level: usize,
    },
    LevelLoading {
        level: usize,
        url_id: usize,
        url: String,
    },
    LevelLoaded {
        level: usize,
        live: bool,
        start_sn: u64,
        end_sn: u64,
    },
    LevelSwitching {
        level: usize,
    },
    LevelSwitched {
        level: usize,
    },
    LevelUpdated {
        level: usize,
    },
    LevelPtsUpdated {
        level: usize,
        drift: f64,
        start: f64,
        end: f64,
    },
    AudioTrackSwitched {
        id: usize,
    },
    AudioTrackLoaded {
        id: usize,
    },
    SubtitleTrackSwitch {
        id: Option<usize>,
    },
    SubtitleTrackLoaded {
        id: usize,
    },
    FragLoading {
        kind: LevelType,
        level: usize,
        sn: Option<u64>,
    },
    FragLoadProgress {
        kind: LevelType,
        level: usize,
        sn: Option<u64>,
        loaded: u64,
        total: Option<u64>,
    },
    FragLoadEmergencyAborted {
        level: usize,
        sn: Option<u64>,
    },
    FragLoaded {
        kind: LevelType,
        level: usize,
        sn: Option<u64>,
        bytes: u64,
    },
    FragParsed {
        kind: LevelType,
        level: usize,
        sn: Option<u64>,
    },
    FragBuffered {
        kind: LevelType,
        level: usize,
        sn: Option<u64>,
    },
    FragChanged {
        level: usize,
        sn: Option<u64>,
    },
    KeyLoading {
        uri: String,
    },
    KeyLoaded {
        uri: String,
    },
    BufferAppending {
        stream: StreamType,
        bytes: usize,
    },
    BufferAppended {
        stream: StreamType,
        buffered_end: Option<f64>,
    },
    BufferFlushing {
        start: f64,
        end: f64,
    },
    BufferFlushed,
    BufferEos,
    Error {
        kind: &'static str,
        details: &'static str,
        fatal: bool,
        reason: Option<String>,
    },
    FpsDrop {
        dropped: u64,
        decoded: u64,
    },
    FpsDropLevelCapping {
        level: usize,
        dropped_level: usize,
    },
}
