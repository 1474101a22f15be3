//! Internal event union dispatched through the hub.
//!
//! Commands (`StartLoad`, `LevelSelect`, ...) ask a specific component to act;
//! notifications report what happened. Every dispatched event is mirrored to
//! the public bus through [`Event::to_public`].

use bytes::Bytes;
use lyra_events::HlsEvent;
use url::Url;

use crate::{
    buffer::TimeRanges,
    error::ErrorData,
    loader::LoadStats,
    media::AppendData,
    model::{Fragment, FragmentKey, LevelDetails, LevelType, StreamType},
    parsing::ParsedManifest,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    StartLoad {
        start_position: Option<f64>,
    },
    StopLoad,
    /// Make `level` the current level (loading its playlist when needed).
    LevelSelect {
        level: usize,
    },
    /// Drop the forward buffer and load the newly selected level right away.
    ImmediateLevelSwitch,
    /// Switch after the fragment being played, keeping what is buffered until then.
    NextLevelSwitch,
    /// Drop the in-flight fragment and key loads of `kind`.
    AbortFragLoad {
        kind: LevelType,
    },
    AudioTrackRequested {
        id: usize,
    },
    SubtitleTrackRequested {
        id: Option<usize>,
    },

    MediaAttached,
    MediaDetaching,

    ManifestLoading {
        url: Url,
    },
    ManifestLoaded {
        url: Url,
        manifest: ParsedManifest,
        /// Present when the manifest URL answered with a media playlist.
        details: Option<LevelDetails>,
        stats: LoadStats,
    },
    ManifestParsed {
        /// Bitrates of the playable levels, ascending.
        bitrates: Vec<u64>,
        first_level: usize,
        audio: bool,
        video: bool,
        alt_audio: bool,
    },
    LevelLoading {
        level: usize,
        url_id: usize,
        url: Url,
    },
    LevelLoaded {
        level: usize,
        details: LevelDetails,
        stats: LoadStats,
    },
    LevelSwitching {
        level: usize,
    },
    LevelSwitched {
        level: usize,
    },
    /// Merged details of `level` are stored on the session.
    LevelUpdated {
        level: usize,
    },
    LevelPtsUpdated {
        kind: LevelType,
        level: usize,
        drift: f64,
        start: f64,
        end: f64,
    },

    AudioTrackSwitched {
        id: usize,
    },
    AudioTrackLoading {
        id: usize,
        url: Url,
    },
    AudioTrackLoaded {
        id: usize,
        details: LevelDetails,
        stats: LoadStats,
    },
    SubtitleTrackSwitch {
        id: Option<usize>,
    },
    SubtitleTrackLoading {
        id: usize,
        url: Url,
    },
    SubtitleTrackLoaded {
        id: usize,
        details: LevelDetails,
        stats: LoadStats,
    },

    FragLoading {
        frag: Fragment,
    },
    FragLoadProgress {
        frag: FragmentKey,
        stats: LoadStats,
    },
    FragLoadEmergencyAborted {
        frag: Fragment,
    },
    FragLoaded {
        frag: Fragment,
        payload: Bytes,
        stats: LoadStats,
    },
    FragParsed {
        frag: Fragment,
    },
    FragBuffered {
        frag: Fragment,
        stats: LoadStats,
    },
    FragChanged {
        frag: Fragment,
    },
    KeyLoading {
        frag: Fragment,
    },
    KeyLoaded {
        frag: Fragment,
    },

    BufferAppending(AppendData),
    BufferAppended {
        stream: StreamType,
        ranges: TimeRanges,
    },
    BufferFlushing {
        start: f64,
        end: f64,
    },
    BufferFlushed,
    BufferEos,

    Error(ErrorData),

    FpsDrop {
        dropped: u64,
        decoded: u64,
    },
    FpsDropLevelCapping {
        level: usize,
        dropped_level: usize,
    },
}

/// Discriminant of [`Event`], used for routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    StartLoad,
    StopLoad,
    LevelSelect,
    ImmediateLevelSwitch,
    NextLevelSwitch,
    AbortFragLoad,
    AudioTrackRequested,
    SubtitleTrackRequested,
    MediaAttached,
    MediaDetaching,
    ManifestLoading,
    ManifestLoaded,
    ManifestParsed,
    LevelLoading,
    LevelLoaded,
    LevelSwitching,
    LevelSwitched,
    LevelUpdated,
    LevelPtsUpdated,
    AudioTrackSwitched,
    AudioTrackLoading,
    AudioTrackLoaded,
    SubtitleTrackSwitch,
    SubtitleTrackLoading,
    SubtitleTrackLoaded,
    FragLoading,
    FragLoadProgress,
    FragLoadEmergencyAborted,
    FragLoaded,
    FragParsed,
    FragBuffered,
    FragChanged,
    KeyLoading,
    KeyLoaded,
    BufferAppending,
    BufferAppended,
    BufferFlushing,
    BufferFlushed,
    BufferEos,
    Error,
    FpsDrop,
    FpsDropLevelCapping,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StartLoad { .. } => EventKind::StartLoad,
            Self::StopLoad => EventKind::StopLoad,
            Self::LevelSelect { .. } => EventKind::LevelSelect,
            Self::ImmediateLevelSwitch => EventKind::ImmediateLevelSwitch,
            Self::NextLevelSwitch => EventKind::NextLevelSwitch,
            Self::AbortFragLoad { .. } => EventKind::AbortFragLoad,
            Self::AudioTrackRequested { .. } => EventKind::AudioTrackRequested,
            Self::SubtitleTrackRequested { .. } => EventKind::SubtitleTrackRequested,
            Self::MediaAttached => EventKind::MediaAttached,
            Self::MediaDetaching => EventKind::MediaDetaching,
            Self::ManifestLoading { .. } => EventKind::ManifestLoading,
            Self::ManifestLoaded { .. } => EventKind::ManifestLoaded,
            Self::ManifestParsed { .. } => EventKind::ManifestParsed,
            Self::LevelLoading { .. } => EventKind::LevelLoading,
            Self::LevelLoaded { .. } => EventKind::LevelLoaded,
            Self::LevelSwitching { .. } => EventKind::LevelSwitching,
            Self::LevelSwitched { .. } => EventKind::LevelSwitched,
            Self::LevelUpdated { .. } => EventKind::LevelUpdated,
            Self::LevelPtsUpdated { .. } => EventKind::LevelPtsUpdated,
            Self::AudioTrackSwitched { .. } => EventKind::AudioTrackSwitched,
            Self::AudioTrackLoading { .. } => EventKind::AudioTrackLoading,
            Self::AudioTrackLoaded { .. } => EventKind::AudioTrackLoaded,
            Self::SubtitleTrackSwitch { .. } => EventKind::SubtitleTrackSwitch,
            Self::SubtitleTrackLoading { .. } => EventKind::SubtitleTrackLoading,
            Self::SubtitleTrackLoaded { .. } => EventKind::SubtitleTrackLoaded,
            Self::FragLoading { .. } => EventKind::FragLoading,
            Self::FragLoadProgress { .. } => EventKind::FragLoadProgress,
            Self::FragLoadEmergencyAborted { .. } => EventKind::FragLoadEmergencyAborted,
            Self::FragLoaded { .. } => EventKind::FragLoaded,
            Self::FragParsed { .. } => EventKind::FragParsed,
            Self::FragBuffered { .. } => EventKind::FragBuffered,
            Self::FragChanged { .. } => EventKind::FragChanged,
            Self::KeyLoading { .. } => EventKind::KeyLoading,
            Self::KeyLoaded { .. } => EventKind::KeyLoaded,
            Self::BufferAppending(_) => EventKind::BufferAppending,
            Self::BufferAppended { .. } => EventKind::BufferAppended,
            Self::BufferFlushing { .. } => EventKind::BufferFlushing,
            Self::BufferFlushed => EventKind::BufferFlushed,
            Self::BufferEos => EventKind::BufferEos,
            Self::Error(_) => EventKind::Error,
            Self::FpsDrop { .. } => EventKind::FpsDrop,
            Self::FpsDropLevelCapping { .. } => EventKind::FpsDropLevelCapping,
        }
    }

    /// Compact observer form; commands are not published.
    pub fn to_public(&self) -> Option<HlsEvent> {
        let event = match self {
            Self::StartLoad { .. }
            | Self::StopLoad
            | Self::LevelSelect { .. }
            | Self::ImmediateLevelSwitch
            | Self::NextLevelSwitch
            | Self::AbortFragLoad { .. }
            | Self::AudioTrackRequested { .. }
            | Self::SubtitleTrackRequested { .. }
            | Self::AudioTrackLoading { .. }
            | Self::SubtitleTrackLoading { .. } => return None,
            Self::MediaAttached => HlsEvent::MediaAttached,
            Self::MediaDetaching => HlsEvent::MediaDetached,
            Self::ManifestLoading { url } => HlsEvent::ManifestLoading {
                url: url.to_string(),
            },
            Self::ManifestLoaded { manifest, .. } => HlsEvent::ManifestLoaded {
                levels: manifest.variants.len(),
                audio_tracks: manifest.audio_tracks.len(),
                subtitle_tracks: manifest.subtitle_tracks.len(),
            },
            Self::ManifestParsed {
                bitrates,
                first_level,
                ..
            } => HlsEvent::ManifestParsed {
                bitrates: bitrates.clone(),
                first_level: *first_level,
            },
            Self::LevelLoading { level, url_id, url } => HlsEvent::LevelLoading {
                level: *level,
                url_id: *url_id,
                url: url.to_string(),
            },
            Self::LevelLoaded { level, details, .. } => HlsEvent::LevelLoaded {
                level: *level,
                live: details.live,
                start_sn: details.start_sn,
                end_sn: details.end_sn,
            },
            Self::LevelSwitching { level } => HlsEvent::LevelSwitching { level: *level },
            Self::LevelSwitched { level } => HlsEvent::LevelSwitched { level: *level },
            Self::LevelUpdated { level } => HlsEvent::LevelUpdated { level: *level },
            Self::LevelPtsUpdated {
                level,
                drift,
                start,
                end,
                ..
            } => HlsEvent::LevelPtsUpdated {
                level: *level,
                drift: *drift,
                start: *start,
                end: *end,
            },
            Self::AudioTrackSwitched { id } => HlsEvent::AudioTrackSwitched { id: *id },
            Self::AudioTrackLoaded { id, .. } => HlsEvent::AudioTrackLoaded { id: *id },
            Self::SubtitleTrackSwitch { id } => HlsEvent::SubtitleTrackSwitch { id: *id },
            Self::SubtitleTrackLoaded { id, .. } => HlsEvent::SubtitleTrackLoaded { id: *id },
            Self::FragLoading { frag } => HlsEvent::FragLoading {
                kind: frag.kind,
                level: frag.level,
                sn: frag.media_sn(),
            },
            Self::FragLoadProgress { frag, stats } => HlsEvent::FragLoadProgress {
                kind: frag.kind,
                level: frag.level,
                sn: frag.sn.media(),
                loaded: stats.loaded,
                total: stats.total,
            },
            Self::FragLoadEmergencyAborted { frag } => HlsEvent::FragLoadEmergencyAborted {
                level: frag.level,
                sn: frag.media_sn(),
            },
            Self::FragLoaded { frag, stats, .. } => HlsEvent::FragLoaded {
                kind: frag.kind,
                level: frag.level,
                sn: frag.media_sn(),
                bytes: stats.loaded,
            },
            Self::FragParsed { frag } => HlsEvent::FragParsed {
                kind: frag.kind,
                level: frag.level,
                sn: frag.media_sn(),
            },
            Self::FragBuffered { frag, .. } => HlsEvent::FragBuffered {
                kind: frag.kind,
                level: frag.level,
                sn: frag.media_sn(),
            },
            Self::FragChanged { frag } => HlsEvent::FragChanged {
                level: frag.level,
                sn: frag.media_sn(),
            },
            Self::KeyLoading { frag } => HlsEvent::KeyLoading {
                uri: key_uri(frag),
            },
            Self::KeyLoaded { frag } => HlsEvent::KeyLoaded {
                uri: key_uri(frag),
            },
            Self::BufferAppending(data) => HlsEvent::BufferAppending {
                stream: data.stream,
                bytes: data.data.len(),
            },
            Self::BufferAppended { stream, ranges } => HlsEvent::BufferAppended {
                stream: *stream,
                buffered_end: ranges.end(),
            },
            Self::BufferFlushing { start, end } => HlsEvent::BufferFlushing {
                start: *start,
                end: *end,
            },
            Self::BufferFlushed => HlsEvent::BufferFlushed,
            Self::BufferEos => HlsEvent::BufferEos,
            Self::Error(data) => HlsEvent::Error {
                kind: data.kind.as_str(),
                details: data.details.as_str(),
                fatal: data.fatal,
                reason: data.reason.clone(),
            },
            Self::FpsDrop { dropped, decoded } => HlsEvent::FpsDrop {
                dropped: *dropped,
                decoded: *decoded,
            },
            Self::FpsDropLevelCapping {
                level,
                dropped_level,
            } => HlsEvent::FpsDropLevelCapping {
                level: *level,
                dropped_level: *dropped_level,
            },
        };
        Some(event)
    }
}

fn key_uri(frag: &Fragment) -> String {
    frag.decrypt
        .as_ref()
        .and_then(|k| k.uri.as_ref())
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::error::{ErrorDetails, ErrorKind};

    #[rstest]
    #[case(Event::StartLoad { start_position: None })]
    #[case(Event::LevelSelect { level: 1 })]
    #[case(Event::NextLevelSwitch)]
    fn commands_stay_private(#[case] event: Event) {
        assert_eq!(event.to_public(), None);
    }

    #[test]
    fn error_mirrors_taxonomy_names() {
        let event = Event::Error(ErrorData::new(
            ErrorKind::Network,
            ErrorDetails::FragLoadTimeout,
            false,
        ));
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(
            event.to_public(),
            Some(HlsEvent::Error {
                kind: "networkError",
                details: "fragLoadTimeOut",
                fatal: false,
                reason: None,
            })
        );
    }
}
