//! Capabilities injected by the host: playback element, media buffer,
//! demuxer and codec support.

use bytes::Bytes;
use lyra_platform::MaybeSend;
use thiserror::Error;
#[cfg(test)]
use unimock::unimock;

use crate::{
    HlsResult,
    buffer::TimeRanges,
    model::{Fragment, LevelKey, LevelType, StreamType},
};

/// HTML-style readiness of the playback element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    #[default]
    HaveEnoughData,
}

/// Decoded/dropped frame counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackQuality {
    pub decoded_frames: u64,
    pub dropped_frames: u64,
}

/// Playback element.
pub trait Media: MaybeSend {
    fn current_time(&self) -> f64;

    fn playback_rate(&self) -> f64 {
        1.0
    }

    fn paused(&self) -> bool {
        false
    }

    fn seeking(&self) -> bool {
        false
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::HaveEnoughData
    }

    /// Buffered ranges across all streams.
    fn buffered(&self) -> TimeRanges;

    /// Rendered size in physical pixels.
    fn display_size(&self) -> Option<(u64, u64)> {
        None
    }

    fn playback_quality(&self) -> Option<PlaybackQuality> {
        None
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("buffer quota exceeded")]
    QuotaExceeded,
    #[error("{0}")]
    Other(String),
}

/// One demuxed chunk ready for the media buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendData {
    pub stream: StreamType,
    pub kind: LevelType,
    pub data: Bytes,
    /// Presentation span in seconds, empty for init data.
    pub start: f64,
    pub end: f64,
}

/// Media buffer (an MSE `SourceBuffer` set in a browser).
pub trait MediaSink: MaybeSend {
    /// # Errors
    ///
    /// [`SinkError::QuotaExceeded`] when the buffer is full.
    fn append(&mut self, data: &AppendData) -> Result<(), SinkError>;

    /// # Errors
    ///
    /// Sink specific failures.
    fn remove(&mut self, stream: StreamType, start: f64, end: f64) -> Result<(), SinkError>;

    fn buffered(&self, stream: StreamType) -> TimeRanges;

    fn end_of_stream(&mut self) {}

    fn set_duration(&mut self, _duration: f64) {}
}

/// Inputs of one demux call.
#[derive(Clone, Copy, Debug)]
pub struct DemuxContext<'a> {
    pub frag: &'a Fragment,
    pub init_segment: Option<&'a Bytes>,
    pub audio_codec: Option<&'a str>,
    pub video_codec: Option<&'a str>,
    /// Key for encrypted fragments; the demuxer decrypts.
    pub decrypt: Option<&'a LevelKey>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DemuxedTrack {
    pub stream: StreamType,
    pub data: Bytes,
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemuxOutput {
    pub tracks: Vec<DemuxedTrack>,
}

/// Container parsing capability.
pub trait Demuxer: MaybeSend {
    /// # Errors
    ///
    /// [`crate::HlsError::Demux`] when the payload cannot be parsed.
    fn demux(&mut self, payload: Bytes, cx: &DemuxContext<'_>) -> HlsResult<DemuxOutput>;
}

/// Passes payloads through untouched, timed from the playlist.
///
/// Stream types come from the level codecs: audio-only levels produce an
/// audio track, everything else a video track.
#[derive(Clone, Copy, Debug, Default)]
pub struct NominalTimingDemuxer;

impl Demuxer for NominalTimingDemuxer {
    fn demux(&mut self, payload: Bytes, cx: &DemuxContext<'_>) -> HlsResult<DemuxOutput> {
        let stream = if cx.video_codec.is_none() && cx.audio_codec.is_some() {
            StreamType::Audio
        } else {
            StreamType::Video
        };
        let frag = cx.frag;
        Ok(DemuxOutput {
            tracks: vec![DemuxedTrack {
                stream,
                data: payload,
                start_pts: frag.start,
                end_pts: frag.end(),
                start_dts: frag.start,
                end_dts: frag.end(),
            }],
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    Audio,
    Video,
}

/// Decides which codec strings the platform can play.
#[cfg_attr(test, unimock(api = CodecSupportMock))]
pub trait CodecSupport: MaybeSend {
    fn is_supported(&self, codec: &str, kind: CodecKind) -> bool;
}

/// Accepts every codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllCodecs;

impl CodecSupport for AllCodecs {
    fn is_supported(&self, _codec: &str, _kind: CodecKind) -> bool {
        true
    }
}
