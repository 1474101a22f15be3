use std::fmt;

use bytes::Bytes;
pub use lyra_events::{LevelType, StreamType};
use url::Url;

use super::key::LevelKey;

/// Media sequence number of a fragment, or the init segment marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentSn {
    Init,
    Media(u64),
}

impl FragmentSn {
    pub fn media(self) -> Option<u64> {
        match self {
            Self::Media(sn) => Some(sn),
            Self::Init => None,
        }
    }

    pub fn is_init(self) -> bool {
        matches!(self, Self::Init)
    }
}

impl fmt::Display for FragmentSn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("initSegment"),
            Self::Media(sn) => write!(f, "{sn}"),
        }
    }
}

/// Byte range inside a resource, `end` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// From an `#EXT-X-BYTERANGE` `length@offset` pair.
    pub fn from_length(length: u64, offset: u64) -> Self {
        Self {
            start: offset,
            end: offset + length,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Elementary streams a fragment was found to carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ElementaryStreams {
    pub audio: bool,
    pub video: bool,
}

impl ElementaryStreams {
    pub fn has(&self, stream: StreamType) -> bool {
        match stream {
            StreamType::Audio => self.audio,
            StreamType::Video => self.video,
        }
    }

    pub fn set(&mut self, stream: StreamType) {
        match stream {
            StreamType::Audio => self.audio = true,
            StreamType::Video => self.video = true,
        }
    }
}

/// Identity of a fragment across playlist reloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub kind: LevelType,
    pub level: usize,
    pub url_id: usize,
    pub sn: FragmentSn,
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.kind.as_str(),
            self.level,
            self.url_id,
            self.sn
        )
    }
}

/// One media segment (or the init segment) of a playlist.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub kind: LevelType,
    pub sn: FragmentSn,
    /// Discontinuity counter.
    pub cc: u64,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    /// Seconds.
    pub duration: f64,
    /// Presentation start in seconds.
    pub start: f64,
    /// Program date time in epoch milliseconds.
    pub program_date_time: Option<f64>,
    /// `program_date_time` came from a tag rather than being carried forward.
    pub raw_program_date_time: bool,
    pub decrypt: Option<LevelKey>,
    pub level: usize,
    pub url_id: usize,
    pub elementary_streams: ElementaryStreams,
    pub start_pts: Option<f64>,
    pub end_pts: Option<f64>,
    pub start_dts: Option<f64>,
    pub end_dts: Option<f64>,
    /// Largest PTS correction seen for this fragment.
    pub delta_pts: Option<f64>,
    pub max_start_pts: Option<f64>,
    pub backtracked: bool,
    pub dropped: u32,
    /// Loaded only to measure bandwidth, never buffered.
    pub bitrate_test: bool,
    /// Level was chosen by ABR.
    pub auto_level: bool,
    pub title: Option<String>,
    /// Payload kept for init segments so it survives playlist reloads.
    pub data: Option<Bytes>,
}

impl Fragment {
    pub fn new(kind: LevelType, sn: FragmentSn, url: Url) -> Self {
        Self {
            kind,
            sn,
            cc: 0,
            url,
            byte_range: None,
            duration: 0.0,
            start: 0.0,
            program_date_time: None,
            raw_program_date_time: false,
            decrypt: None,
            level: 0,
            url_id: 0,
            elementary_streams: ElementaryStreams::default(),
            start_pts: None,
            end_pts: None,
            start_dts: None,
            end_dts: None,
            delta_pts: None,
            max_start_pts: None,
            backtracked: false,
            dropped: 0,
            bitrate_test: false,
            auto_level: false,
            title: None,
            data: None,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn end_program_date_time(&self) -> Option<f64> {
        self.program_date_time
            .map(|pdt| pdt + self.duration * 1000.0)
    }

    /// Fragment needs a key that has not been loaded yet.
    pub fn encrypted(&self) -> bool {
        self.decrypt
            .as_ref()
            .is_some_and(|key| key.uri.is_some() && key.key.is_none())
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey {
            kind: self.kind,
            level: self.level,
            url_id: self.url_id,
            sn: self.sn,
        }
    }

    pub fn media_sn(&self) -> Option<u64> {
        self.sn.media()
    }

    /// Nudge tolerance for position lookups: `min(max_tolerance, duration + delta_pts)`.
    pub fn lookup_tolerance(&self, max_tolerance: f64) -> f64 {
        max_tolerance.min(self.duration + self.delta_pts.unwrap_or(0.0))
    }
}

#[cfg(test)]
pub(crate) fn test_fragment(sn: u64, start: f64, duration: f64) -> Fragment {
    let url = Url::parse(&format!("https://example.com/seg{sn}.ts")).unwrap();
    let mut frag = Fragment::new(LevelType::Main, FragmentSn::Media(sn), url);
    frag.start = start;
    frag.duration = duration;
    frag
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::model::{EncryptionMethod, LevelKey};

    #[test]
    fn key_formats_like_tracker_id() {
        let mut frag = test_fragment(12, 0.0, 4.0);
        frag.level = 2;
        frag.url_id = 1;
        assert_eq!(frag.key().to_string(), "main_2_1_12");
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(LevelKey::new(EncryptionMethod::Aes128, None)), false)]
    #[case(
        Some(LevelKey::new(
            EncryptionMethod::Aes128,
            Some(Url::parse("https://example.com/key").unwrap())
        )),
        true
    )]
    fn encrypted_until_key_loaded(#[case] decrypt: Option<LevelKey>, #[case] expected: bool) {
        let mut frag = test_fragment(0, 0.0, 4.0);
        frag.decrypt = decrypt;
        assert_eq!(frag.encrypted(), expected);
        if let Some(key) = frag.decrypt.as_mut() {
            key.key = Some(Bytes::from_static(&[0; 16]));
        }
        assert!(!frag.encrypted());
    }

    #[test]
    fn end_program_date_time_adds_duration() {
        let mut frag = test_fragment(0, 10.0, 6.0);
        assert_eq!(frag.end_program_date_time(), None);
        frag.program_date_time = Some(1_000.0);
        assert_eq!(frag.end_program_date_time(), Some(7_000.0));
        assert_eq!(frag.end(), 16.0);
    }

    #[test]
    fn byte_range_from_length() {
        let range = ByteRange::from_length(100, 50);
        assert_eq!(range, ByteRange { start: 50, end: 150 });
        assert_eq!(range.len(), 100);
    }
}
