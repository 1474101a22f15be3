use url::Url;

use super::details::LevelDetails;

/// `#EXT-X-MEDIA` TYPE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Subtitles,
    ClosedCaptions,
}

/// Alternate rendition declared by `#EXT-X-MEDIA`.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaTrack {
    pub id: usize,
    pub group_id: String,
    pub name: String,
    pub kind: TrackKind,
    pub default: bool,
    pub autoselect: bool,
    pub forced: bool,
    pub lang: Option<String>,
    /// Absent when the rendition is muxed into the main stream.
    pub url: Option<Url>,
    pub audio_codec: Option<String>,
    pub details: Option<LevelDetails>,
}
