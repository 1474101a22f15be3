use lyra_abr::LevelSource;
use url::Url;

use super::details::LevelDetails;

/// One entry of the quality ladder.
#[derive(Clone, Debug, PartialEq)]
pub struct Level {
    /// Redundant playlist URLs, all carrying the same rendition.
    pub urls: Vec<Url>,
    pub url_id: usize,
    pub bitrate: u64,
    /// Measured from loaded fragments, when enabled.
    pub real_bitrate: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub name: Option<String>,
    pub codecs: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// `AUDIO` group id per url.
    pub audio_group_ids: Vec<Option<String>>,
    /// `SUBTITLES` group id per url.
    pub text_group_ids: Vec<Option<String>>,
    pub load_error: u32,
    pub fragment_error: bool,
    pub details: Option<LevelDetails>,
    pub(crate) loaded_bytes: u64,
    pub(crate) loaded_duration: f64,
}

impl Level {
    pub fn new(url: Url, bitrate: u64) -> Self {
        Self {
            urls: vec![url],
            url_id: 0,
            bitrate,
            real_bitrate: None,
            width: None,
            height: None,
            name: None,
            codecs: None,
            video_codec: None,
            audio_codec: None,
            audio_group_ids: Vec::new(),
            text_group_ids: Vec::new(),
            load_error: 0,
            fragment_error: false,
            details: None,
            loaded_bytes: 0,
            loaded_duration: 0.0,
        }
    }

    /// Playlist URL currently in use.
    pub fn url(&self) -> &Url {
        self.urls.get(self.url_id).unwrap_or(&self.urls[0])
    }

    pub fn audio_group_id(&self) -> Option<&str> {
        self.audio_group_ids
            .get(self.url_id)
            .and_then(|g| g.as_deref())
    }

    pub fn text_group_id(&self) -> Option<&str> {
        self.text_group_ids
            .get(self.url_id)
            .and_then(|g| g.as_deref())
    }

    pub fn is_live(&self) -> bool {
        self.details.as_ref().is_some_and(|d| d.live)
    }

    /// Account a downloaded fragment toward the measured bitrate.
    pub(crate) fn record_download(&mut self, bytes: u64, duration: f64) {
        self.loaded_bytes += bytes;
        self.loaded_duration += duration;
        self.real_bitrate = Some(lyra_abr::real_bitrate(
            self.loaded_bytes,
            self.loaded_duration,
        ));
    }
}

/// Borrowed quality ladder as seen by the ABR engine.
#[derive(Clone, Copy, Debug)]
pub struct Ladder<'a>(pub &'a [Level]);

impl LevelSource for Ladder<'_> {
    fn level_count(&self) -> usize {
        self.0.len()
    }

    fn bitrate(&self, index: usize) -> Option<u64> {
        self.0.get(index).map(|l| l.bitrate)
    }

    fn real_bitrate(&self, index: usize) -> Option<u64> {
        self.0.get(index).and_then(|l| l.real_bitrate)
    }

    fn average_fragment_duration(&self, index: usize) -> Option<f64> {
        self.0
            .get(index)
            .and_then(|l| l.details.as_ref())
            .filter(|d| !d.fragments.is_empty())
            .map(|d| d.average_target_duration)
    }

    fn is_live(&self, index: usize) -> bool {
        self.0.get(index).is_some_and(Level::is_live)
    }
}
