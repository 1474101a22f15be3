//! State shared by every component of one player.

use std::sync::Arc;

use lyra_abr::{AbrContext, DefaultAbrController, LevelSource, PlaybackState};
use lyra_platform::SharedClock;
use url::Url;

use crate::{
    buffer::buffer_info,
    config::{HlsConfig, StartLevel},
    fragment_tracker::FragmentTracker,
    media::{AllCodecs, CodecSupport, Demuxer, Media, MediaSink, NominalTimingDemuxer},
    model::{Ladder, Level, MediaTrack},
};

pub(crate) struct Session {
    pub config: Arc<HlsConfig>,
    pub clock: SharedClock,
    /// Manifest URL of the loaded source.
    pub url: Option<Url>,
    pub levels: Vec<Level>,
    pub audio_tracks: Vec<MediaTrack>,
    pub subtitle_tracks: Vec<MediaTrack>,
    pub audio_track: Option<usize>,
    pub subtitle_track: Option<usize>,
    pub current_level: Option<usize>,
    /// User-forced level, `None` in auto mode.
    pub manual_level: Option<usize>,
    pub first_level: usize,
    pub start_level_override: Option<StartLevel>,
    /// Highest level ABR may pick, `None` for no cap.
    pub auto_level_capping: Option<usize>,
    pub abr: DefaultAbrController,
    /// Duration of the main fragment in flight.
    pub abr_frag_duration: Option<f64>,
    pub tracker: FragmentTracker,
    pub media: Option<Box<dyn Media>>,
    pub sink: Option<Box<dyn MediaSink>>,
    pub demuxer: Box<dyn Demuxer>,
    pub codecs: Box<dyn CodecSupport>,
    /// Loading was started and not stopped since.
    pub can_load: bool,
}

impl Session {
    pub fn new(config: Arc<HlsConfig>, clock: SharedClock) -> Self {
        let abr = DefaultAbrController::new(config.abr.clone());
        Self {
            config,
            clock,
            url: None,
            levels: Vec::new(),
            audio_tracks: Vec::new(),
            subtitle_tracks: Vec::new(),
            audio_track: None,
            subtitle_track: None,
            current_level: None,
            manual_level: None,
            first_level: 0,
            start_level_override: None,
            auto_level_capping: None,
            abr,
            abr_frag_duration: None,
            tracker: FragmentTracker::new(),
            media: None,
            sink: None,
            demuxer: Box::new(NominalTimingDemuxer),
            codecs: Box::new(AllCodecs),
            can_load: false,
        }
    }

    /// Forget everything learned from the previous source.
    pub fn reset_source(&mut self) {
        self.url = None;
        self.levels.clear();
        self.audio_tracks.clear();
        self.subtitle_tracks.clear();
        self.audio_track = None;
        self.subtitle_track = None;
        self.current_level = None;
        self.first_level = 0;
        self.abr_frag_duration = None;
        self.tracker.remove_all_fragments();
        self.abr = DefaultAbrController::new(self.config.abr.clone());
        self.can_load = false;
    }

    /// Lowest level whose bitrate exceeds `min_auto_bitrate`, else 0.
    pub fn min_auto_level(&self) -> usize {
        let min_bitrate = self.config.abr.min_auto_bitrate;
        let levels = Ladder(&self.levels);
        (0..levels.level_count())
            .find(|&i| {
                let bitrate = if self.config.abr.max_with_real_bitrate {
                    levels.effective_bitrate(i)
                } else {
                    levels.bitrate(i)
                };
                bitrate.is_some_and(|b| b > min_bitrate)
            })
            .unwrap_or(0)
    }

    pub fn max_auto_level(&self) -> usize {
        match self.auto_level_capping {
            Some(cap) => cap,
            None => self.levels.len().saturating_sub(1),
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        let Some(media) = self.media.as_ref() else {
            return PlaybackState::new(0.0, 0.0, 1.0);
        };
        let position = media.current_time();
        let info = buffer_info(&media.buffered(), position, self.config.max_buffer_hole);
        PlaybackState::new(position, info.end, media.playback_rate())
    }

    /// ABR choice clamped to the auto range.
    pub fn next_auto_level(&self) -> usize {
        let min = self.min_auto_level();
        let max = self.max_auto_level().max(min);
        let cx = AbrContext {
            min_auto_level: min,
            max_auto_level: max,
            playback: self.playback_state(),
            current_frag_duration: self.abr_frag_duration,
        };
        self.abr
            .next_auto_level(&Ladder(&self.levels), &cx)
            .clamp(min, max)
    }

    /// Level of the next fragment load.
    pub fn next_load_level(&self) -> usize {
        self.manual_level.unwrap_or_else(|| self.next_auto_level())
    }

    pub fn auto_level_enabled(&self) -> bool {
        self.manual_level.is_none()
    }

    /// Start level, `None` meaning automatic start with a bitrate test.
    pub fn start_level(&self) -> Option<usize> {
        let last = self.levels.len().saturating_sub(1);
        match self.start_level_override.unwrap_or(self.config.start_level) {
            StartLevel::First => Some(self.first_level),
            StartLevel::Auto => None,
            StartLevel::Index(index) => Some(index.min(last)),
        }
    }
}
