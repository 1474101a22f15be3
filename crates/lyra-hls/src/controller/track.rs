//! Alternate rendition selection: audio tracks and subtitle tracks.
//!
//! Both controllers pick the default rendition once the manifest is parsed,
//! load its media playlist, keep live playlists fresh on their own reload
//! timer and retry failed playlist loads with the level backoff policy.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    HlsResult,
    error::{ErrorData, ErrorDetails},
    events::{Event, EventKind},
    hub::{Component, Context, TimerKind},
    level_helper::{compute_reload_interval, merge_details, merge_subtitle_playlists},
    loader::{LoadStats, PlaylistContextKind},
    model::{LevelDetails, MediaTrack},
};

/// Playlist reload bookkeeping of the selected rendition.
#[derive(Debug, Default)]
struct Reload {
    retry: u32,
}

impl Reload {
    fn schedule(
        &mut self,
        timer: TimerKind,
        old: Option<&LevelDetails>,
        new: &LevelDetails,
        stats: &LoadStats,
        cx: &mut Context<'_>,
    ) {
        self.retry = 0;
        if new.live {
            let elapsed = cx.session.clock.elapsed_ms(stats.trequest);
            let interval = compute_reload_interval(old, new, Some(elapsed));
            debug!(?timer, interval, "live rendition playlist, reload scheduled");
            cx.set_timeout(timer, Duration::from_millis(interval));
        } else {
            cx.clear_timer(timer);
        }
    }

    /// Back off and reload, or give up once the level retry budget is spent.
    fn on_error(&mut self, timer: TimerKind, data: &ErrorData, cx: &mut Context<'_>) {
        let policy = cx.session.config.level;
        if self.retry < policy.max_retry {
            let delay = policy.backoff(self.retry);
            self.retry += 1;
            warn!(retry = self.retry, ?delay, details = data.details.as_str(), "retrying rendition playlist");
            cx.set_timeout(timer, delay);
        } else {
            warn!(details = data.details.as_str(), "rendition playlist unavailable, giving up");
            cx.clear_timer(timer);
        }
    }
}

/// Whether the playlist of `track` has to be (re)loaded.
fn needs_playlist(track: &MediaTrack) -> bool {
    track.url.is_some() && track.details.as_ref().is_none_or(|d| d.live)
}

fn error_track(data: &ErrorData, kind: PlaylistContextKind) -> Option<usize> {
    data.context
        .as_ref()
        .filter(|c| c.kind == kind)
        .and_then(|c| c.id)
}

#[derive(Debug, Default)]
pub(crate) struct AudioTrackController {
    reload: Reload,
}

impl AudioTrackController {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&mut self, id: usize, cx: &mut Context<'_>) {
        let Some(track) = cx.session.audio_tracks.get(id) else {
            warn!(id, "invalid audio track id");
            return;
        };
        let load = needs_playlist(track).then(|| track.url.clone()).flatten();
        if cx.session.audio_track != Some(id) {
            info!(id, name = %track.name, group = %track.group_id, "switching audio track");
            cx.session.audio_track = Some(id);
            cx.emit(Event::AudioTrackSwitched { id });
        }
        self.reload = Reload::default();
        cx.clear_timer(TimerKind::AudioReload);
        if let Some(url) = load {
            cx.emit(Event::AudioTrackLoading { id, url });
        }
    }

    fn load_current(&self, cx: &mut Context<'_>) {
        let Some(id) = cx.session.audio_track else {
            return;
        };
        if let Some(url) = cx.session.audio_tracks.get(id).and_then(|t| t.url.clone()) {
            cx.emit(Event::AudioTrackLoading { id, url });
        }
    }

    fn on_loaded(&mut self, id: usize, details: &LevelDetails, stats: &LoadStats, cx: &mut Context<'_>) {
        if cx.session.audio_track != Some(id) {
            debug!(id, "ignoring playlist of an inactive audio track");
            return;
        }
        let Some(track) = cx.session.audio_tracks.get_mut(id) else {
            return;
        };
        let mut details = details.clone();
        let old = track.details.take();
        if let Some(old) = old.as_ref() {
            merge_details(old, &mut details);
        }
        track.details = Some(details.clone());
        self.reload
            .schedule(TimerKind::AudioReload, old.as_ref(), &details, stats, cx);
    }
}

impl Component for AudioTrackController {
    fn name(&self) -> &'static str {
        "audio-track"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ManifestLoading,
            EventKind::ManifestParsed,
            EventKind::AudioTrackRequested,
            EventKind::AudioTrackLoaded,
            EventKind::StopLoad,
            EventKind::Error,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::ManifestLoading { .. } | Event::StopLoad => {
                self.reload = Reload::default();
                cx.clear_timer(TimerKind::AudioReload);
            }
            Event::ManifestParsed { .. } => {
                let tracks = &cx.session.audio_tracks;
                if !tracks.is_empty() {
                    let id = tracks.iter().position(|t| t.default).unwrap_or(0);
                    self.select(id, cx);
                }
            }
            Event::AudioTrackRequested { id } => self.select(*id, cx),
            Event::AudioTrackLoaded { id, details, stats } => self.on_loaded(*id, details, stats, cx),
            Event::Error(data) if !data.fatal => {
                if matches!(
                    data.details,
                    ErrorDetails::AudioTrackLoadError | ErrorDetails::AudioTrackLoadTimeout
                ) && error_track(data, PlaylistContextKind::AudioTrack) == cx.session.audio_track
                {
                    self.reload.on_error(TimerKind::AudioReload, data, cx);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::AudioReload {
            self.load_current(cx);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct SubtitleTrackController {
    reload: Reload,
    /// Start of the current main playlist window; anchors subtitle reloads
    /// that share no fragment with the previous playlist.
    main_window_start: f64,
}

impl SubtitleTrackController {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&mut self, id: Option<usize>, cx: &mut Context<'_>) {
        let load = match id {
            Some(index) => {
                let Some(track) = cx.session.subtitle_tracks.get(index) else {
                    warn!(id = index, "invalid subtitle track id");
                    return;
                };
                needs_playlist(track).then(|| track.url.clone()).flatten()
            }
            None => None,
        };
        self.reload = Reload::default();
        cx.clear_timer(TimerKind::SubtitleReload);
        if cx.session.subtitle_track != id {
            info!(?id, "switching subtitle track");
            cx.session.subtitle_track = id;
            cx.emit(Event::SubtitleTrackSwitch { id });
        }
        if let (Some(id), Some(url)) = (id, load) {
            cx.emit(Event::SubtitleTrackLoading { id, url });
        }
    }

    fn load_current(&self, cx: &mut Context<'_>) {
        let Some(id) = cx.session.subtitle_track else {
            return;
        };
        if let Some(url) = cx.session.subtitle_tracks.get(id).and_then(|t| t.url.clone()) {
            cx.emit(Event::SubtitleTrackLoading { id, url });
        }
    }

    fn on_loaded(&mut self, id: usize, details: &LevelDetails, stats: &LoadStats, cx: &mut Context<'_>) {
        if cx.session.subtitle_track != Some(id) {
            debug!(id, "ignoring playlist of an inactive subtitle track");
            return;
        }
        let Some(track) = cx.session.subtitle_tracks.get_mut(id) else {
            return;
        };
        let mut details = details.clone();
        let old = track.details.take();
        if let Some(old) = old.as_ref()
            && details.live
        {
            merge_subtitle_playlists(old, &mut details, self.main_window_start);
        }
        track.details = Some(details.clone());
        self.reload
            .schedule(TimerKind::SubtitleReload, old.as_ref(), &details, stats, cx);
    }
}

impl Component for SubtitleTrackController {
    fn name(&self) -> &'static str {
        "subtitle-track"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ManifestLoading,
            EventKind::ManifestParsed,
            EventKind::SubtitleTrackRequested,
            EventKind::SubtitleTrackLoaded,
            EventKind::LevelUpdated,
            EventKind::StopLoad,
            EventKind::Error,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::ManifestLoading { .. } | Event::StopLoad => {
                self.reload = Reload::default();
                cx.clear_timer(TimerKind::SubtitleReload);
            }
            Event::ManifestParsed { .. } => {
                let default = cx.session.subtitle_tracks.iter().position(|t| t.default);
                if default.is_some() {
                    self.select(default, cx);
                }
            }
            Event::SubtitleTrackRequested { id } => self.select(*id, cx),
            Event::SubtitleTrackLoaded { id, details, stats } => {
                self.on_loaded(*id, details, stats, cx);
            }
            Event::LevelUpdated { level } => {
                if let Some(details) = cx.session.levels.get(*level).and_then(|l| l.details.as_ref()) {
                    self.main_window_start = details.window_start();
                }
            }
            Event::Error(data) if !data.fatal => {
                if matches!(
                    data.details,
                    ErrorDetails::SubtitleTrackLoadError | ErrorDetails::SubtitleTrackLoadTimeout
                ) && error_track(data, PlaylistContextKind::SubtitleTrack)
                    == cx.session.subtitle_track
                {
                    self.reload.on_error(TimerKind::SubtitleReload, data, cx);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::SubtitleReload {
            self.load_current(cx);
        }
        Ok(())
    }
}
