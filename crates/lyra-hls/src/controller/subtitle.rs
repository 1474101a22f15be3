//! Subtitle fragment scheduling for the selected subtitle track.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::stream::{NextLoad, SchedulerCore, SchedulerState, TrackScheduler};
use crate::{
    HlsResult,
    buffer::{TimeRange, TimeRanges, buffer_info},
    config::HlsConfig,
    events::{Event, EventKind},
    fragment_finders::{find_fragment_by_pdt, find_fragment_by_pts},
    fragment_tracker::FragmentState,
    hub::Context,
    loader::LoadStats,
    model::{Fragment, LevelType},
};

const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
pub(crate) struct SubtitleScheduler {
    /// Time spans of the subtitle fragments handed over so far.
    buffered: TimeRanges,
}

impl SubtitleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_track_switch(&mut self, core: &mut SchedulerCore, id: Option<usize>, cx: &mut Context<'_>) {
        debug!(?id, "subtitle track switch");
        core.abort_current(cx);
        core.frag_previous = None;
        self.buffered = TimeRanges::new();
        if !matches!(
            core.state,
            SchedulerState::Stopped | SchedulerState::Error
        ) {
            core.state = SchedulerState::Idle;
            core.request_tick();
        }
    }
}

impl TrackScheduler for SubtitleScheduler {
    const KIND: LevelType = LevelType::Subtitle;
    const NAME: &'static str = "subtitle-stream";
    const SUBSCRIPTIONS: &'static [EventKind] = &[
        EventKind::StartLoad,
        EventKind::StopLoad,
        EventKind::FragLoaded,
        EventKind::KeyLoaded,
        EventKind::Error,
        EventKind::SubtitleTrackSwitch,
        EventKind::SubtitleTrackLoaded,
        EventKind::MediaAttached,
        EventKind::MediaDetaching,
    ];

    fn tick_interval(&self, _config: &HlsConfig) -> Duration {
        TICK_INTERVAL
    }

    fn on_start_load(
        &mut self,
        _core: &mut SchedulerCore,
        _start_position: Option<f64>,
        _cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        Ok(())
    }

    fn next_fragment(&mut self, core: &SchedulerCore, cx: &mut Context<'_>) -> HlsResult<NextLoad> {
        let session = &*cx.session;
        let Some(media) = session.media.as_deref() else {
            return Ok(NextLoad::Wait);
        };
        let Some(details) = session
            .subtitle_track
            .and_then(|id| session.subtitle_tracks.get(id))
            .and_then(|t| t.details.as_ref())
        else {
            return Ok(NextLoad::Wait);
        };
        let config = &session.config;
        let info = buffer_info(&self.buffered, media.current_time(), config.max_buffer_hole);
        if info.len > config.max_buffer_length.min(config.max_max_buffer_length) {
            return Ok(NextLoad::Wait);
        }
        let fragments = &details.fragments;
        let Some(first) = fragments.first() else {
            return Ok(NextLoad::Wait);
        };

        let prev = core.frag_previous.as_ref();
        let tolerance = config.max_frag_lookup_tolerance;
        let index = if info.end < details.edge() {
            prev.filter(|_| details.has_program_date_time())
                .and_then(Fragment::end_program_date_time)
                .and_then(|pdt| find_fragment_by_pdt(fragments, pdt, tolerance))
                .or_else(|| find_fragment_by_pts(prev, fragments, info.end, tolerance))
                .or_else(|| {
                    // Live window slid past everything loaded so far.
                    prev.filter(|p| p.start < first.start).map(|p| {
                        warn!(previous = p.start, window = first.start, "subtitle playlist gap, restarting at window start");
                        0
                    })
                })
        } else {
            Some(fragments.len() - 1)
        };
        let Some(frag) = index.and_then(|i| fragments.get(i)) else {
            return Ok(NextLoad::Wait);
        };
        if session.tracker.get_state(frag) != FragmentState::NotLoaded {
            return Ok(NextLoad::Wait);
        }
        trace!(frag = %frag.key(), start = frag.start, "next subtitle fragment");
        Ok(NextLoad::Fragment(frag.clone()))
    }

    fn on_fragment_loaded(
        &mut self,
        core: &mut SchedulerCore,
        frag: &Fragment,
        _payload: &Bytes,
        _stats: &LoadStats,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        self.buffered.insert(TimeRange::new(frag.start, frag.end()));
        debug!(frag = %frag.key(), start = frag.start, end = frag.end(), "subtitle fragment processed");
        core.frag_previous = Some(frag.clone());
        core.frag_current = None;
        core.state = SchedulerState::Idle;
        cx.emit(Event::FragParsed { frag: frag.clone() });
        core.request_tick();
        Ok(())
    }

    fn on_event(
        &mut self,
        core: &mut SchedulerCore,
        event: &Event,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        match event {
            Event::SubtitleTrackSwitch { id } => self.on_track_switch(core, *id, cx),
            Event::SubtitleTrackLoaded { .. } | Event::MediaAttached => core.request_tick(),
            Event::MediaDetaching => {
                core.stop(cx);
                self.buffered = TimeRanges::new();
            }
            _ => {}
        }
        Ok(())
    }
}
