//! Fragment scheduling.
//!
//! [`FragmentScheduler`] owns the load state machine every track type shares:
//! pick a fragment, fetch its key, fetch the payload, retry on failure. The
//! wrapped [`TrackScheduler`] decides which fragment comes next and what a
//! loaded payload turns into. [`MainScheduler`] drives the audio/video levels.

use std::time::Duration;

use bytes::Bytes;
use lyra_platform::MaybeSend;
use tracing::{debug, error, info, trace, warn};

use crate::{
    HlsResult,
    buffer::{BufferInfo, TimeRanges, buffer_info},
    config::HlsConfig,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    fragment_finders::{find_fragment_by_pdt, find_fragment_by_pts},
    fragment_tracker::FragmentState,
    hub::{Component, Context, TimerKind},
    level_helper::{PtsRange, update_frag_pts_dts},
    loader::LoadStats,
    media::{AppendData, DemuxContext, ReadyState},
    model::{Fragment, FragmentKey, LevelDetails, LevelType, StreamType},
    session::Session,
};

/// Load state of one scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum SchedulerState {
    #[default]
    Stopped,
    Idle,
    KeyLoading,
    FragLoading,
    FragLoadingWaitingRetry,
    WaitingLevel,
    Parsing,
    Parsed,
    Ended,
    Error,
}

/// Outcome of a scheduling decision.
#[derive(Debug)]
pub(crate) enum NextLoad {
    /// Nothing to do until the next tick.
    Wait,
    /// The playlist to pick from is not ready yet.
    WaitLevel,
    Fragment(Fragment),
    /// Everything up to the end of the presentation is buffered.
    Ended,
}

/// Bookkeeping shared by every track scheduler.
#[derive(Debug)]
pub(crate) struct SchedulerCore {
    kind: LevelType,
    pub state: SchedulerState,
    pub frag_current: Option<Fragment>,
    pub frag_previous: Option<Fragment>,
    pub retry: u32,
    tick_requested: bool,
}

impl SchedulerCore {
    fn new(kind: LevelType) -> Self {
        Self {
            kind,
            state: SchedulerState::Stopped,
            frag_current: None,
            frag_previous: None,
            retry: 0,
            tick_requested: false,
        }
    }

    /// Run a tick once the current handler returns.
    pub fn request_tick(&mut self) {
        self.tick_requested = true;
    }

    pub fn is_current(&self, frag: &Fragment) -> bool {
        self.frag_current.as_ref().is_some_and(|f| f.key() == frag.key())
    }

    fn is_loading(&self) -> bool {
        matches!(
            self.state,
            SchedulerState::KeyLoading | SchedulerState::FragLoading
        )
    }

    /// Drop the key or fragment request in flight.
    pub fn abort_current(&mut self, cx: &mut Context<'_>) {
        if self.is_loading() {
            cx.emit(Event::AbortFragLoad { kind: self.kind });
        }
        cx.clear_timer(TimerKind::Retry);
        self.frag_current = None;
    }

    pub fn stop(&mut self, cx: &mut Context<'_>) {
        self.abort_current(cx);
        self.frag_previous = None;
        cx.clear_timer(TimerKind::Tick);
        self.state = SchedulerState::Stopped;
    }

    fn halt(&mut self, cx: &mut Context<'_>) {
        self.abort_current(cx);
        cx.clear_timer(TimerKind::Tick);
        self.state = SchedulerState::Error;
    }

    fn load(&mut self, frag: Fragment, cx: &mut Context<'_>) {
        if frag.encrypted() {
            trace!(frag = %frag.key(), "loading key");
            self.state = SchedulerState::KeyLoading;
            cx.emit(Event::KeyLoading { frag: frag.clone() });
        } else {
            trace!(frag = %frag.key(), "loading fragment");
            self.state = SchedulerState::FragLoading;
            cx.emit(Event::FragLoading { frag: frag.clone() });
        }
        self.frag_current = Some(frag);
    }
}

/// Per track type policy plugged into [`FragmentScheduler`].
pub(crate) trait TrackScheduler: MaybeSend + 'static {
    const KIND: LevelType;
    const NAME: &'static str;
    /// Must include `StartLoad`, `StopLoad`, `FragLoaded`, `KeyLoaded` and `Error`.
    const SUBSCRIPTIONS: &'static [EventKind];

    fn tick_interval(&self, config: &HlsConfig) -> Duration;

    /// Loading (re)starts; leave `core.state` at `Stopped` to refuse.
    fn on_start_load(
        &mut self,
        core: &mut SchedulerCore,
        start_position: Option<f64>,
        cx: &mut Context<'_>,
    ) -> HlsResult<()>;

    fn on_tick(&mut self, _core: &mut SchedulerCore, _cx: &mut Context<'_>) -> HlsResult<()> {
        Ok(())
    }

    /// Called in `Idle` only.
    fn next_fragment(&mut self, core: &SchedulerCore, cx: &mut Context<'_>) -> HlsResult<NextLoad>;

    fn on_fragment_loaded(
        &mut self,
        core: &mut SchedulerCore,
        frag: &Fragment,
        payload: &Bytes,
        stats: &LoadStats,
        cx: &mut Context<'_>,
    ) -> HlsResult<()>;

    /// A load of `frag` failed; retry or fatal escalation is already scheduled.
    fn on_fragment_error(&mut self, _frag: &Fragment, _data: &ErrorData) {}

    fn on_event(
        &mut self,
        _core: &mut SchedulerCore,
        _event: &Event,
        _cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        Ok(())
    }
}

pub(crate) struct FragmentScheduler<T> {
    core: SchedulerCore,
    track: T,
}

impl<T: TrackScheduler> FragmentScheduler<T> {
    pub fn new(track: T) -> Self {
        Self {
            core: SchedulerCore::new(T::KIND),
            track,
        }
    }

    fn tick(&mut self, cx: &mut Context<'_>) -> HlsResult<()> {
        self.core.tick_requested = false;
        if matches!(
            self.core.state,
            SchedulerState::Stopped | SchedulerState::Error
        ) {
            return Ok(());
        }
        self.track.on_tick(&mut self.core, cx)?;
        if self.core.state != SchedulerState::Idle {
            return Ok(());
        }
        match self.track.next_fragment(&self.core, cx)? {
            NextLoad::Wait => {}
            NextLoad::WaitLevel => self.core.state = SchedulerState::WaitingLevel,
            NextLoad::Ended => self.core.state = SchedulerState::Ended,
            NextLoad::Fragment(frag) => self.core.load(frag, cx),
        }
        Ok(())
    }

    fn settle(&mut self, cx: &mut Context<'_>) -> HlsResult<()> {
        if self.core.tick_requested {
            self.tick(cx)?;
        }
        Ok(())
    }

    fn on_start_load(&mut self, start_position: Option<f64>, cx: &mut Context<'_>) -> HlsResult<()> {
        self.core.abort_current(cx);
        self.core.retry = 0;
        self.core.frag_previous = None;
        self.core.state = SchedulerState::Idle;
        self.track.on_start_load(&mut self.core, start_position, cx)?;
        if self.core.state != SchedulerState::Stopped {
            cx.set_interval(TimerKind::Tick, self.track.tick_interval(&cx.session.config));
            self.core.request_tick();
        }
        Ok(())
    }

    /// Returns `false` when the error is not about this scheduler's loads.
    fn on_error(&mut self, data: &ErrorData, cx: &mut Context<'_>) -> bool {
        if data.fatal {
            if self.core.state != SchedulerState::Error {
                debug!(scheduler = T::NAME, details = data.details.as_str(), "stopping on fatal error");
                self.core.halt(cx);
            }
            return true;
        }
        let failed = self
            .core
            .frag_current
            .take_if(|f| data.details.is_fragment_load() && data.frag == Some(f.key()));
        let Some(failed) = failed else {
            return false;
        };

        let policy = cx.session.config.fragment;
        if self.core.retry < policy.max_retry {
            let delay = policy.backoff(self.core.retry);
            self.core.retry += 1;
            warn!(
                scheduler = T::NAME,
                retry = self.core.retry,
                ?delay,
                details = data.details.as_str(),
                "fragment load failed, retrying"
            );
            self.core.state = SchedulerState::FragLoadingWaitingRetry;
            cx.set_timeout(TimerKind::Retry, delay);
        } else {
            error!(
                scheduler = T::NAME,
                details = data.details.as_str(),
                "fragment load failed, giving up"
            );
            self.core.halt(cx);
            cx.error(data.clone().into_fatal());
        }
        self.track.on_fragment_error(&failed, data);
        true
    }
}

impl<T: TrackScheduler> Component for FragmentScheduler<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        T::SUBSCRIPTIONS
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::StartLoad { start_position } => self.on_start_load(*start_position, cx)?,
            Event::StopLoad => {
                self.core.stop(cx);
                self.track.on_event(&mut self.core, event, cx)?;
            }
            Event::FragLoaded {
                frag,
                payload,
                stats,
            } if frag.kind == T::KIND => {
                if self.core.state != SchedulerState::FragLoading || !self.core.is_current(frag) {
                    trace!(frag = %frag.key(), "late fragment dropped");
                    return Ok(());
                }
                self.core.retry = 0;
                self.track
                    .on_fragment_loaded(&mut self.core, frag, payload, stats, cx)?;
            }
            Event::KeyLoaded { frag } if frag.kind == T::KIND => {
                if self.core.state == SchedulerState::KeyLoading && self.core.is_current(frag) {
                    self.core.load(frag.clone(), cx);
                }
            }
            Event::Error(data) => {
                if !self.on_error(data, cx) {
                    self.track.on_event(&mut self.core, event, cx)?;
                }
            }
            _ => self.track.on_event(&mut self.core, event, cx)?,
        }
        self.settle(cx)
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        match timer {
            TimerKind::Tick => self.tick(cx),
            TimerKind::Retry if self.core.state == SchedulerState::FragLoadingWaitingRetry => {
                self.core.state = SchedulerState::Idle;
                self.tick(cx)
            }
            _ => Ok(()),
        }
    }
}

/// Largest forward buffer to keep for a level of `bitrate` bits per second.
fn max_buffer_length(config: &HlsConfig, bitrate: u64) -> f64 {
    #[expect(clippy::cast_precision_loss)]
    let by_size = if bitrate > 0 {
        8.0 * config.max_buffer_size as f64 / bitrate as f64
    } else {
        0.0
    };
    by_size
        .max(config.max_buffer_length)
        .min(config.max_max_buffer_length)
}

/// Live start point: `live_sync_duration_count` target durations behind the edge.
fn live_sync_position(config: &HlsConfig, details: &LevelDetails) -> f64 {
    let behind = f64::from(config.live_sync_duration_count) * details.target_duration;
    (details.edge() - behind).max(details.window_start())
}

fn start_position(config: &HlsConfig, details: &LevelDetails) -> f64 {
    if let Some(offset) = details.start_time_offset {
        let position = if offset < 0.0 {
            details.edge() + offset
        } else {
            details.window_start() + offset
        };
        return position.clamp(details.window_start(), details.edge());
    }
    if details.live {
        live_sync_position(config, details)
    } else {
        details.window_start()
    }
}

enum Plan {
    Wait,
    Select(usize),
    Eos,
    Load(Fragment),
}

struct Parsing {
    frag: Fragment,
    stats: LoadStats,
    /// Appends not acknowledged yet.
    pending: usize,
}

/// Schedules main (audio/video) fragments of the current level.
#[derive(Default)]
pub(crate) struct MainScheduler {
    next_load_position: f64,
    /// Explicit start position, resolved against the first playlist otherwise.
    start_position: Option<f64>,
    /// Where loading restarts until the media has produced data.
    start_load_position: f64,
    start_resolved: bool,
    start_frag_requested: bool,
    bitrate_test: bool,
    level_last_loaded: Option<usize>,
    /// Media produced data at least once; positions come from it from now on.
    loaded_metadata: bool,
    flushing: bool,
    parsing: Option<Parsing>,
    playing: Option<FragmentKey>,
}

impl MainScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn level_ready(&self, session: &Session, level: usize) -> bool {
        let Some(details) = session.levels.get(level).and_then(|l| l.details.as_ref()) else {
            return false;
        };
        session.current_level == Some(level)
            && (!details.live || self.level_last_loaded == Some(level))
    }

    fn reached_end(core: &SchedulerCore, details: &LevelDetails, info: &BufferInfo) -> bool {
        if details.live || info.next_start.is_some() {
            return false;
        }
        let Some(prev) = core.frag_previous.as_ref() else {
            return false;
        };
        prev.media_sn() == Some(details.end_sn)
            && !prev.backtracked
            && prev.end() - info.end.max(prev.start) <= prev.duration.max(0.2)
    }

    fn plan(&self, core: &SchedulerCore, session: &Session) -> Plan {
        let config = &session.config;
        let media = session.media.as_deref();
        if media.is_none() && (self.start_frag_requested || !config.start_fragment_prefetch) {
            return Plan::Wait;
        }
        let position = match media {
            Some(media) if self.loaded_metadata => media.current_time(),
            _ => self.next_load_position,
        };
        let buffered = media.map_or_else(TimeRanges::new, |m| m.buffered());
        let info = buffer_info(&buffered, position, config.max_buffer_hole);

        let level_index = session.next_load_level();
        let Some(level) = session.levels.get(level_index) else {
            return Plan::Wait;
        };
        let max_len = max_buffer_length(config, level.bitrate);
        if info.len >= max_len {
            trace!(len = info.len, max_len, "forward buffer full");
            return Plan::Wait;
        }
        if !self.level_ready(session, level_index) {
            return Plan::Select(level_index);
        }
        let Some(details) = level.details.as_ref() else {
            return Plan::Select(level_index);
        };
        if Self::reached_end(core, details, &info) {
            return Plan::Eos;
        }
        if let Some(init) = details.init_segment.as_ref().filter(|i| i.data.is_none()) {
            return Plan::Load(init.clone());
        }

        let fragments = &details.fragments;
        if fragments.is_empty() {
            return Plan::Wait;
        }
        let tolerance = config.max_frag_lookup_tolerance;
        let mut buffer_end = info.end;
        if details.live && buffer_end < details.window_start() - tolerance {
            let sync = live_sync_position(config, details);
            warn!(buffer_end, sync, "playback fell out of the live window, resyncing");
            buffer_end = sync;
        }

        let prev = core.frag_previous.as_ref();
        let edge = details.edge();
        let mut index = if buffer_end < edge {
            let tolerance = if buffer_end > edge - tolerance {
                0.0
            } else {
                tolerance
            };
            prev.filter(|_| details.has_program_date_time())
                .and_then(Fragment::end_program_date_time)
                .and_then(|pdt| find_fragment_by_pdt(fragments, pdt, tolerance))
                .or_else(|| find_fragment_by_pts(prev, fragments, buffer_end, tolerance))
        } else {
            Some(fragments.len() - 1)
        };

        if let (Some(i), Some(prev)) = (index, prev) {
            let candidate = &fragments[i];
            if candidate.sn == prev.sn && candidate.level == prev.level && !candidate.backtracked {
                index = (i + 1 < fragments.len()).then_some(i + 1);
            }
        }
        let Some(frag) = index.and_then(|i| fragments.get(i)) else {
            return Plan::Wait;
        };
        match session.tracker.get_state(frag) {
            FragmentState::Ok | FragmentState::Appending => {
                trace!(frag = %frag.key(), "fragment already buffered");
                Plan::Wait
            }
            FragmentState::NotLoaded | FragmentState::Partial => Plan::Load(frag.clone()),
        }
    }

    fn on_level_updated(&mut self, core: &mut SchedulerCore, level: usize, cx: &mut Context<'_>) {
        self.level_last_loaded = Some(level);
        let session = &*cx.session;
        if !self.start_resolved
            && let Some(details) = session.levels.get(level).and_then(|l| l.details.as_ref())
        {
            let position = self
                .start_position
                .unwrap_or_else(|| start_position(&session.config, details));
            info!(position, live = details.live, "start position resolved");
            self.next_load_position = position;
            self.start_load_position = position;
            self.start_resolved = true;
        }
        if core.state == SchedulerState::WaitingLevel {
            core.state = SchedulerState::Idle;
        }
        core.request_tick();
    }

    fn on_init_loaded(
        core: &mut SchedulerCore,
        frag: &Fragment,
        payload: &Bytes,
        cx: &mut Context<'_>,
    ) {
        let Some(level) = cx.session.levels.get_mut(frag.level) else {
            return;
        };
        if let Some(init) = level
            .details
            .as_mut()
            .and_then(|d| d.init_segment.as_mut())
        {
            init.data = Some(payload.clone());
        }
        let stream = if level.video_codec.is_none() && level.audio_codec.is_some() {
            StreamType::Audio
        } else {
            StreamType::Video
        };
        debug!(level = frag.level, bytes = payload.len(), "init segment loaded");
        cx.emit(Event::BufferAppending(AppendData {
            stream,
            kind: LevelType::Main,
            data: payload.clone(),
            start: 0.0,
            end: 0.0,
        }));
        core.frag_current = None;
        core.state = SchedulerState::Idle;
        core.request_tick();
    }

    fn on_parse_failed(
        &mut self,
        core: &mut SchedulerCore,
        frag: Fragment,
        reason: String,
        cx: &mut Context<'_>,
    ) {
        warn!(frag = %frag.key(), %reason, "fragment parsing failed");
        cx.session.tracker.remove_fragment(&frag);
        cx.error(
            ErrorData::new(ErrorKind::Media, ErrorDetails::FragParsingError, false)
                .with_level(frag.level)
                .with_frag(frag.key())
                .with_reason(reason),
        );
        self.next_load_position = frag.end();
        core.frag_previous = Some(frag);
        core.frag_current = None;
        core.state = SchedulerState::Idle;
        core.request_tick();
    }

    fn finish_buffered(&mut self, core: &mut SchedulerCore, cx: &mut Context<'_>) {
        let Some(Parsing {
            frag, mut stats, ..
        }) = self.parsing.take()
        else {
            return;
        };
        stats.tbuffered = Some(cx.now());
        self.loaded_metadata |= cx.session.media.is_some();
        debug!(frag = %frag.key(), start = frag.start, end = frag.end(), "fragment buffered");
        core.frag_previous = Some(frag.clone());
        core.frag_current = None;
        core.state = SchedulerState::Idle;
        cx.emit(Event::FragBuffered { frag, stats });
        core.request_tick();
    }

    fn check_fragment_changed(&mut self, cx: &mut Context<'_>) {
        let session = &*cx.session;
        let Some(media) = session.media.as_deref() else {
            return;
        };
        if media.ready_state() < ReadyState::HaveMetadata || media.seeking() {
            return;
        }
        let position = media.current_time();
        let Some(frag) = session
            .tracker
            .get_buffered_frag(position, LevelType::Main)
            .or_else(|| session.tracker.get_buffered_frag(position + 0.1, LevelType::Main))
        else {
            return;
        };
        let key = frag.key();
        if self.playing == Some(key) {
            return;
        }
        let switched = self.playing.is_none_or(|p| p.level != key.level);
        let frag = frag.clone();
        self.playing = Some(key);
        cx.emit(Event::FragChanged { frag });
        if switched {
            info!(level = key.level, "level switched");
            cx.emit(Event::LevelSwitched { level: key.level });
        }
    }

    fn flush(&mut self, core: &mut SchedulerCore, start: f64, cx: &mut Context<'_>) {
        core.abort_current(cx);
        self.parsing = None;
        self.flushing = true;
        core.state = SchedulerState::Idle;
        debug!(start, "flushing forward buffer");
        cx.emit(Event::BufferFlushing {
            start,
            end: f64::INFINITY,
        });
    }

    fn on_next_level_switch(&mut self, core: &mut SchedulerCore, cx: &mut Context<'_>) {
        let session = &*cx.session;
        let playing_end = session.media.as_deref().and_then(|media| {
            session
                .tracker
                .get_buffered_frag(media.current_time(), LevelType::Main)
                .map(|f| f.end_pts.unwrap_or_else(|| f.end()))
        });
        match playing_end {
            Some(end) => self.flush(core, end, cx),
            None => core.request_tick(),
        }
    }
}

impl TrackScheduler for MainScheduler {
    const KIND: LevelType = LevelType::Main;
    const NAME: &'static str = "stream";
    const SUBSCRIPTIONS: &'static [EventKind] = &[
        EventKind::StartLoad,
        EventKind::StopLoad,
        EventKind::FragLoaded,
        EventKind::KeyLoaded,
        EventKind::Error,
        EventKind::ManifestLoading,
        EventKind::ManifestParsed,
        EventKind::LevelSwitching,
        EventKind::LevelUpdated,
        EventKind::BufferAppended,
        EventKind::BufferFlushed,
        EventKind::ImmediateLevelSwitch,
        EventKind::NextLevelSwitch,
        EventKind::FragLoadEmergencyAborted,
        EventKind::MediaAttached,
        EventKind::MediaDetaching,
    ];

    fn tick_interval(&self, config: &HlsConfig) -> Duration {
        config.tick_interval
    }

    fn on_start_load(
        &mut self,
        core: &mut SchedulerCore,
        start_position: Option<f64>,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        let session = &mut *cx.session;
        if session.levels.is_empty() {
            warn!("start load without levels");
            core.state = SchedulerState::Stopped;
            return Ok(());
        }
        let start_level = session.start_level();
        let level = start_level.unwrap_or(0);
        if session.auto_level_enabled() {
            session.abr.set_next_auto_level(Some(level));
        }
        self.bitrate_test = start_level.is_none();
        self.start_position = start_position.or(session.config.start_position);
        self.next_load_position = self.start_position.unwrap_or(0.0);
        self.start_load_position = self.next_load_position;
        self.start_resolved = self.start_position.is_some();
        self.start_frag_requested = false;
        self.flushing = false;
        self.parsing = None;
        info!(level, bitrate_test = self.bitrate_test, start = ?self.start_position, "starting load");
        cx.emit(Event::LevelSelect { level });
        Ok(())
    }

    fn on_tick(&mut self, core: &mut SchedulerCore, cx: &mut Context<'_>) -> HlsResult<()> {
        if core.state == SchedulerState::WaitingLevel {
            let session = &*cx.session;
            if self.level_ready(session, session.next_load_level()) {
                core.state = SchedulerState::Idle;
            }
        }
        self.check_fragment_changed(cx);
        Ok(())
    }

    fn next_fragment(&mut self, core: &SchedulerCore, cx: &mut Context<'_>) -> HlsResult<NextLoad> {
        if self.flushing {
            return Ok(NextLoad::Wait);
        }
        match self.plan(core, cx.session) {
            Plan::Wait => Ok(NextLoad::Wait),
            Plan::Select(level) => {
                let session = &*cx.session;
                let missing = session.levels.get(level).is_none_or(|l| l.details.is_none());
                if session.current_level != Some(level) || missing {
                    debug!(level, "waiting for level playlist");
                    cx.emit(Event::LevelSelect { level });
                }
                Ok(NextLoad::WaitLevel)
            }
            Plan::Eos => {
                info!("last fragment buffered");
                cx.emit(Event::BufferEos);
                Ok(NextLoad::Ended)
            }
            Plan::Load(mut frag) => {
                frag.auto_level = cx.session.auto_level_enabled();
                if !frag.sn.is_init() {
                    frag.bitrate_test = self.bitrate_test;
                    if !frag.bitrate_test {
                        self.next_load_position = frag.end();
                    }
                    self.start_frag_requested = true;
                }
                debug!(
                    frag = %frag.key(),
                    start = frag.start,
                    bitrate_test = frag.bitrate_test,
                    "next fragment"
                );
                Ok(NextLoad::Fragment(frag))
            }
        }
    }

    fn on_fragment_loaded(
        &mut self,
        core: &mut SchedulerCore,
        frag: &Fragment,
        payload: &Bytes,
        stats: &LoadStats,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        if frag.sn.is_init() {
            Self::on_init_loaded(core, frag, payload, cx);
            return Ok(());
        }
        if frag.bitrate_test {
            debug!(frag = %frag.key(), "bitrate test done");
            self.bitrate_test = false;
            self.start_frag_requested = false;
            core.frag_current = None;
            core.state = SchedulerState::Idle;
            core.request_tick();
            return Ok(());
        }

        core.state = SchedulerState::Parsing;
        let mut frag = frag.clone();
        let mut stats = *stats;
        let session = &mut *cx.session;
        let level = session.levels.get(frag.level);
        let demux_cx = DemuxContext {
            frag: &frag,
            init_segment: level
                .and_then(|l| l.details.as_ref())
                .and_then(|d| d.init_segment.as_ref())
                .and_then(|i| i.data.as_ref()),
            audio_codec: level.and_then(|l| l.audio_codec.as_deref()),
            video_codec: level.and_then(|l| l.video_codec.as_deref()),
            decrypt: frag.decrypt.as_ref(),
        };
        let output = match session.demuxer.demux(payload.clone(), &demux_cx) {
            Ok(output) => output,
            Err(err) => {
                self.on_parse_failed(core, frag, err.to_string(), cx);
                return Ok(());
            }
        };

        let mut events = Vec::with_capacity(output.tracks.len() * 2);
        let mut appends = Vec::with_capacity(output.tracks.len());
        for track in output.tracks {
            frag.elementary_streams.set(track.stream);
            let details = session
                .levels
                .get_mut(frag.level)
                .and_then(|l| l.details.as_mut());
            let range = PtsRange::new(track.start_pts, track.end_pts, track.start_dts, track.end_dts);
            let drift = update_frag_pts_dts(details, &mut frag, range);
            events.push(Event::LevelPtsUpdated {
                kind: LevelType::Main,
                level: frag.level,
                drift,
                start: track.start_pts,
                end: track.end_pts,
            });
            appends.push(AppendData {
                stream: track.stream,
                kind: LevelType::Main,
                data: track.data,
                start: track.start_pts,
                end: track.end_pts,
            });
        }
        stats.tparsed = Some(cx.now());

        trace!(frag = %frag.key(), tracks = appends.len(), "fragment parsed");
        let pending = appends.len();
        core.frag_current = Some(frag.clone());
        self.parsing = Some(Parsing {
            frag: frag.clone(),
            stats,
            pending,
        });
        for event in events {
            cx.emit(event);
        }
        for append in appends {
            cx.emit(Event::BufferAppending(append));
        }
        cx.emit(Event::FragParsed { frag });
        core.state = SchedulerState::Parsed;
        if pending == 0 {
            self.finish_buffered(core, cx);
        }
        Ok(())
    }

    fn on_fragment_error(&mut self, frag: &Fragment, _data: &ErrorData) {
        if frag.bitrate_test || !self.loaded_metadata {
            self.start_frag_requested = false;
        }
        if !self.loaded_metadata {
            self.next_load_position = self.start_load_position;
        }
    }

    fn on_event(
        &mut self,
        core: &mut SchedulerCore,
        event: &Event,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        match event {
            Event::ManifestLoading { .. } => {
                core.stop(cx);
                self.reset();
            }
            Event::ManifestParsed { .. } => {
                if cx.session.config.auto_start_load {
                    cx.emit(Event::StartLoad {
                        start_position: None,
                    });
                }
            }
            Event::StopLoad => {
                self.parsing = None;
                self.flushing = false;
                self.start_frag_requested = false;
            }
            Event::LevelSwitching { .. } => core.request_tick(),
            Event::LevelUpdated { level } => self.on_level_updated(core, *level, cx),
            Event::BufferAppended { .. } => {
                let Some(parsing) = self.parsing.as_mut() else {
                    return Ok(());
                };
                parsing.pending = parsing.pending.saturating_sub(1);
                if parsing.pending == 0 && core.state == SchedulerState::Parsed {
                    self.finish_buffered(core, cx);
                }
            }
            Event::BufferFlushed => {
                if self.flushing {
                    self.flushing = false;
                    core.frag_previous = None;
                    core.request_tick();
                }
            }
            Event::ImmediateLevelSwitch => self.flush(core, 0.0, cx),
            Event::NextLevelSwitch => self.on_next_level_switch(core, cx),
            Event::FragLoadEmergencyAborted { frag } if core.is_current(frag) => {
                debug!(frag = %frag.key(), "fragment load abandoned");
                core.frag_current = None;
                core.state = SchedulerState::Idle;
                if !self.loaded_metadata {
                    self.start_frag_requested = false;
                    self.next_load_position = self.start_load_position;
                }
                core.request_tick();
            }
            Event::MediaAttached => core.request_tick(),
            Event::MediaDetaching => {
                core.stop(cx);
                self.loaded_metadata = false;
                self.parsing = None;
                self.playing = None;
                self.flushing = false;
            }
            _ => {}
        }
        Ok(())
    }
}
