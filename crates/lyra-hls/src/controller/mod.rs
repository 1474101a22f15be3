//! Hub components driving playback.

mod abr;
mod buffer;
mod cap_level;
mod fps;
mod level;
mod stream;
mod subtitle;
mod track;
mod tracker;

pub(crate) use self::{
    abr::AbrComponent,
    buffer::BufferController,
    cap_level::CapLevelController,
    fps::FpsController,
    level::LevelController,
    stream::{FragmentScheduler, MainScheduler, SchedulerState},
    subtitle::SubtitleScheduler,
    track::{AudioTrackController, SubtitleTrackController},
    tracker::TrackerHook,
};

#[cfg(test)]
pub(crate) mod harness {
    //! Hub wired to a recording loader and an event collector.

    use std::{collections::HashMap, sync::Arc};

    use bytes::Bytes;
    use lyra_events::EventBus;
    use lyra_platform::{Clock, Instant, ManualClock, Mutex};
    use url::Url;

    use crate::{
        HlsResult,
        buffer::{TimeRange, TimeRanges},
        config::HlsConfig,
        events::{Event, EventKind},
        hub::{Component, Context, Hub},
        loader::{LoadOutcome, LoadRequest, LoadStats, Loader, RequestId},
        media::{AppendData, Media, MediaSink, PlaybackQuality, ReadyState, SinkError},
        model::{Level, StreamType},
        session::Session,
    };

    #[derive(Clone, Default)]
    pub struct Recorder {
        pub loads: Arc<Mutex<Vec<LoadRequest>>>,
        pub aborts: Arc<Mutex<Vec<RequestId>>>,
    }

    impl Loader for Recorder {
        fn load(&mut self, request: LoadRequest) {
            self.loads.lock().push(request);
        }

        fn abort(&mut self, id: RequestId) {
            self.aborts.lock().push(id);
        }
    }

    /// Media buffer keeping one range list per stream.
    #[derive(Clone, Default)]
    pub struct FakeSink {
        pub appended: Arc<Mutex<Vec<AppendData>>>,
        pub ranges: Arc<Mutex<HashMap<StreamType, TimeRanges>>>,
        pub fail: Arc<Mutex<Option<SinkError>>>,
        pub eos: Arc<Mutex<bool>>,
        pub duration: Arc<Mutex<Option<f64>>>,
    }

    impl FakeSink {
        pub fn ranges(&self, stream: StreamType) -> TimeRanges {
            self.ranges.lock().get(&stream).cloned().unwrap_or_default()
        }

        /// Union of every stream.
        pub fn union(&self) -> TimeRanges {
            let mut all = TimeRanges::new();
            for ranges in self.ranges.lock().values() {
                for range in ranges {
                    all.insert(*range);
                }
            }
            all
        }
    }

    impl MediaSink for FakeSink {
        fn append(&mut self, data: &AppendData) -> Result<(), SinkError> {
            if let Some(err) = self.fail.lock().clone() {
                return Err(err);
            }
            if data.end > data.start {
                self.ranges
                    .lock()
                    .entry(data.stream)
                    .or_default()
                    .insert(TimeRange::new(data.start, data.end));
            }
            self.appended.lock().push(data.clone());
            Ok(())
        }

        fn remove(&mut self, stream: StreamType, start: f64, end: f64) -> Result<(), SinkError> {
            if let Some(ranges) = self.ranges.lock().get_mut(&stream) {
                ranges.remove(start, end);
            }
            Ok(())
        }

        fn buffered(&self, stream: StreamType) -> TimeRanges {
            self.ranges(stream)
        }

        fn end_of_stream(&mut self) {
            *self.eos.lock() = true;
        }

        fn set_duration(&mut self, duration: f64) {
            *self.duration.lock() = Some(duration);
        }
    }

    #[derive(Default)]
    pub struct MediaState {
        pub current_time: f64,
        pub paused: bool,
        pub ready_state: ReadyState,
        pub display_size: Option<(u64, u64)>,
        pub quality: Option<PlaybackQuality>,
    }

    /// Playback element whose buffered ranges come from a [`FakeSink`].
    #[derive(Clone, Default)]
    pub struct FakeMedia {
        pub state: Arc<Mutex<MediaState>>,
        pub sink: FakeSink,
    }

    impl FakeMedia {
        pub fn with_sink(sink: &FakeSink) -> Self {
            Self {
                state: Arc::default(),
                sink: sink.clone(),
            }
        }

        pub fn set_time(&self, time: f64) {
            self.state.lock().current_time = time;
        }
    }

    impl Media for FakeMedia {
        fn current_time(&self) -> f64 {
            self.state.lock().current_time
        }

        fn paused(&self) -> bool {
            self.state.lock().paused
        }

        fn ready_state(&self) -> ReadyState {
            self.state.lock().ready_state
        }

        fn buffered(&self) -> TimeRanges {
            self.sink.union()
        }

        fn display_size(&self) -> Option<(u64, u64)> {
            self.state.lock().display_size
        }

        fn playback_quality(&self) -> Option<PlaybackQuality> {
            self.state.lock().quality
        }
    }

    const ALL: &[EventKind] = &[
        EventKind::StartLoad,
        EventKind::StopLoad,
        EventKind::LevelSelect,
        EventKind::ImmediateLevelSwitch,
        EventKind::NextLevelSwitch,
        EventKind::AbortFragLoad,
        EventKind::AudioTrackRequested,
        EventKind::SubtitleTrackRequested,
        EventKind::MediaAttached,
        EventKind::MediaDetaching,
        EventKind::ManifestLoading,
        EventKind::ManifestLoaded,
        EventKind::ManifestParsed,
        EventKind::LevelLoading,
        EventKind::LevelLoaded,
        EventKind::LevelSwitching,
        EventKind::LevelSwitched,
        EventKind::LevelUpdated,
        EventKind::LevelPtsUpdated,
        EventKind::AudioTrackSwitched,
        EventKind::AudioTrackLoading,
        EventKind::AudioTrackLoaded,
        EventKind::SubtitleTrackSwitch,
        EventKind::SubtitleTrackLoading,
        EventKind::SubtitleTrackLoaded,
        EventKind::FragLoading,
        EventKind::FragLoadProgress,
        EventKind::FragLoadEmergencyAborted,
        EventKind::FragLoaded,
        EventKind::FragParsed,
        EventKind::FragBuffered,
        EventKind::FragChanged,
        EventKind::KeyLoading,
        EventKind::KeyLoaded,
        EventKind::BufferAppending,
        EventKind::BufferAppended,
        EventKind::BufferFlushing,
        EventKind::BufferFlushed,
        EventKind::BufferEos,
        EventKind::Error,
        EventKind::FpsDrop,
        EventKind::FpsDropLevelCapping,
    ];

    struct Collector(Arc<Mutex<Vec<Event>>>);

    impl Component for Collector {
        fn name(&self) -> &'static str {
            "collector"
        }

        fn subscriptions(&self) -> &'static [EventKind] {
            ALL
        }

        fn handle(&mut self, event: &Event, _cx: &mut Context<'_>) -> HlsResult<()> {
            self.0.lock().push(event.clone());
            Ok(())
        }
    }

    pub struct Harness {
        pub hub: Hub,
        pub clock: ManualClock,
        pub loader: Recorder,
        pub events: Arc<Mutex<Vec<Event>>>,
    }

    impl Harness {
        pub fn new(config: HlsConfig, components: Vec<Box<dyn Component>>) -> Self {
            let clock = ManualClock::new();
            let session = Session::new(Arc::new(config), Arc::new(clock.clone()));
            let loader = Recorder::default();
            let mut hub = Hub::new(session, Box::new(loader.clone()), EventBus::new(64));
            for component in components {
                hub.register(component);
            }
            let events = Arc::new(Mutex::new(Vec::new()));
            hub.register(Box::new(Collector(Arc::clone(&events))));
            Self {
                hub,
                clock,
                loader,
                events,
            }
        }

        pub fn session(&mut self) -> &mut Session {
            self.hub.session_mut()
        }

        pub fn clock_now(&self) -> Instant {
            self.clock.now()
        }

        /// Attach a fake element and sink sharing one buffer.
        pub fn attach_media(&mut self) -> (FakeMedia, FakeSink) {
            let sink = FakeSink::default();
            let media = FakeMedia::with_sink(&sink);
            let session = self.hub.session_mut();
            session.media = Some(Box::new(media.clone()));
            session.sink = Some(Box::new(sink.clone()));
            (media, sink)
        }

        pub fn loads(&self) -> Vec<LoadRequest> {
            self.loader.loads.lock().clone()
        }

        pub fn emit(&mut self, event: Event) {
            self.hub.emit(event);
        }

        pub fn advance_ms(&mut self, ms: u64) {
            self.clock.advance_ms(ms);
            self.hub.advance();
        }

        /// Drain and return what was dispatched so far.
        pub fn take_events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock())
        }

        pub fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().iter().map(Event::kind).collect()
        }

        pub fn last_load(&self) -> Option<LoadRequest> {
            self.loader.loads.lock().last().cloned()
        }

        pub fn load_count(&self) -> usize {
            self.loader.loads.lock().len()
        }

        pub fn complete(&mut self, id: RequestId, body: &[u8]) {
            let now = self.clock.now();
            let stats = LoadStats::completed(now, now, body.len() as u64);
            self.hub.on_load_complete(
                id,
                LoadOutcome::Success {
                    data: Bytes::copy_from_slice(body),
                    stats,
                },
            );
        }

        pub fn fail(&mut self, id: RequestId, outcome: LoadOutcome) {
            self.hub.on_load_complete(id, outcome);
        }
    }

    pub fn ladder(bitrates: &[u64]) -> Vec<Level> {
        bitrates
            .iter()
            .enumerate()
            .map(|(i, &bitrate)| {
                let url = Url::parse(&format!("https://cdn.example.com/level{i}.m3u8")).unwrap();
                Level::new(url, bitrate)
            })
            .collect()
    }
}
