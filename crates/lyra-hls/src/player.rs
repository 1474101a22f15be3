//! Public player facade.

use std::sync::Arc;

use lyra_events::{Event as BusEvent, EventBus};
use lyra_platform::{Instant, SharedClock, SystemClock};
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::{HlsConfig, StartLevel},
    controller::{
        AbrComponent, AudioTrackController, BufferController, CapLevelController, FpsController,
        FragmentScheduler, LevelController, MainScheduler, SubtitleScheduler,
        SubtitleTrackController, TrackerHook,
    },
    events::Event,
    hub::Hub,
    loader::{FragmentLoader, KeyLoader, LoadOutcome, LoadStats, Loader, PlaylistLoader, RequestId},
    media::{CodecSupport, Demuxer, Media, MediaSink},
    model::{Level, MediaTrack},
    session::Session,
};

/// Builder for [`Hls`] with optional platform overrides.
pub struct HlsBuilder {
    config: HlsConfig,
    clock: Option<SharedClock>,
    demuxer: Option<Box<dyn Demuxer>>,
    codecs: Option<Box<dyn CodecSupport>>,
}

impl HlsBuilder {
    pub fn new(config: HlsConfig) -> Self {
        Self {
            config,
            clock: None,
            demuxer: None,
            codecs: None,
        }
    }

    /// Time source; [`SystemClock`] when unset.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn demuxer(mut self, demuxer: impl Demuxer + 'static) -> Self {
        self.demuxer = Some(Box::new(demuxer));
        self
    }

    #[must_use]
    pub fn codecs(mut self, codecs: impl CodecSupport + 'static) -> Self {
        self.codecs = Some(Box::new(codecs));
        self
    }

    pub fn build(self, loader: impl Loader + 'static) -> Hls {
        let bus = EventBus::new(self.config.events_channel_capacity);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut session = Session::new(Arc::new(self.config), clock);
        if let Some(demuxer) = self.demuxer {
            session.demuxer = demuxer;
        }
        if let Some(codecs) = self.codecs {
            session.codecs = codecs;
        }

        let mut hub = Hub::new(session, Box::new(loader), bus);
        hub.register(Box::new(LevelController::new()));
        hub.register(Box::new(PlaylistLoader::new()));
        hub.register(Box::new(FragmentLoader::new()));
        hub.register(Box::new(KeyLoader::new()));
        hub.register(Box::new(TrackerHook::new()));
        hub.register(Box::new(BufferController::new()));
        hub.register(Box::new(AbrComponent::new()));
        hub.register(Box::new(FragmentScheduler::new(MainScheduler::default())));
        hub.register(Box::new(AudioTrackController::new()));
        hub.register(Box::new(SubtitleTrackController::new()));
        hub.register(Box::new(FragmentScheduler::new(SubtitleScheduler::new())));
        hub.register(Box::new(CapLevelController::new()));
        hub.register(Box::new(FpsController::new()));
        Hls { hub }
    }
}

/// HLS player core.
///
/// Synchronous and single threaded: every call dispatches the resulting
/// events to completion before returning. I/O goes through the [`Loader`]
/// given at construction; the host reports progress and outcomes back with
/// [`Hls::on_load_progress`] and [`Hls::on_load_complete`], and calls
/// [`Hls::advance`] once [`Hls::next_deadline`] has passed.
pub struct Hls {
    hub: Hub,
}

impl Hls {
    pub fn new(config: HlsConfig, loader: impl Loader + 'static) -> Self {
        HlsBuilder::new(config).build(loader)
    }

    pub fn builder(config: HlsConfig) -> HlsBuilder {
        HlsBuilder::new(config)
    }

    pub fn config(&self) -> &HlsConfig {
        &self.session().config
    }

    /// Subscribe to the observer bus.
    pub fn events(&self) -> broadcast::Receiver<BusEvent> {
        self.hub.bus().subscribe()
    }

    /// Start loading the multivariant (or media) playlist at `url`.
    pub fn load_source(&mut self, url: Url) {
        info!(%url, "loading source");
        if self.session().url.is_some() {
            self.hub.emit(Event::StopLoad);
        }
        let session = self.hub.session_mut();
        session.reset_source();
        session.url = Some(url.clone());
        self.hub.emit(Event::ManifestLoading { url });
    }

    pub fn url(&self) -> Option<&Url> {
        self.session().url.as_ref()
    }

    pub fn attach_media(&mut self, media: impl Media + 'static, sink: impl MediaSink + 'static) {
        if self.session().media.is_some() {
            self.detach_media();
        }
        debug!("attaching media");
        let session = self.hub.session_mut();
        session.media = Some(Box::new(media));
        session.sink = Some(Box::new(sink));
        self.hub.emit(Event::MediaAttached);
    }

    pub fn detach_media(&mut self) {
        if self.session().media.is_none() {
            return;
        }
        debug!("detaching media");
        self.hub.emit(Event::MediaDetaching);
        let session = self.hub.session_mut();
        session.media = None;
        session.sink = None;
    }

    /// Re-attach the current media after a fatal media error.
    pub fn recover_media_error(&mut self) {
        let session = self.session();
        if session.media.is_none() || session.sink.is_none() {
            return;
        }
        info!("recovering from media error");
        self.hub.emit(Event::MediaDetaching);
        self.hub.emit(Event::MediaAttached);
    }

    /// Begin (or resume) loading; `None` picks the configured or live start.
    pub fn start_load(&mut self, start_position: Option<f64>) {
        self.hub.emit(Event::StartLoad { start_position });
    }

    pub fn stop_load(&mut self) {
        self.hub.emit(Event::StopLoad);
    }

    pub fn on_load_progress(&mut self, id: RequestId, stats: &LoadStats) {
        self.hub.on_load_progress(id, stats);
    }

    pub fn on_load_complete(&mut self, id: RequestId, outcome: LoadOutcome) {
        self.hub.on_load_complete(id, outcome);
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.hub.next_deadline()
    }

    /// Fire the timers that are due.
    pub fn advance(&mut self) {
        self.hub.advance();
    }

    pub fn levels(&self) -> &[Level] {
        &self.session().levels
    }

    /// Level whose playlist is loaded and refreshed.
    pub fn current_level(&self) -> Option<usize> {
        self.session().current_level
    }

    /// Switch now, dropping the forward buffer. `None` returns to auto mode.
    pub fn set_current_level(&mut self, level: Option<usize>) {
        if self.select_manual(level) {
            self.hub.emit(Event::ImmediateLevelSwitch);
        }
    }

    /// Switch after the fragment being played. `None` returns to auto mode.
    pub fn set_next_level(&mut self, level: Option<usize>) {
        if self.select_manual(level) {
            self.hub.emit(Event::NextLevelSwitch);
        }
    }

    /// Level of the playlist being loaded.
    pub fn load_level(&self) -> Option<usize> {
        self.session().current_level
    }

    /// Load `level` from the next fragment on, keeping the buffer.
    pub fn set_load_level(&mut self, level: Option<usize>) {
        self.select_manual(level);
    }

    /// Level the next fragment load will use.
    pub fn next_load_level(&self) -> usize {
        self.session().next_load_level()
    }

    /// Force the next automatic choice once.
    pub fn set_next_load_level(&mut self, level: usize) {
        self.hub.session_mut().abr.set_next_auto_level(Some(level));
    }

    pub fn first_level(&self) -> usize {
        self.session().first_level
    }

    /// `None` means the start level is picked by a bitrate test.
    pub fn start_level(&self) -> Option<usize> {
        self.session().start_level()
    }

    pub fn set_start_level(&mut self, level: StartLevel) {
        self.hub.session_mut().start_level_override = Some(level);
    }

    pub fn manual_level(&self) -> Option<usize> {
        self.session().manual_level
    }

    pub fn auto_level_enabled(&self) -> bool {
        self.session().auto_level_enabled()
    }

    pub fn auto_level_capping(&self) -> Option<usize> {
        self.session().auto_level_capping
    }

    pub fn set_auto_level_capping(&mut self, cap: Option<usize>) {
        self.hub.session_mut().auto_level_capping = cap;
    }

    pub fn min_auto_level(&self) -> usize {
        self.session().min_auto_level()
    }

    pub fn max_auto_level(&self) -> usize {
        self.session().max_auto_level()
    }

    pub fn next_auto_level(&self) -> usize {
        self.session().next_auto_level()
    }

    /// Current bandwidth estimate in bits per second.
    pub fn bandwidth_estimate(&self) -> f64 {
        self.session().abr.bandwidth_estimate()
    }

    pub fn audio_tracks(&self) -> &[MediaTrack] {
        &self.session().audio_tracks
    }

    pub fn audio_track(&self) -> Option<usize> {
        self.session().audio_track
    }

    pub fn set_audio_track(&mut self, id: usize) {
        self.hub.emit(Event::AudioTrackRequested { id });
    }

    pub fn subtitle_tracks(&self) -> &[MediaTrack] {
        &self.session().subtitle_tracks
    }

    pub fn subtitle_track(&self) -> Option<usize> {
        self.session().subtitle_track
    }

    /// `None` disables subtitles.
    pub fn set_subtitle_track(&mut self, id: Option<usize>) {
        self.hub.emit(Event::SubtitleTrackRequested { id });
    }

    pub(crate) fn clock(&self) -> SharedClock {
        Arc::clone(&self.session().clock)
    }

    fn session(&self) -> &Session {
        self.hub.session()
    }

    /// Enter manual mode on `level`, or auto mode for `None`.
    /// Returns whether a level was selected.
    fn select_manual(&mut self, level: Option<usize>) -> bool {
        let session = self.hub.session_mut();
        session.manual_level = level;
        let Some(level) = level else {
            debug!("auto level selection enabled");
            return false;
        };
        session.abr.set_next_auto_level(None);
        self.hub.emit(Event::LevelSelect { level });
        true
    }
}

#[cfg(test)]
mod tests {
    use lyra_events::HlsEvent;
    use lyra_platform::{Clock, ManualClock};

    use super::*;
    use crate::controller::harness::{FakeMedia, FakeSink, Recorder};

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360\n\
low.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\n\
mid.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=3000000,RESOLUTION=1920x1080\n\
high.m3u8\n";

    fn media_playlist() -> String {
        let mut playlist =
            String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n");
        for i in 0..5 {
            playlist.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
        }
        playlist.push_str("#EXT-X-ENDLIST\n");
        playlist
    }

    fn player() -> (Hls, Recorder, ManualClock) {
        let clock = ManualClock::new();
        let loader = Recorder::default();
        let hls = Hls::builder(HlsConfig::default())
            .clock(Arc::new(clock.clone()))
            .build(loader.clone());
        (hls, loader, clock)
    }

    fn complete(hls: &mut Hls, loader: &Recorder, clock: &ManualClock, body: &str) {
        let request = loader.loads.lock().last().cloned().expect("pending request");
        let now = clock.now();
        hls.on_load_complete(
            request.id,
            LoadOutcome::Success {
                data: bytes::Bytes::copy_from_slice(body.as_bytes()),
                stats: LoadStats::completed(now, now, body.len() as u64),
            },
        );
    }

    #[test]
    fn source_load_parses_ladder_and_requests_first_level() {
        let (mut hls, loader, clock) = player();
        let mut rx = hls.events();
        let sink = FakeSink::default();
        hls.attach_media(FakeMedia::with_sink(&sink), sink.clone());
        hls.set_start_level(StartLevel::First);
        hls.load_source(Url::parse("https://cdn.example.com/master.m3u8").unwrap());
        assert_eq!(loader.loads.lock().len(), 1);

        complete(&mut hls, &loader, &clock, MASTER);
        assert_eq!(hls.levels().len(), 3);
        assert_eq!(hls.first_level(), 0);
        assert_eq!(hls.current_level(), Some(0));
        let last = loader.loads.lock().last().cloned().unwrap();
        assert!(last.url.as_str().ends_with("low.m3u8"));

        complete(&mut hls, &loader, &clock, &media_playlist());
        let last = loader.loads.lock().last().cloned().unwrap();
        assert!(last.url.as_str().ends_with("seg0.ts"), "{}", last.url);

        let mut parsed = false;
        while let Ok(event) = rx.try_recv() {
            if let BusEvent::Hls(HlsEvent::ManifestParsed { bitrates, .. }) = event {
                assert_eq!(bitrates, vec![500_000, 1_500_000, 3_000_000]);
                parsed = true;
            }
        }
        assert!(parsed);
    }

    #[test]
    fn manual_level_selection_switches_playlist() {
        let (mut hls, loader, clock) = player();
        hls.set_start_level(StartLevel::First);
        hls.load_source(Url::parse("https://cdn.example.com/master.m3u8").unwrap());
        complete(&mut hls, &loader, &clock, MASTER);
        assert!(hls.auto_level_enabled());

        hls.set_load_level(Some(2));
        assert_eq!(hls.manual_level(), Some(2));
        assert_eq!(hls.current_level(), Some(2));
        assert_eq!(hls.next_load_level(), 2);
        let last = loader.loads.lock().last().cloned().unwrap();
        assert!(last.url.as_str().ends_with("high.m3u8"));

        hls.set_load_level(None);
        assert!(hls.auto_level_enabled());
    }

    #[test]
    fn capping_limits_auto_range() {
        let (mut hls, loader, clock) = player();
        hls.load_source(Url::parse("https://cdn.example.com/master.m3u8").unwrap());
        complete(&mut hls, &loader, &clock, MASTER);
        assert_eq!(hls.max_auto_level(), 2);
        hls.set_auto_level_capping(Some(1));
        assert_eq!(hls.max_auto_level(), 1);
        assert_eq!(hls.min_auto_level(), 0);
    }
}
