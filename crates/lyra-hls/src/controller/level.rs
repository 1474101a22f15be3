//! Quality ladder ownership: manifest filtering, level switching, playlist
//! reloads and recovery from level or fragment failures.

use std::{collections::HashMap, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    HlsResult,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    hub::{Component, Context, TimerKind},
    level_helper::{align_pdt, compute_reload_interval, merge_details},
    loader::LoadStats,
    media::{CodecKind, CodecSupport},
    model::{Level, LevelDetails, LevelType, MediaTrack},
    parsing::ParsedManifest,
};

#[derive(Debug, Default)]
pub(crate) struct LevelController {
    /// Consecutive level playlist failures.
    retry: u32,
    /// Last level whose playlist arrived, for PDT alignment of new levels.
    last_loaded: Option<usize>,
}

impl LevelController {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_manifest_loaded(
        &mut self,
        manifest: &ParsedManifest,
        details: Option<&LevelDetails>,
        cx: &mut Context<'_>,
    ) {
        let mut levels: Vec<Level> = Vec::new();
        let mut by_bitrate: HashMap<u64, usize> = HashMap::new();
        let (mut video_found, mut audio_found) = (false, false);

        for variant in &manifest.variants {
            video_found |= variant.video_codec.is_some();
            audio_found |= variant.audio_codec.is_some();
            if let Some(&index) = by_bitrate.get(&variant.bitrate) {
                let level = &mut levels[index];
                level.urls.push(variant.url.clone());
                level.audio_group_ids.push(variant.audio_group.clone());
                level.text_group_ids.push(variant.text_group.clone());
                continue;
            }
            let mut level = Level::new(variant.url.clone(), variant.bitrate);
            level.width = variant.width;
            level.height = variant.height;
            level.name = variant.name.clone();
            level.codecs = variant.codecs.clone();
            level.video_codec = variant.video_codec.clone();
            level.audio_codec = variant.audio_codec.clone();
            level.audio_group_ids = vec![variant.audio_group.clone()];
            level.text_group_ids = vec![variant.text_group.clone()];
            by_bitrate.insert(variant.bitrate, levels.len());
            levels.push(level);
        }

        // Audio-only variants next to muxed ones are fallbacks, not ladder steps.
        if video_found && audio_found {
            levels.retain(|l| l.video_codec.is_some());
        }
        let codecs = cx.session.codecs.as_ref();
        levels.retain(|l| {
            supported(codecs, l.audio_codec.as_deref(), CodecKind::Audio)
                && supported(codecs, l.video_codec.as_deref(), CodecKind::Video)
        });

        let mut audio_tracks: Vec<MediaTrack> = manifest
            .audio_tracks
            .iter()
            .filter(|t| supported(codecs, t.audio_codec.as_deref(), CodecKind::Audio))
            .cloned()
            .collect();
        for (id, track) in audio_tracks.iter_mut().enumerate() {
            track.id = id;
        }

        if levels.is_empty() {
            return cx.error(
                ErrorData::new(
                    ErrorKind::Media,
                    ErrorDetails::ManifestIncompatibleCodecsError,
                    true,
                )
                .with_reason("no level with compatible codecs found in manifest"),
            );
        }

        let bitrate_start = levels[0].bitrate;
        levels.sort_by_key(|l| l.bitrate);
        let first_level = levels
            .iter()
            .position(|l| l.bitrate == bitrate_start)
            .unwrap_or(0);
        let mut preloaded = false;
        if let (Some(details), [single]) = (details, levels.as_mut_slice()) {
            single.details = Some(details.clone());
            preloaded = true;
        }

        let alt_audio = !(audio_found && !video_found) && audio_tracks.iter().any(|t| t.url.is_some());
        let bitrates = levels.iter().map(|l| l.bitrate).collect();
        info!(
            levels = levels.len(),
            first_level,
            audio_tracks = audio_tracks.len(),
            "manifest parsed"
        );

        let session = &mut *cx.session;
        session.levels = levels;
        session.audio_tracks = audio_tracks;
        session.subtitle_tracks = manifest.subtitle_tracks.clone();
        session.first_level = first_level;
        session.current_level = None;
        self.retry = 0;
        self.last_loaded = None;

        cx.emit(Event::ManifestParsed {
            bitrates,
            first_level,
            audio: audio_found,
            video: video_found,
            alt_audio,
        });
        if preloaded {
            cx.emit(Event::LevelUpdated { level: 0 });
        }
    }

    fn on_level_select(&mut self, level: usize, cx: &mut Context<'_>) {
        let current = cx.session.current_level;
        let missing = cx
            .session
            .levels
            .get(level)
            .is_none_or(|l| l.details.is_none());
        if current != Some(level) || missing {
            self.set_level_internal(level, cx);
        }
    }

    fn set_level_internal(&mut self, new_level: usize, cx: &mut Context<'_>) {
        if new_level >= cx.session.levels.len() {
            return cx.error(
                ErrorData::new(ErrorKind::Other, ErrorDetails::LevelSwitchError, false)
                    .with_level(new_level)
                    .with_reason("invalid level idx"),
            );
        }
        cx.clear_timer(TimerKind::Reload);
        if cx.session.current_level != Some(new_level) {
            info!(level = new_level, "switching to level");
            cx.session.current_level = Some(new_level);
            cx.emit(Event::LevelSwitching { level: new_level });
        }
        let level = &cx.session.levels[new_level];
        if level.details.as_ref().is_none_or(|d| d.live) {
            self.load_level(cx);
        }
    }

    fn load_level(&mut self, cx: &mut Context<'_>) {
        if !cx.session.can_load {
            return;
        }
        let Some(index) = cx.session.current_level else {
            return;
        };
        let Some(level) = cx.session.levels.get(index) else {
            return;
        };
        debug!(level = index, url_id = level.url_id, "loading level playlist");
        let event = Event::LevelLoading {
            level: index,
            url_id: level.url_id,
            url: level.url().clone(),
        };
        cx.emit(event);
    }

    fn start_load(&mut self, cx: &mut Context<'_>) {
        cx.session.can_load = true;
        self.retry = 0;
        for level in &mut cx.session.levels {
            level.load_error = 0;
            if level.details.as_ref().is_some_and(|d| d.live) {
                level.details = None;
            }
        }
        if cx.has_timer(TimerKind::Reload) {
            cx.clear_timer(TimerKind::Reload);
            self.load_level(cx);
        }
    }

    fn on_level_loaded(
        &mut self,
        index: usize,
        details: &LevelDetails,
        stats: &LoadStats,
        cx: &mut Context<'_>,
    ) {
        if cx.session.current_level != Some(index) {
            debug!(level = index, "ignoring playlist of a level that is not current");
            return;
        }
        let mut details = details.clone();
        let previous = self
            .last_loaded
            .filter(|&last| last != index)
            .and_then(|last| cx.session.levels.get(last))
            .and_then(|l| l.details.clone());
        let elapsed = cx.session.clock.elapsed_ms(stats.trequest);

        let Some(level) = cx.session.levels.get_mut(index) else {
            return;
        };
        if !level.fragment_error {
            level.load_error = 0;
            self.retry = 0;
        }

        let old = level.details.take();
        match (&old, previous) {
            (Some(old), _) => merge_details(old, &mut details),
            (None, Some(reference)) if details.has_program_date_time() => {
                align_pdt(&mut details, &reference);
            }
            _ => {}
        }
        let reload = details
            .live
            .then(|| compute_reload_interval(old.as_ref(), &details, Some(elapsed)));
        level.details = Some(details);
        self.last_loaded = Some(index);

        match reload {
            Some(interval) => {
                debug!(level = index, interval, "live playlist, reload scheduled");
                cx.set_timeout(TimerKind::Reload, Duration::from_millis(interval));
            }
            None => cx.clear_timer(TimerKind::Reload),
        }
        cx.emit(Event::LevelUpdated { level: index });
    }

    fn on_error(&mut self, data: &ErrorData, cx: &mut Context<'_>) {
        if data.fatal {
            if data.kind == ErrorKind::Network {
                cx.clear_timer(TimerKind::Reload);
            }
            return;
        }
        let (index, level_error, fragment_error) = if data.details.is_fragment_load() {
            match data.frag {
                Some(frag) if frag.kind == LevelType::Main => (frag.level, false, true),
                _ => return,
            }
        } else if data.details.is_level_load() {
            match data.context.as_ref().and_then(|c| c.level) {
                Some(level) => (level, true, false),
                None => return,
            }
        } else if data.details == ErrorDetails::RemuxAllocError {
            match data.level {
                Some(level) => (level, true, false),
                None => return,
            }
        } else {
            return;
        };
        self.recover_level(data, index, level_error, fragment_error, cx);
    }

    fn recover_level(
        &mut self,
        data: &ErrorData,
        index: usize,
        level_error: bool,
        fragment_error: bool,
        cx: &mut Context<'_>,
    ) {
        let policy = cx.session.config.level;
        let min_auto = cx.session.min_auto_level();
        let level_count = cx.session.levels.len();
        let auto = cx.session.auto_level_enabled();
        let Some(level) = cx.session.levels.get_mut(index) else {
            return;
        };
        level.load_error += 1;
        level.fragment_error = fragment_error;

        if level_error {
            if self.retry < policy.max_retry {
                let delay = policy.backoff(self.retry);
                self.retry += 1;
                warn!(
                    level = index,
                    retry = self.retry,
                    ?delay,
                    details = data.details.as_str(),
                    "retrying level playlist"
                );
                cx.set_timeout(TimerKind::Reload, delay);
            } else {
                error!(details = data.details.as_str(), "cannot recover level playlist");
                cx.session.current_level = None;
                cx.clear_timer(TimerKind::Reload);
                return cx.error(data.clone().into_fatal());
            }
        }

        let Some(level) = cx.session.levels.get_mut(index) else {
            return;
        };
        let redundant = level.urls.len();
        if redundant > 1 && (level.load_error as usize) < redundant {
            level.url_id = (level.url_id + 1) % redundant;
            level.details = None;
            warn!(level = index, url_id = level.url_id, "switching to redundant stream");
        } else if auto {
            let next = if index == 0 { level_count - 1 } else { index - 1 };
            warn!(from = index, to = next, "switching down after level failure");
            cx.session.abr.set_next_auto_level(Some(next.max(min_auto)));
            cx.session.current_level = Some(next);
        } else if fragment_error {
            cx.session.current_level = None;
        }
    }

    fn on_audio_track_switched(&mut self, id: usize, cx: &mut Context<'_>) {
        let Some(group) = cx.session.audio_tracks.get(id).map(|t| t.group_id.clone()) else {
            return;
        };
        let Some(index) = cx.session.current_level else {
            return;
        };
        let Some(level) = cx.session.levels.get_mut(index) else {
            return;
        };
        let Some(url_id) = level
            .audio_group_ids
            .iter()
            .position(|g| g.as_deref() == Some(group.as_str()))
        else {
            return;
        };
        if url_id != level.url_id {
            debug!(level = index, url_id, group = %group, "following audio group");
            level.url_id = url_id;
            self.start_load(cx);
        }
    }
}

fn supported(codecs: &dyn CodecSupport, codec: Option<&str>, kind: CodecKind) -> bool {
    codec.is_none_or(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .all(|c| codecs.is_supported(c, kind))
    })
}

impl Component for LevelController {
    fn name(&self) -> &'static str {
        "level"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ManifestLoaded,
            EventKind::LevelSelect,
            EventKind::StartLoad,
            EventKind::StopLoad,
            EventKind::LevelLoaded,
            EventKind::FragLoaded,
            EventKind::AudioTrackSwitched,
            EventKind::Error,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::ManifestLoaded {
                manifest, details, ..
            } => self.on_manifest_loaded(manifest, details.as_ref(), cx),
            Event::LevelSelect { level } => self.on_level_select(*level, cx),
            Event::StartLoad { .. } => self.start_load(cx),
            Event::StopLoad => {
                cx.session.can_load = false;
                cx.clear_timer(TimerKind::Reload);
            }
            Event::LevelLoaded {
                level,
                details,
                stats,
            } => self.on_level_loaded(*level, details, stats, cx),
            Event::FragLoaded { frag, .. } => {
                if frag.kind == LevelType::Main && !frag.sn.is_init() {
                    if let Some(level) = cx.session.levels.get_mut(frag.level) {
                        level.fragment_error = false;
                        level.load_error = 0;
                    }
                    self.retry = 0;
                }
            }
            Event::AudioTrackSwitched { id } => self.on_audio_track_switched(*id, cx),
            Event::Error(data) => self.on_error(data, cx),
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::Reload {
            self.load_level(cx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use unimock::{MockFn, Unimock, matching};
    use url::Url;

    use super::*;
    use crate::{
        config::{HlsConfig, LoadPolicy},
        controller::harness::{Harness, ladder},
        loader::{PlaylistContext, PlaylistContextKind},
        media::CodecSupportMock,
        model::{FragmentKey, FragmentSn, test_details},
        parsing::ParsedVariant,
    };

    fn variant(path: &str, bitrate: u64, video: Option<&str>, audio: Option<&str>) -> ParsedVariant {
        ParsedVariant {
            url: Url::parse("https://cdn.example.com/").unwrap().join(path).unwrap(),
            bitrate,
            width: None,
            height: None,
            name: None,
            codecs: None,
            video_codec: video.map(str::to_string),
            audio_codec: audio.map(str::to_string),
            unknown_codecs: Vec::new(),
            audio_group: None,
            text_group: None,
        }
    }

    fn manifest_loaded(variants: Vec<ParsedVariant>) -> Event {
        let url = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        Event::ManifestLoaded {
            url,
            manifest: ParsedManifest {
                variants,
                ..ParsedManifest::default()
            },
            details: None,
            stats: LoadStats::new(lyra_platform::Instant::now()),
        }
    }

    fn harness() -> Harness {
        Harness::new(HlsConfig::default(), vec![Box::new(LevelController::new())])
    }

    fn frag_error(level: usize, details: ErrorDetails) -> Event {
        Event::Error(
            ErrorData::new(ErrorKind::Network, details, false).with_frag(FragmentKey {
                kind: LevelType::Main,
                level,
                url_id: 0,
                sn: FragmentSn::Media(3),
            }),
        )
    }

    fn level_error(level: usize) -> Event {
        Event::Error(
            ErrorData::new(ErrorKind::Network, ErrorDetails::LevelLoadError, false).with_context(
                PlaylistContext {
                    kind: PlaylistContextKind::Level,
                    url: Url::parse("https://cdn.example.com/level.m3u8").unwrap(),
                    level: Some(level),
                    id: None,
                    url_id: 0,
                },
            ),
        )
    }

    #[test]
    fn manifest_groups_sorts_and_remembers_first_level() {
        let mut h = harness();
        h.emit(manifest_loaded(vec![
            variant("mid.m3u8", 1_500_000, Some("avc1.4d401f"), Some("mp4a.40.2")),
            variant("low.m3u8", 500_000, Some("avc1.42c01e"), Some("mp4a.40.2")),
            variant("mid-backup.m3u8", 1_500_000, Some("avc1.4d401f"), Some("mp4a.40.2")),
            variant("audio.m3u8", 64_000, None, Some("mp4a.40.5")),
        ]));

        let levels = &h.session().levels;
        assert_eq!(levels.iter().map(|l| l.bitrate).collect::<Vec<_>>(), vec![500_000, 1_500_000]);
        assert_eq!(levels[1].urls.len(), 2);
        assert!(matches!(
            h.take_events().last(),
            Some(Event::ManifestParsed {
                first_level: 1,
                audio: true,
                video: true,
                ..
            })
        ));
    }

    #[test]
    fn unsupported_codecs_are_filtered() {
        let mut h = harness();
        h.session().codecs = Box::new(Unimock::new(
            CodecSupportMock::is_supported
                .each_call(matching!(_, _))
                .returns(false),
        ));
        h.emit(manifest_loaded(vec![variant("hevc.m3u8", 4_000_000, Some("hvc1.1.6.L93.B0"), None)]));

        let events = h.take_events();
        let Some(Event::Error(data)) = events.last() else {
            panic!("expected error, got {events:?}");
        };
        assert_eq!(data.details, ErrorDetails::ManifestIncompatibleCodecsError);
        assert!(data.fatal);
    }

    #[test]
    fn select_loads_missing_details_once_loading() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000, 1_500_000]);
        h.emit(Event::StartLoad {
            start_position: None,
        });
        h.emit(Event::LevelSelect { level: 1 });

        assert_eq!(h.session().current_level, Some(1));
        let kinds = h.kinds();
        assert!(kinds.contains(&EventKind::LevelSwitching));
        assert!(kinds.contains(&EventKind::LevelLoading));
    }

    #[test]
    fn invalid_index_reports_switch_error() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000]);
        h.emit(Event::LevelSelect { level: 4 });
        let events = h.take_events();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Error(d) if d.details == ErrorDetails::LevelSwitchError && !d.fatal
        )));
    }

    #[test]
    fn live_level_schedules_reload() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000]);
        h.emit(Event::StartLoad {
            start_position: None,
        });
        h.emit(Event::LevelSelect { level: 0 });
        let mut details = test_details(0, 3, 4.0);
        details.live = true;
        let stats = LoadStats::new(lyra_platform::Clock::now(&h.clock));
        h.emit(Event::LevelLoaded {
            level: 0,
            details,
            stats,
        });
        assert!(h.kinds().contains(&EventKind::LevelUpdated));
        let loads_before = h.kinds().iter().filter(|k| **k == EventKind::LevelLoading).count();

        h.advance_ms(4_000);
        let loads_after = h.kinds().iter().filter(|k| **k == EventKind::LevelLoading).count();
        assert_eq!(loads_after, loads_before + 1);
    }

    #[rstest]
    #[case(2, 1, 1)]
    #[case(1, 1, 0)]
    fn fragment_error_rotates_url_or_steps_down(
        #[case] urls: usize,
        #[case] expected_url_id: usize,
        #[case] expected_level: usize,
    ) {
        let mut h = harness();
        let mut levels = ladder(&[500_000, 1_500_000]);
        for i in 1..urls {
            let backup = Url::parse(&format!("https://backup{i}.example.com/level1.m3u8")).unwrap();
            levels[1].urls.push(backup);
        }
        h.session().levels = levels;
        h.session().current_level = Some(1);

        h.emit(frag_error(1, ErrorDetails::FragLoadTimeout));

        let session = h.session();
        if urls > 1 {
            assert_eq!(session.levels[1].url_id, expected_url_id);
            assert!(session.levels[1].details.is_none());
        } else {
            assert_eq!(session.current_level, Some(expected_level));
            assert_eq!(session.abr.forced_auto_level(), Some(expected_level));
        }
    }

    #[test]
    fn step_down_from_lowest_wraps_to_top() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000, 1_500_000, 3_000_000]);
        h.session().current_level = Some(0);
        h.emit(frag_error(0, ErrorDetails::FragLoadError));
        assert_eq!(h.session().current_level, Some(2));
    }

    #[test]
    fn manual_mode_fragment_error_clears_current() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000, 1_500_000]);
        h.session().manual_level = Some(1);
        h.session().current_level = Some(1);
        h.emit(frag_error(1, ErrorDetails::KeyLoadTimeout));
        assert_eq!(h.session().current_level, None);
    }

    #[test]
    fn level_errors_back_off_then_turn_fatal() {
        let policy = LoadPolicy::new(
            Duration::from_secs(10),
            2,
            Duration::from_millis(1_000),
            Duration::from_millis(64_000),
        );
        let mut h = Harness::new(
            HlsConfig::default().with_level_policy(policy),
            vec![Box::new(LevelController::new())],
        );
        h.session().levels = ladder(&[500_000]);
        h.emit(Event::StartLoad {
            start_position: None,
        });
        h.emit(Event::LevelSelect { level: 0 });
        h.take_events();

        h.emit(level_error(0));
        h.advance_ms(999);
        assert!(!h.kinds().contains(&EventKind::LevelLoading));
        h.advance_ms(1);
        assert!(h.kinds().contains(&EventKind::LevelLoading));

        h.emit(level_error(0));
        h.emit(level_error(0));
        let events = h.take_events();
        assert!(events.iter().any(|e| matches!(e, Event::Error(d) if d.fatal)));
        assert_eq!(h.session().current_level, None);
    }

    #[test]
    fn main_fragment_loaded_resets_error_counters() {
        let mut h = harness();
        h.session().levels = ladder(&[500_000, 1_500_000]);
        h.session().levels[1].load_error = 2;
        h.session().levels[1].fragment_error = true;
        let mut frag = crate::model::test_fragment(0, 0.0, 4.0);
        frag.level = 1;
        h.emit(Event::FragLoaded {
            frag,
            payload: bytes::Bytes::new(),
            stats: LoadStats::new(lyra_platform::Instant::now()),
        });
        let level = &h.session().levels[1];
        assert_eq!((level.load_error, level.fragment_error), (0, false));
    }

    #[test]
    fn audio_switch_follows_group_url() {
        let mut h = harness();
        let mut levels = ladder(&[500_000]);
        levels[0].urls.push(Url::parse("https://cdn.example.com/level0-b.m3u8").unwrap());
        levels[0].audio_group_ids = vec![Some("aac".into()), Some("ac3".into())];
        h.session().levels = levels;
        h.session().current_level = Some(0);
        h.session().audio_tracks = vec![MediaTrack {
            id: 0,
            group_id: "ac3".into(),
            name: "Surround".into(),
            kind: crate::model::TrackKind::Audio,
            default: false,
            autoselect: true,
            forced: false,
            lang: None,
            url: None,
            audio_codec: None,
            details: None,
        }];
        h.emit(Event::AudioTrackSwitched { id: 0 });
        assert_eq!(h.session().levels[0].url_id, 1);
        assert!(h.session().can_load);
    }
}
