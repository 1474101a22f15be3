//! Bridges fragment load events to the ABR engine: throughput samples,
//! measured level bitrates and emergency abandon of slow loads.

use std::time::Duration;

use lyra_abr::InFlightLoad;
use lyra_events::AbrEvent;
use lyra_platform::Instant;
use tracing::{debug, trace};

use crate::{
    HlsResult,
    events::{Event, EventKind},
    hub::{Component, Context, TimerKind},
    loader::LoadStats,
    media::ReadyState,
    model::{Fragment, Ladder, LevelType},
};

const ABANDON_CHECK_PERIOD: Duration = Duration::from_millis(100);

struct Loading {
    frag: Fragment,
    trequest: Instant,
    progress: Option<LoadStats>,
}

#[derive(Default)]
pub(crate) struct AbrComponent {
    loading: Option<Loading>,
}

fn is_main_media(frag: &Fragment) -> bool {
    frag.kind == LevelType::Main && !frag.sn.is_init()
}

fn elapsed_ms(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64() * 1000.0
}

impl AbrComponent {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_check(&mut self, cx: &mut Context<'_>) {
        self.loading = None;
        cx.clear_timer(TimerKind::AbandonCheck);
    }

    fn on_frag_loading(&mut self, frag: &Fragment, cx: &mut Context<'_>) {
        if !is_main_media(frag) {
            return;
        }
        let live = cx
            .session
            .levels
            .get(frag.level)
            .is_some_and(|l| l.is_live());
        cx.session.abr.ensure_estimator(live);
        cx.session.abr_frag_duration = Some(frag.duration);
        self.loading = Some(Loading {
            frag: frag.clone(),
            trequest: cx.now(),
            progress: None,
        });
        cx.set_interval(TimerKind::AbandonCheck, ABANDON_CHECK_PERIOD);
    }

    fn check_abandon(&mut self, cx: &mut Context<'_>) {
        let Some(loading) = self.loading.as_ref() else {
            return cx.clear_timer(TimerKind::AbandonCheck);
        };
        let session = &*cx.session;
        let Some(media) = session.media.as_ref() else {
            return;
        };
        let playing = !media.paused() && media.playback_rate() != 0.0;
        if !playing && media.ready_state() != ReadyState::HaveNothing {
            return;
        }

        let stats = loading
            .progress
            .unwrap_or_else(|| LoadStats::new(loading.trequest));
        let load = InFlightLoad {
            level: loading.frag.level,
            duration: loading.frag.duration,
            request_delay_ms: session.clock.elapsed_ms(stats.trequest),
            loaded: stats.loaded,
            total: stats.total,
            bandwidth_bps: stats.bw,
            auto_level: loading.frag.auto_level,
        };
        let Some(decision) = session.abr.check_abandon(
            &Ladder(&session.levels),
            &load,
            &session.playback_state(),
            session.min_auto_level(),
        ) else {
            return;
        };

        let frag = loading.frag.clone();
        self.stop_check(cx);
        cx.session.abr.record_abandon(&load, &decision);
        cx.emit(Event::FragLoadEmergencyAborted { frag });
        cx.publish(AbrEvent::EmergencyDownSwitch {
            from_level: load.level,
            to_level: decision.next_level,
        });
        cx.publish(AbrEvent::Estimate {
            bandwidth_bps: cx.session.abr.bandwidth_estimate(),
        });
    }

    fn on_frag_loaded(&mut self, frag: &Fragment, stats: &LoadStats, cx: &mut Context<'_>) {
        if !is_main_media(frag) {
            return;
        }
        self.stop_check(cx);
        let session = &mut *cx.session;
        session.abr.on_fragment_loaded(frag.level);
        if session.config.abr.max_with_real_bitrate
            && let Some(level) = session.levels.get_mut(frag.level)
        {
            level.record_download(stats.loaded, frag.duration);
            trace!(level = frag.level, real_bitrate = ?level.real_bitrate, "measured level bitrate");
        }
        if frag.bitrate_test {
            let tload = stats.tload.unwrap_or(stats.trequest);
            sample(elapsed_ms(stats.trequest, tload), stats.loaded, true, cx);
        }
    }

    fn on_frag_buffered(frag: &Fragment, stats: &LoadStats, cx: &mut Context<'_>) {
        if !is_main_media(frag) || frag.bitrate_test || stats.aborted {
            return;
        }
        let Some(done) = stats.tparsed.or(stats.tbuffered).or(stats.tload) else {
            return;
        };
        sample(elapsed_ms(stats.trequest, done), stats.loaded, false, cx);
    }
}

fn sample(duration_ms: f64, bytes: u64, bitrate_test: bool, cx: &mut Context<'_>) {
    let abr = &mut cx.session.abr;
    abr.on_fragment_buffered(duration_ms, bytes, bitrate_test);
    let estimate = abr.bandwidth_estimate();
    debug!(duration_ms, bytes, bitrate_test, estimate, "bandwidth sample");
    #[expect(clippy::cast_precision_loss)]
    let bandwidth_bps = 8000.0 * bytes as f64 / duration_ms.max(1.0);
    cx.publish(AbrEvent::Sample {
        duration_ms,
        bytes,
        bandwidth_bps,
    });
    cx.publish(AbrEvent::Estimate {
        bandwidth_bps: estimate,
    });
}

impl Component for AbrComponent {
    fn name(&self) -> &'static str {
        "abr"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::FragLoading,
            EventKind::FragLoadProgress,
            EventKind::FragLoaded,
            EventKind::FragBuffered,
            EventKind::AbortFragLoad,
            EventKind::StopLoad,
            EventKind::MediaDetaching,
            EventKind::Error,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::FragLoading { frag } => self.on_frag_loading(frag, cx),
            Event::FragLoadProgress { frag, stats } => {
                if let Some(loading) = self.loading.as_mut()
                    && loading.frag.key() == *frag
                {
                    loading.progress = Some(*stats);
                }
            }
            Event::FragLoaded { frag, stats, .. } => self.on_frag_loaded(frag, stats, cx),
            Event::FragBuffered { frag, stats } => Self::on_frag_buffered(frag, stats, cx),
            Event::AbortFragLoad {
                kind: LevelType::Main,
            }
            | Event::StopLoad
            | Event::MediaDetaching => self.stop_check(cx),
            Event::Error(data) => {
                let ours = self
                    .loading
                    .as_ref()
                    .is_some_and(|l| data.frag == Some(l.frag.key()));
                if ours && data.details.is_fragment_load() {
                    self.stop_check(cx);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::AbandonCheck {
            self.check_abandon(cx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use lyra_events::Event as BusEvent;

    use super::*;
    use crate::{
        buffer::TimeRange,
        config::HlsConfig,
        controller::harness::{Harness, ladder},
        model::{StreamType, test_details, test_fragment},
    };

    fn harness() -> Harness {
        let config = HlsConfig::default()
            .with_abr(lyra_abr::AbrOptions::default().with_bandwidth_up_factor(0.8));
        let mut h = Harness::new(config, vec![Box::new(AbrComponent::new())]);
        let mut levels = ladder(&[500_000, 1_500_000, 3_000_000]);
        for level in &mut levels {
            let mut details = test_details(0, 10, 4.0);
            details.live = false;
            level.details = Some(details);
        }
        h.session().levels = levels;
        h
    }

    fn main_frag(level: usize) -> Fragment {
        let mut frag = test_fragment(1, 4.0, 4.0);
        frag.level = level;
        frag.auto_level = true;
        frag
    }

    #[test]
    fn buffered_fragment_feeds_estimator() {
        let mut h = harness();
        let mut rx = h.hub.bus().subscribe();
        let frag = main_frag(0);
        let trequest = h.clock_now();
        h.emit(Event::FragLoading { frag: frag.clone() });
        h.advance_ms(1_000);
        let mut stats = LoadStats::completed(trequest, h.clock_now(), 500_000);
        h.emit(Event::FragLoaded {
            frag: frag.clone(),
            payload: Bytes::new(),
            stats,
        });
        stats.tparsed = Some(h.clock_now());
        h.emit(Event::FragBuffered { frag, stats });

        let estimate = h.session().abr.bandwidth_estimate();
        assert!((estimate - 4_000_000.0).abs() < 1.0, "estimate {estimate}");
        assert_eq!(h.session().next_auto_level(), 2);

        let mut samples = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, BusEvent::Abr(AbrEvent::Sample { bytes: 500_000, .. })) {
                samples += 1;
            }
        }
        assert_eq!(samples, 1);
    }

    #[test]
    fn bitrate_test_samples_on_load() {
        let mut h = harness();
        let mut frag = main_frag(0);
        frag.bitrate_test = true;
        let trequest = h.clock_now();
        h.emit(Event::FragLoading { frag: frag.clone() });
        h.advance_ms(500);
        let stats = LoadStats::completed(trequest, h.clock_now(), 250_000);
        h.emit(Event::FragLoaded {
            frag,
            payload: Bytes::new(),
            stats,
        });

        let abr = &h.session().abr;
        assert!((abr.bitrate_test_delay() - 0.5).abs() < 1e-9);
        assert!(abr.bandwidth_estimate() > 3_000_000.0);
    }

    /// Loads a top level fragment at 4 kB/s for 2.6 s.
    fn slow_top_level_load(h: &mut Harness) -> Vec<Event> {
        let frag = main_frag(2);
        let trequest = h.clock_now();
        h.emit(Event::FragLoading { frag: frag.clone() });
        h.advance_ms(2_500);
        let mut stats = LoadStats::new(trequest);
        stats.loaded = 10_000;
        h.emit(Event::FragLoadProgress {
            frag: frag.key(),
            stats,
        });
        h.advance_ms(100);
        h.take_events()
    }

    fn abandoned(events: &[Event]) -> bool {
        events
            .iter()
            .any(|e| matches!(e, Event::FragLoadEmergencyAborted { frag } if frag.level == 2))
    }

    #[test]
    fn slow_load_is_abandoned_for_lower_level() {
        let mut h = harness();
        let (media, sink) = h.attach_media();
        sink.ranges
            .lock()
            .insert(StreamType::Video, vec![TimeRange::new(0.0, 1.0)].into());
        media.set_time(0.0);

        let events = slow_top_level_load(&mut h);
        assert!(abandoned(&events), "{events:?}");
        assert_eq!(h.session().abr.forced_auto_level(), Some(0));
    }

    #[test]
    fn paused_media_keeps_slow_load() {
        let mut h = harness();
        let (media, _sink) = h.attach_media();
        media.state.lock().paused = true;

        let events = slow_top_level_load(&mut h);
        assert!(!abandoned(&events), "{events:?}");
        assert_eq!(h.session().abr.forced_auto_level(), None);
    }

    #[test]
    fn slow_load_is_abandoned_before_first_frame() {
        let mut h = harness();
        let (media, _sink) = h.attach_media();
        {
            let mut state = media.state.lock();
            state.paused = true;
            state.ready_state = ReadyState::HaveNothing;
        }

        let events = slow_top_level_load(&mut h);
        assert!(abandoned(&events), "{events:?}");
        assert_eq!(h.session().abr.forced_auto_level(), Some(0));
    }

    #[test]
    fn real_bitrate_is_measured_when_enabled() {
        let config = HlsConfig::default().with_abr(
            lyra_abr::AbrOptions::default().with_max_with_real_bitrate(true),
        );
        let mut h = Harness::new(config, vec![Box::new(AbrComponent::new())]);
        h.session().levels = ladder(&[500_000]);
        let frag = main_frag(0);
        let now = h.clock_now();
        h.emit(Event::FragLoaded {
            frag,
            payload: Bytes::new(),
            stats: LoadStats::completed(now, now, 500_000),
        });
        assert_eq!(h.session().levels[0].real_bitrate, Some(1_000_000));
    }
}
