//! Dropped-frame monitoring.

use tracing::{info, warn};

use crate::{
    HlsResult,
    events::{Event, EventKind},
    hub::{Component, Context, TimerKind},
    media::PlaybackQuality,
};

#[derive(Debug, Default)]
pub(crate) struct FpsController {
    last: Option<PlaybackQuality>,
}

impl FpsController {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&mut self, cx: &mut Context<'_>) {
        let Some(quality) = cx.session.media.as_deref().and_then(|m| m.playback_quality()) else {
            return;
        };
        let Some(last) = self.last.replace(quality) else {
            return;
        };
        let decoded = quality.decoded_frames.saturating_sub(last.decoded_frames);
        let dropped = quality.dropped_frames.saturating_sub(last.dropped_frames);
        let threshold = cx.session.config.fps_dropped_monitoring_threshold;
        #[expect(clippy::cast_precision_loss)]
        let too_many = decoded > 0 && dropped as f64 > threshold * decoded as f64;
        if !too_many {
            return;
        }
        warn!(dropped, decoded, "too many dropped frames");
        cx.emit(Event::FpsDrop { dropped, decoded });

        let session = &*cx.session;
        if !session.config.cap_level_on_fps_drop {
            return;
        }
        let Some(current) = session.current_level.filter(|&l| l > 0) else {
            return;
        };
        if session.auto_level_capping.is_some_and(|cap| cap < current) {
            return;
        }
        let level = current - 1;
        info!(level, dropped_level = current, "capping auto level after frame drops");
        cx.session.auto_level_capping = Some(level);
        cx.emit(Event::FpsDropLevelCapping {
            level,
            dropped_level: current,
        });
        cx.emit(Event::NextLevelSwitch);
    }
}

impl Component for FpsController {
    fn name(&self) -> &'static str {
        "fps"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::MediaAttached, EventKind::MediaDetaching]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::MediaAttached => {
                self.last = None;
                let period = cx.session.config.fps_dropped_monitoring_period;
                cx.set_interval(TimerKind::FpsCheck, period);
            }
            Event::MediaDetaching => {
                self.last = None;
                cx.clear_timer(TimerKind::FpsCheck);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::FpsCheck {
            self.check(cx);
        }
        Ok(())
    }
}
