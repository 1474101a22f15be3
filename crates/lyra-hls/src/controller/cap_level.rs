//! Caps automatic level selection to the size of the playback surface.

use std::{collections::BTreeSet, time::Duration};

use tracing::debug;

use crate::{
    HlsResult,
    events::{Event, EventKind},
    hub::{Component, Context, TimerKind},
    model::Level,
};

const CHECK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub(crate) struct CapLevelController {
    /// Levels that dropped too many frames; never picked as a cap.
    restricted: BTreeSet<usize>,
}

/// Index of the smallest level covering `width` x `height`, skipping
/// restricted ones. Falls back to the largest allowed level.
pub(crate) fn max_level_for_size(
    levels: &[Level],
    width: u64,
    height: u64,
    restricted: &BTreeSet<usize>,
) -> Option<usize> {
    let allowed = levels
        .iter()
        .enumerate()
        .filter(|(i, _)| !restricted.contains(i));
    let mut last = None;
    for (i, level) in allowed {
        let covers = level.width.is_some_and(|w| w >= width)
            || level.height.is_some_and(|h| h >= height);
        if covers {
            return Some(i);
        }
        last = Some(i);
    }
    last
}

impl CapLevelController {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, cx: &mut Context<'_>) {
        let session = &*cx.session;
        if session.config.cap_level_to_player_size && session.media.is_some() && !session.levels.is_empty() {
            cx.set_interval(TimerKind::CapLevel, CHECK_PERIOD);
            self.detect(cx);
        }
    }

    fn detect(&self, cx: &mut Context<'_>) {
        let session = &*cx.session;
        let Some((width, height)) = session.media.as_deref().and_then(|m| m.display_size()) else {
            return;
        };
        let Some(cap) = max_level_for_size(&session.levels, width, height, &self.restricted) else {
            return;
        };
        let previous = session.auto_level_capping;
        if previous == Some(cap) {
            return;
        }
        debug!(width, height, ?previous, cap, "capping auto level to player size");
        cx.session.auto_level_capping = Some(cap);
        if previous.is_some_and(|p| cap > p) {
            cx.emit(Event::NextLevelSwitch);
        }
    }
}

impl Component for CapLevelController {
    fn name(&self) -> &'static str {
        "cap-level"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ManifestParsed,
            EventKind::MediaAttached,
            EventKind::MediaDetaching,
            EventKind::FpsDropLevelCapping,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::ManifestParsed { .. } => {
                self.restricted.clear();
                if cx.session.config.cap_level_to_player_size {
                    cx.session.auto_level_capping = None;
                }
                self.start(cx);
            }
            Event::MediaAttached => self.start(cx),
            Event::MediaDetaching => cx.clear_timer(TimerKind::CapLevel),
            Event::FpsDropLevelCapping { dropped_level, .. } => {
                self.restricted.insert(*dropped_level);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_timer(&mut self, timer: TimerKind, cx: &mut Context<'_>) -> HlsResult<()> {
        if timer == TimerKind::CapLevel {
            self.detect(cx);
        }
        Ok(())
    }
}
