use std::collections::HashMap;

use tracing::{trace, warn};

use super::{LoadOutcome, LoadStats, RequestId, ResponseKind};
use crate::{
    HlsResult,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    hub::{Component, Context},
    model::{Fragment, LevelType},
};

/// Downloads fragments, at most one per level type.
#[derive(Default)]
pub struct FragmentLoader {
    in_flight: HashMap<LevelType, (RequestId, Fragment)>,
}

impl FragmentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn abort(&mut self, kind: LevelType, cx: &mut Context<'_>) {
        if let Some((id, frag)) = self.in_flight.remove(&kind) {
            trace!(frag = %frag.key(), "fragment load aborted");
            cx.abort(id);
        }
    }

    fn take(&mut self, id: RequestId) -> Option<Fragment> {
        let kind = self
            .in_flight
            .iter()
            .find(|(_, (in_flight, _))| *in_flight == id)
            .map(|(kind, _)| *kind)?;
        self.in_flight.remove(&kind).map(|(_, frag)| frag)
    }
}

fn fragment_error(frag: &Fragment, details: ErrorDetails, reason: String) -> ErrorData {
    ErrorData::new(ErrorKind::Network, details, false)
        .with_reason(reason)
        .with_level(frag.level)
        .with_frag(frag.key())
}

impl Component for FragmentLoader {
    fn name(&self) -> &'static str {
        "fragment-loader"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::FragLoading,
            EventKind::AbortFragLoad,
            EventKind::FragLoadEmergencyAborted,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::FragLoading { frag } => {
                self.abort(frag.kind, cx);
                // Retries are scheduled by the stream controllers.
                let policy = cx.session.config.fragment.without_retry();
                let id = cx.load(frag.url.clone(), ResponseKind::Binary, frag.byte_range, policy);
                self.in_flight.insert(frag.kind, (id, frag.clone()));
            }
            Event::AbortFragLoad { kind } => self.abort(*kind, cx),
            Event::FragLoadEmergencyAborted { frag } => self.abort(frag.kind, cx),
            _ => {}
        }
        Ok(())
    }

    fn on_load_progress(
        &mut self,
        id: RequestId,
        stats: &LoadStats,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        if let Some((_, frag)) = self.in_flight.values().find(|(i, _)| *i == id) {
            cx.emit(Event::FragLoadProgress {
                frag: frag.key(),
                stats: *stats,
            });
        }
        Ok(())
    }

    fn on_load(
        &mut self,
        id: RequestId,
        outcome: LoadOutcome,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        let Some(frag) = self.take(id) else {
            return Ok(());
        };
        match outcome {
            LoadOutcome::Success { data, stats } => {
                trace!(frag = %frag.key(), bytes = data.len(), "fragment loaded");
                cx.emit(Event::FragLoaded {
                    frag,
                    payload: data,
                    stats,
                });
            }
            LoadOutcome::Error { code, text } => {
                warn!(frag = %frag.key(), ?code, %text, "fragment load failed");
                let reason = code.map_or_else(|| text.clone(), |c| format!("HTTP {c}: {text}"));
                cx.error(fragment_error(&frag, ErrorDetails::FragLoadError, reason));
            }
            LoadOutcome::Timeout { .. } => {
                warn!(frag = %frag.key(), "fragment load timed out");
                cx.error(fragment_error(
                    &frag,
                    ErrorDetails::FragLoadTimeout,
                    "timeout".into(),
                ));
            }
        }
        Ok(())
    }
}
