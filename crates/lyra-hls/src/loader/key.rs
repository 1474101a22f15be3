use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use super::{LoadOutcome, RequestId, ResponseKind};
use crate::{
    HlsResult,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    hub::{Component, Context},
    model::{Fragment, LevelType},
};

/// Fetches `#EXT-X-KEY` URIs, each one once.
#[derive(Default)]
pub struct KeyLoader {
    keys: HashMap<Url, Bytes>,
    in_flight: HashMap<LevelType, (RequestId, Fragment)>,
}

impl KeyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_key_loading(&mut self, frag: &Fragment, cx: &mut Context<'_>) {
        let Some(uri) = frag.decrypt.as_ref().and_then(|k| k.uri.clone()) else {
            return cx.error(
                ErrorData::new(ErrorKind::Network, ErrorDetails::KeyLoadError, false)
                    .with_reason("key without URI")
                    .with_frag(frag.key()),
            );
        };

        if let Some(bytes) = self.keys.get(&uri) {
            debug!(%uri, "key served from cache");
            return cx.emit(Event::KeyLoaded {
                frag: with_key(frag.clone(), bytes.clone()),
            });
        }

        if let Some((id, _)) = self.in_flight.remove(&frag.kind) {
            cx.abort(id);
        }
        let policy = cx.session.config.key;
        let id = cx.load(uri, ResponseKind::Binary, None, policy);
        self.in_flight.insert(frag.kind, (id, frag.clone()));
    }
}

fn with_key(mut frag: Fragment, bytes: Bytes) -> Fragment {
    if let Some(key) = frag.decrypt.as_mut() {
        key.key = Some(bytes);
    }
    frag
}

impl Component for KeyLoader {
    fn name(&self) -> &'static str {
        "key-loader"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::KeyLoading, EventKind::AbortFragLoad]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::KeyLoading { frag } => self.on_key_loading(frag, cx),
            Event::AbortFragLoad { kind } => {
                if let Some((id, _)) = self.in_flight.remove(kind) {
                    cx.abort(id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_load(
        &mut self,
        id: RequestId,
        outcome: LoadOutcome,
        cx: &mut Context<'_>,
    ) -> HlsResult<()> {
        let Some(kind) = self
            .in_flight
            .iter()
            .find(|(_, (i, _))| *i == id)
            .map(|(kind, _)| *kind)
        else {
            return Ok(());
        };
        let Some((_, frag)) = self.in_flight.remove(&kind) else {
            return Ok(());
        };

        let details = match outcome {
            LoadOutcome::Success { data, .. } => {
                if let Some(uri) = frag.decrypt.as_ref().and_then(|k| k.uri.clone()) {
                    self.keys.insert(uri, data.clone());
                }
                cx.emit(Event::KeyLoaded {
                    frag: with_key(frag, data),
                });
                return Ok(());
            }
            LoadOutcome::Error { code, text } => {
                warn!(frag = %frag.key(), ?code, %text, "key load failed");
                ErrorDetails::KeyLoadError
            }
            LoadOutcome::Timeout { .. } => {
                warn!(frag = %frag.key(), "key load timed out");
                ErrorDetails::KeyLoadTimeout
            }
        };
        cx.error(
            ErrorData::new(ErrorKind::Network, details, false)
                .with_level(frag.level)
                .with_frag(frag.key()),
        );
        Ok(())
    }
}
