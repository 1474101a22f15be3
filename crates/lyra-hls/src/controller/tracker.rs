//! Feeds loader and buffer notifications into the session's fragment tracker.

use crate::{
    HlsResult,
    events::{Event, EventKind},
    hub::{Component, Context},
    model::StreamType,
};

#[derive(Debug, Default)]
pub(crate) struct TrackerHook;

impl TrackerHook {
    pub fn new() -> Self {
        Self
    }
}

impl Component for TrackerHook {
    fn name(&self) -> &'static str {
        "fragment-tracker"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::FragLoaded,
            EventKind::BufferAppended,
            EventKind::FragBuffered,
            EventKind::BufferFlushed,
            EventKind::MediaDetaching,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        let session = &mut *cx.session;
        match event {
            Event::FragLoaded { frag, .. } => session.tracker.on_fragment_loaded(frag),
            Event::BufferAppended { stream, ranges } => {
                session.tracker.on_buffer_appended(*stream, ranges);
            }
            Event::FragBuffered { frag, .. } => session.tracker.on_fragment_buffered(frag),
            Event::BufferFlushed => {
                let Some(sink) = session.sink.as_ref() else {
                    return Ok(());
                };
                for stream in [StreamType::Audio, StreamType::Video] {
                    let ranges = sink.buffered(stream);
                    session.tracker.detect_evicted_fragments(stream, &ranges);
                }
            }
            Event::MediaDetaching => session.tracker.remove_all_fragments(),
            _ => {}
        }
        Ok(())
    }
}
