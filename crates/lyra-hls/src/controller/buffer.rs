//! Media buffer writer.
//!
//! Every `BufferAppending` ends in exactly one `BufferAppended` (possibly
//! with unchanged ranges when the chunk was dropped) unless the buffer is
//! full, which stops playback.

use std::collections::VecDeque;

use tracing::{debug, error, trace, warn};

use crate::{
    HlsResult,
    buffer::TimeRanges,
    error::{ErrorData, ErrorDetails, ErrorKind},
    events::{Event, EventKind},
    hub::{Component, Context},
    media::{AppendData, SinkError},
    model::StreamType,
};

#[derive(Debug, Default)]
pub(crate) struct BufferController {
    pending: VecDeque<AppendData>,
    /// Consecutive failed appends.
    append_error: u32,
    /// Duration last pushed to the sink.
    duration: Option<f64>,
}

impl BufferController {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_appending(&mut self, data: &AppendData, cx: &mut Context<'_>) {
        self.pending.push_back(data.clone());
        while let Some(segment) = self.pending.pop_front() {
            self.append(segment, cx);
        }
    }

    fn append(&mut self, segment: AppendData, cx: &mut Context<'_>) {
        let stream = segment.stream;
        let Some(sink) = cx.session.sink.as_mut() else {
            trace!(?stream, "no media sink, segment dropped");
            return cx.emit(Event::BufferAppended {
                stream,
                ranges: TimeRanges::new(),
            });
        };

        match sink.append(&segment) {
            Ok(()) => {
                self.append_error = 0;
                let ranges = sink.buffered(stream);
                trace!(?stream, start = segment.start, end = segment.end, "appended");
                cx.emit(Event::BufferAppended { stream, ranges });
            }
            Err(SinkError::QuotaExceeded) => {
                error!(?stream, "media buffer full");
                self.pending.clear();
                cx.error(
                    ErrorData::new(ErrorKind::Media, ErrorDetails::BufferFullError, true)
                        .with_reason("buffer quota exceeded"),
                );
            }
            Err(SinkError::Other(reason)) => {
                self.append_error += 1;
                let max_retry = cx.session.config.append_error_max_retry;
                let fatal = self.append_error > max_retry;
                warn!(?stream, attempts = self.append_error, fatal, %reason, "append failed");
                if fatal {
                    self.pending.clear();
                }
                let ranges = (!fatal).then(|| sink.buffered(stream));
                cx.error(
                    ErrorData::new(ErrorKind::Media, ErrorDetails::BufferAppendError, fatal)
                        .with_reason(reason),
                );
                // The chunk is dropped; the scheduler still gets its acknowledgement.
                if let Some(ranges) = ranges {
                    cx.emit(Event::BufferAppended { stream, ranges });
                }
            }
        }
    }

    fn on_flushing(start: f64, end: f64, cx: &mut Context<'_>) {
        if let Some(sink) = cx.session.sink.as_mut() {
            for stream in [StreamType::Audio, StreamType::Video] {
                if let Err(err) = sink.remove(stream, start, end) {
                    warn!(?stream, start, end, %err, "buffer flush failed");
                }
            }
        }
        debug!(start, end, "buffer flushed");
        cx.emit(Event::BufferFlushed);
    }

    fn on_level_updated(&mut self, level: usize, cx: &mut Context<'_>) {
        let session = &mut *cx.session;
        let Some(details) = session.levels.get(level).and_then(|l| l.details.as_ref()) else {
            return;
        };
        if details.live {
            return;
        }
        let duration = details.total_duration + details.window_start();
        if self.duration == Some(duration) {
            return;
        }
        if let Some(sink) = session.sink.as_mut() {
            debug!(duration, "media duration updated");
            sink.set_duration(duration);
            self.duration = Some(duration);
        }
    }
}

impl Component for BufferController {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::BufferAppending,
            EventKind::BufferFlushing,
            EventKind::BufferEos,
            EventKind::LevelUpdated,
            EventKind::MediaDetaching,
        ]
    }

    fn handle(&mut self, event: &Event, cx: &mut Context<'_>) -> HlsResult<()> {
        match event {
            Event::BufferAppending(data) => self.on_appending(data, cx),
            Event::BufferFlushing { start, end } => Self::on_flushing(*start, *end, cx),
            Event::BufferEos => {
                if let Some(sink) = cx.session.sink.as_mut() {
                    debug!("end of stream");
                    sink.end_of_stream();
                }
            }
            Event::LevelUpdated { level } => self.on_level_updated(*level, cx),
            Event::MediaDetaching => {
                self.pending.clear();
                self.append_error = 0;
                self.duration = None;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::HlsConfig,
        controller::harness::{FakeSink, Harness, ladder},
        model::{LevelType, test_details},
    };

    fn chunk(start: f64, end: f64) -> Event {
        Event::BufferAppending(AppendData {
            stream: StreamType::Video,
            kind: LevelType::Main,
            data: Bytes::from_static(b"moof"),
            start,
            end,
        })
    }

    fn harness(max_retry: u32) -> (Harness, FakeSink) {
        let config = HlsConfig::default().with_append_error_max_retry(max_retry);
        let mut h = Harness::new(config, vec![Box::new(BufferController::new())]);
        let sink = FakeSink::default();
        h.session().sink = Some(Box::new(sink.clone()));
        (h, sink)
    }

    #[test]
    fn append_reports_sink_ranges() {
        let (mut h, sink) = harness(3);
        h.emit(chunk(0.0, 4.0));
        h.emit(chunk(4.0, 8.0));

        assert_eq!(sink.appended.lock().len(), 2);
        let events = h.take_events();
        let Some(Event::BufferAppended { ranges, .. }) = events.last() else {
            panic!("expected BufferAppended, got {events:?}");
        };
        assert_eq!(ranges.end(), Some(8.0));
    }

    #[test]
    fn missing_sink_still_acknowledges() {
        let mut h = Harness::new(HlsConfig::default(), vec![Box::new(BufferController::new())]);
        h.emit(chunk(0.0, 4.0));
        assert_eq!(h.kinds(), vec![EventKind::BufferAppending, EventKind::BufferAppended]);
    }

    #[test]
    fn quota_exceeded_is_fatal() {
        let (mut h, sink) = harness(3);
        *sink.fail.lock() = Some(SinkError::QuotaExceeded);
        h.emit(chunk(0.0, 4.0));

        let errors: Vec<ErrorData> = h
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(data) => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].details, ErrorDetails::BufferFullError);
        assert!(errors[0].fatal);
    }

    #[rstest]
    #[case(1, vec![false, true])]
    #[case(2, vec![false, false, true])]
    fn append_errors_turn_fatal_past_retry_budget(
        #[case] max_retry: u32,
        #[case] expected: Vec<bool>,
    ) {
        let (mut h, sink) = harness(max_retry);
        *sink.fail.lock() = Some(SinkError::Other("decode".into()));
        for _ in 0..expected.len() {
            h.emit(chunk(0.0, 4.0));
        }
        let fatal: Vec<bool> = h
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(data) if data.details == ErrorDetails::BufferAppendError => {
                    Some(data.fatal)
                }
                _ => None,
            })
            .collect();
        assert_eq!(fatal, expected);
    }

    #[test]
    fn flush_removes_every_stream_then_acknowledges() {
        let (mut h, sink) = harness(3);
        h.emit(chunk(0.0, 8.0));
        h.emit(Event::BufferFlushing {
            start: 4.0,
            end: f64::INFINITY,
        });
        assert_eq!(sink.ranges(StreamType::Video).end(), Some(4.0));
        assert_eq!(h.kinds().last(), Some(&EventKind::BufferFlushed));
    }

    #[test]
    fn vod_duration_and_end_of_stream_reach_sink() {
        let (mut h, sink) = harness(3);
        let mut levels = ladder(&[500_000]);
        let mut details = test_details(0, 5, 4.0);
        details.live = false;
        levels[0].details = Some(details);
        h.session().levels = levels;

        h.emit(Event::LevelUpdated { level: 0 });
        h.emit(Event::BufferEos);
        assert_eq!(*sink.duration.lock(), Some(20.0));
        assert!(*sink.eos.lock());
    }
}
