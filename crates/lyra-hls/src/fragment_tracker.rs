//! Tracks which loaded fragments actually made it into the media buffer.
//!
//! A fragment enters the tracker when its download completes, becomes
//! buffered once every appended stream reported back, and leaves again when
//! the media buffer evicts the time span it covered.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    buffer::{TimeRange, TimeRanges},
    model::{Fragment, FragmentKey, LevelType, StreamType},
};

/// Slack (seconds) applied around buffered ranges when matching fragments.
pub const BUFFER_PADDING: f64 = 0.2;

/// Buffering state of a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentState {
    NotLoaded,
    /// Loaded, not fully appended yet.
    Appending,
    /// Buffered with holes on at least one stream.
    Partial,
    Ok,
}

#[derive(Clone, Debug, Default)]
struct BufferedTimes {
    time: Vec<TimeRange>,
    partial: bool,
}

#[derive(Clone, Debug)]
struct TrackedFragment {
    body: Fragment,
    seq: u64,
    buffered: bool,
    ranges: HashMap<StreamType, BufferedTimes>,
}

impl TrackedFragment {
    fn is_partial(&self) -> bool {
        self.buffered && self.ranges.values().any(|r| r.partial)
    }

    fn span(&self) -> (f64, f64) {
        pts_span(&self.body)
    }
}

fn pts_span(frag: &Fragment) -> (f64, f64) {
    (
        frag.start_pts.unwrap_or(frag.start),
        frag.end_pts.unwrap_or_else(|| frag.end()),
    )
}

#[derive(Debug, Default)]
pub struct FragmentTracker {
    fragments: HashMap<FragmentKey, TrackedFragment>,
    time_ranges: HashMap<StreamType, TimeRanges>,
    next_seq: u64,
}

impl FragmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Entries in insertion order.
    fn ordered(&self) -> Vec<&TrackedFragment> {
        let mut entries: Vec<&TrackedFragment> = self.fragments.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn on_fragment_loaded(&mut self, frag: &Fragment) {
        if frag.sn.is_init() || frag.bitrate_test {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.fragments.insert(
            frag.key(),
            TrackedFragment {
                body: frag.clone(),
                seq,
                buffered: false,
                ranges: HashMap::new(),
            },
        );
    }

    /// Latest buffered ranges of `stream`; drops fragments that fell out of them.
    pub fn on_buffer_appended(&mut self, stream: StreamType, ranges: &TimeRanges) {
        self.time_ranges.insert(stream, ranges.clone());
        self.detect_evicted_fragments(stream, ranges);
    }

    pub fn detect_evicted_fragments(&mut self, stream: StreamType, ranges: &TimeRanges) {
        let evicted: Vec<FragmentKey> = self
            .fragments
            .iter()
            .filter(|(_, entry)| entry.buffered)
            .filter_map(|(key, entry)| {
                let times = entry.ranges.get(&stream)?;
                times
                    .time
                    .iter()
                    .any(|t| !is_time_buffered(t.start, t.end, ranges))
                    .then_some(*key)
            })
            .collect();
        for key in evicted {
            trace!(fragment = %key, "fragment evicted from buffer");
            self.fragments.remove(&key);
        }
    }

    /// All streams of `frag` were appended: record what the buffer holds of it.
    pub fn on_fragment_buffered(&mut self, frag: &Fragment) {
        let Some(entry) = self.fragments.get_mut(&frag.key()) else {
            return;
        };
        entry.body = frag.clone();
        entry.buffered = true;
        let (start, end) = pts_span(frag);
        for (stream, ranges) in &self.time_ranges {
            if frag.elementary_streams.has(*stream) {
                entry
                    .ranges
                    .insert(*stream, buffered_times(start, end, ranges));
            }
        }
    }

    pub fn get_state(&self, frag: &Fragment) -> FragmentState {
        match self.fragments.get(&frag.key()) {
            None => FragmentState::NotLoaded,
            Some(entry) if !entry.buffered => FragmentState::Appending,
            Some(entry) if entry.is_partial() => FragmentState::Partial,
            Some(_) => FragmentState::Ok,
        }
    }

    /// Most recently tracked buffered fragment of `kind` covering `position`.
    pub fn get_buffered_frag(&self, position: f64, kind: LevelType) -> Option<&Fragment> {
        self.ordered()
            .into_iter()
            .filter(|e| e.body.kind == kind && e.buffered)
            .filter(|e| {
                let (start, end) = e.span();
                start <= position && position <= end
            })
            .last()
            .map(|e| &e.body)
    }

    /// Partially buffered fragment whose padded span best centres on `time`.
    pub fn get_partial_fragment(&self, time: f64) -> Option<&Fragment> {
        let mut best: Option<&Fragment> = None;
        let mut best_overlap = 0.0;
        for entry in self.ordered() {
            if !entry.is_partial() {
                continue;
            }
            let (start, end) = entry.span();
            let start = start - BUFFER_PADDING;
            let end = end + BUFFER_PADDING;
            if time >= start && time <= end {
                let padding = (time - start).min(end - time);
                if best_overlap <= padding {
                    best = Some(&entry.body);
                    best_overlap = padding;
                }
            }
        }
        best
    }

    pub fn has_fragment(&self, frag: &Fragment) -> bool {
        self.fragments.contains_key(&frag.key())
    }

    pub fn remove_fragment(&mut self, frag: &Fragment) {
        self.fragments.remove(&frag.key());
    }

    pub fn remove_all_fragments(&mut self) {
        self.fragments.clear();
    }
}

fn is_time_buffered(start: f64, end: f64, ranges: &TimeRanges) -> bool {
    for range in ranges {
        let range_start = range.start - BUFFER_PADDING;
        let range_end = range.end + BUFFER_PADDING;
        if start >= range_start && end <= range_end {
            return true;
        }
        if end <= range_start {
            return false;
        }
    }
    false
}

fn buffered_times(start: f64, end: f64, ranges: &TimeRanges) -> BufferedTimes {
    let mut times = BufferedTimes::default();
    for range in ranges {
        let range_start = range.start - BUFFER_PADDING;
        let range_end = range.end + BUFFER_PADDING;
        let clamped = TimeRange::new(start.max(range.start), end.min(range.end));
        if start >= range_start && end <= range_end {
            times.time.push(clamped);
            break;
        } else if start < range_end && end > range_start {
            times.time.push(clamped);
            times.partial = true;
        } else if end <= range_start {
            break;
        }
    }
    times
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::model::test_fragment;

    fn video_frag(sn: u64, start: f64, end: f64) -> Fragment {
        let mut frag = test_fragment(sn, start, end - start);
        frag.start_pts = Some(start);
        frag.end_pts = Some(end);
        frag.elementary_streams.video = true;
        frag
    }

    fn ranges(spans: &[(f64, f64)]) -> TimeRanges {
        spans
            .iter()
            .map(|&(s, e)| TimeRange::new(s, e))
            .collect::<Vec<_>>()
            .into()
    }

    #[fixture]
    fn tracker() -> FragmentTracker {
        FragmentTracker::new()
    }

    fn buffer(tracker: &mut FragmentTracker, frag: &Fragment, spans: &[(f64, f64)]) {
        tracker.on_fragment_loaded(frag);
        tracker.on_buffer_appended(StreamType::Video, &ranges(spans));
        tracker.on_fragment_buffered(frag);
    }

    #[rstest]
    fn lifecycle_not_loaded_appending_ok(mut tracker: FragmentTracker) {
        let frag = video_frag(1, 0.0, 4.0);
        assert_eq!(tracker.get_state(&frag), FragmentState::NotLoaded);

        tracker.on_fragment_loaded(&frag);
        assert_eq!(tracker.get_state(&frag), FragmentState::Appending);

        tracker.on_buffer_appended(StreamType::Video, &ranges(&[(0.0, 4.0)]));
        tracker.on_fragment_buffered(&frag);
        assert_eq!(tracker.get_state(&frag), FragmentState::Ok);
    }

    #[rstest]
    #[case(&[(0.0, 2.5)])]
    #[case(&[(0.0, 1.0), (2.0, 4.0)])]
    fn holes_make_fragment_partial(mut tracker: FragmentTracker, #[case] spans: &[(f64, f64)]) {
        let frag = video_frag(1, 0.0, 4.0);
        buffer(&mut tracker, &frag, spans);
        assert_eq!(tracker.get_state(&frag), FragmentState::Partial);
        assert_eq!(tracker.get_partial_fragment(1.5).map(|f| f.sn), Some(frag.sn));
    }

    #[rstest]
    fn padding_tolerates_small_gaps(mut tracker: FragmentTracker) {
        let frag = video_frag(1, 0.0, 4.0);
        buffer(&mut tracker, &frag, &[(0.1, 3.9)]);
        assert_eq!(tracker.get_state(&frag), FragmentState::Ok);
    }

    #[rstest]
    fn eviction_forgets_fragment(mut tracker: FragmentTracker) {
        let first = video_frag(1, 0.0, 4.0);
        let second = video_frag(2, 4.0, 8.0);
        buffer(&mut tracker, &first, &[(0.0, 4.0)]);
        buffer(&mut tracker, &second, &[(0.0, 8.0)]);

        tracker.on_buffer_appended(StreamType::Video, &ranges(&[(4.0, 8.0)]));

        assert_eq!(tracker.get_state(&first), FragmentState::NotLoaded);
        assert_eq!(tracker.get_state(&second), FragmentState::Ok);
    }

    #[rstest]
    fn init_and_bitrate_test_loads_are_ignored(mut tracker: FragmentTracker) {
        let mut init = video_frag(0, 0.0, 0.0);
        init.sn = crate::model::FragmentSn::Init;
        let mut probe = video_frag(5, 20.0, 24.0);
        probe.bitrate_test = true;

        tracker.on_fragment_loaded(&init);
        tracker.on_fragment_loaded(&probe);

        assert!(tracker.is_empty());
    }

    #[rstest]
    fn buffered_frag_prefers_latest_insert(mut tracker: FragmentTracker) {
        let low = video_frag(3, 8.0, 12.0);
        let mut high = video_frag(3, 8.0, 12.0);
        high.level = 2;
        buffer(&mut tracker, &low, &[(8.0, 12.0)]);
        buffer(&mut tracker, &high, &[(8.0, 12.0)]);

        let found = tracker.get_buffered_frag(10.0, LevelType::Main);
        assert_eq!(found.map(|f| f.level), Some(2));
        assert!(tracker.get_buffered_frag(13.0, LevelType::Main).is_none());
        assert!(tracker.get_buffered_frag(10.0, LevelType::Audio).is_none());
    }

    #[rstest]
    fn remove_all_clears_entries(mut tracker: FragmentTracker) {
        let frag = video_frag(1, 0.0, 4.0);
        tracker.on_fragment_loaded(&frag);
        assert!(tracker.has_fragment(&frag));
        tracker.remove_all_fragments();
        assert!(!tracker.has_fragment(&frag));
    }
}
