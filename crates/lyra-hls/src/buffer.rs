//! Buffered time ranges and the forward-buffer query used by every scheduler.

/// Half-open `[start, end)` span in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Sorted list of buffered spans, as reported by a media buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<TimeRange>,
}

impl TimeRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges(mut ranges: Vec<TimeRange>) -> Self {
        ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<TimeRange> {
        self.ranges.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.ranges.iter()
    }

    pub fn contains(&self, time: f64) -> bool {
        self.ranges.iter().any(|r| r.contains(time))
    }

    /// End of the last span.
    pub fn end(&self) -> Option<f64> {
        self.ranges.last().map(|r| r.end)
    }

    /// Add a span, merging with any span it touches.
    pub fn insert(&mut self, range: TimeRange) {
        self.ranges.push(range);
        self.ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut merged: Vec<TimeRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    /// Remove `[start, end)` from every span.
    pub fn remove(&mut self, start: f64, end: f64) {
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end <= start || r.start >= end {
                kept.push(r);
                continue;
            }
            if r.start < start {
                kept.push(TimeRange::new(r.start, start));
            }
            if r.end > end {
                kept.push(TimeRange::new(end, r.end));
            }
        }
        self.ranges = kept;
    }
}

impl From<Vec<TimeRange>> for TimeRanges {
    fn from(ranges: Vec<TimeRange>) -> Self {
        Self::from_ranges(ranges)
    }
}

impl<'a> IntoIterator for &'a TimeRanges {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

/// Forward buffer around a position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferInfo {
    /// Seconds buffered ahead of the position.
    pub len: f64,
    pub start: f64,
    pub end: f64,
    /// Start of the next span after a hole, if any.
    pub next_start: Option<f64>,
}

/// Contiguous buffer containing `pos`, bridging holes shorter than `max_hole`.
pub fn buffer_info(ranges: &TimeRanges, pos: f64, max_hole: f64) -> BufferInfo {
    let mut spans: Vec<TimeRange> = ranges.iter().copied().collect();
    spans.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then_with(|| b.end.total_cmp(&a.end))
    });

    let mut merged: Vec<TimeRange> = Vec::with_capacity(spans.len());
    if max_hole > 0.0 {
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.start - last.end < max_hole => {
                    if span.end > last.end {
                        last.end = span.end;
                    }
                }
                _ => merged.push(span),
            }
        }
    } else {
        merged = spans;
    }

    let mut info = BufferInfo {
        len: 0.0,
        start: pos,
        end: pos,
        next_start: None,
    };
    for span in merged {
        if pos + max_hole >= span.start && pos < span.end {
            info.start = span.start;
            info.end = span.end;
            info.len = span.end - pos;
        } else if pos + max_hole < span.start {
            info.next_start = Some(span.start);
            break;
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ranges(spans: &[(f64, f64)]) -> TimeRanges {
        spans
            .iter()
            .map(|&(s, e)| TimeRange::new(s, e))
            .collect::<Vec<_>>()
            .into()
    }

    #[rstest]
    #[case(&[], 5.0, 0.0, 5.0, 5.0, None)]
    #[case(&[(0.0, 10.0)], 5.0, 5.0, 0.0, 10.0, None)]
    #[case(&[(0.0, 10.0), (10.3, 20.0)], 5.0, 15.0, 0.0, 20.0, None)]
    #[case(&[(0.0, 10.0), (12.0, 20.0)], 5.0, 5.0, 0.0, 10.0, Some(12.0))]
    #[case(&[(6.0, 10.0)], 5.8, 4.2, 6.0, 10.0, None)]
    #[case(&[(7.0, 10.0)], 5.0, 0.0, 5.0, 5.0, Some(7.0))]
    fn locates_position(
        #[case] spans: &[(f64, f64)],
        #[case] pos: f64,
        #[case] len: f64,
        #[case] start: f64,
        #[case] end: f64,
        #[case] next_start: Option<f64>,
    ) {
        let info = buffer_info(&ranges(spans), pos, 0.5);
        assert!((info.len - len).abs() < 1e-9, "{info:?}");
        assert_eq!(info.start, start);
        assert_eq!(info.end, end);
        assert_eq!(info.next_start, next_start);
    }

    #[test]
    fn zero_hole_keeps_gaps() {
        let info = buffer_info(&ranges(&[(0.0, 10.0), (10.1, 20.0)]), 5.0, 0.0);
        assert_eq!(info.end, 10.0);
        assert_eq!(info.next_start, Some(10.1));
    }

    #[test]
    fn insert_merges_touching_spans() {
        let mut r = ranges(&[(0.0, 4.0)]);
        r.insert(TimeRange::new(4.0, 8.0));
        r.insert(TimeRange::new(12.0, 16.0));
        assert_eq!(r.len(), 2);
        assert_eq!(r.get(0), Some(TimeRange::new(0.0, 8.0)));
        assert_eq!(r.end(), Some(16.0));
    }

    #[test]
    fn remove_splits_spans() {
        let mut r = ranges(&[(0.0, 10.0)]);
        r.remove(4.0, 6.0);
        assert_eq!(r.len(), 2);
        assert!(r.contains(3.9));
        assert!(!r.contains(5.0));
        assert!(r.contains(6.0));
    }
}
