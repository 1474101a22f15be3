//! Playlist reload merging and PTS propagation.
//!
//! A live playlist reload produces a fresh [`LevelDetails`] whose fragment
//! timing only comes from `#EXTINF`. Timing learned by demuxing earlier
//! fragments (PTS) is carried over from the previous details here, and a PTS
//! correction on one fragment is propagated outward to its neighbours.

use tracing::{debug, warn};

use crate::model::{Fragment, LevelDetails};

/// Demuxed timing of a fragment, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PtsRange {
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
}

impl PtsRange {
    pub fn new(start_pts: f64, end_pts: f64, start_dts: f64, end_dts: f64) -> Self {
        Self {
            start_pts,
            end_pts,
            start_dts,
            end_dts,
        }
    }

    /// Timing already recorded on `frag`, DTS falling back to PTS.
    pub fn of(frag: &Fragment) -> Option<Self> {
        let start_pts = frag.start_pts?;
        let end_pts = frag.end_pts?;
        Some(Self {
            start_pts,
            end_pts,
            start_dts: frag.start_dts.unwrap_or(start_pts),
            end_dts: frag.end_dts.unwrap_or(end_pts),
        })
    }
}

/// Record demuxed timing on `frag` and propagate it through `details`.
///
/// Returns the drift between the new start PTS and the previous playlist
/// start, or 0 when the fragment lies outside the window of `details`.
pub fn update_frag_pts_dts(
    details: Option<&mut LevelDetails>,
    frag: &mut Fragment,
    range: PtsRange,
) -> f64 {
    let PtsRange {
        mut start_pts,
        mut end_pts,
        mut start_dts,
        mut end_dts,
    } = range;

    let mut max_start_pts = start_pts;
    if let Some(frag_start_pts) = frag.start_pts {
        let delta = (frag_start_pts - start_pts).abs();
        frag.delta_pts = Some(frag.delta_pts.map_or(delta, |d| d.max(delta)));
        max_start_pts = start_pts.max(frag_start_pts);
        start_pts = start_pts.min(frag_start_pts);
        end_pts = end_pts.max(frag.end_pts.unwrap_or(end_pts));
        start_dts = start_dts.min(frag.start_dts.unwrap_or(start_dts));
        end_dts = end_dts.max(frag.end_dts.unwrap_or(end_dts));
    }

    let drift = start_pts - frag.start;
    frag.start = start_pts;
    frag.start_pts = Some(start_pts);
    frag.max_start_pts = Some(max_start_pts);
    frag.end_pts = Some(end_pts);
    frag.start_dts = Some(start_dts);
    frag.end_dts = Some(end_dts);
    frag.duration = end_pts - start_pts;

    let Some(details) = details else {
        return 0.0;
    };
    let Some(index) = details.index_of(frag.sn) else {
        return 0.0;
    };
    let Some(slot) = details.fragments.get_mut(index) else {
        return 0.0;
    };
    *slot = frag.clone();

    let fragments = &mut details.fragments;
    for i in (1..=index).rev() {
        update_pts(fragments, i, i - 1);
    }
    for i in index..fragments.len().saturating_sub(1) {
        update_pts(fragments, i, i + 1);
    }
    details.pts_known = true;
    drift
}

/// Adjust the timing of `fragments[to]` from its neighbour `fragments[from]`.
fn update_pts(fragments: &mut [Fragment], from: usize, to: usize) {
    let from_start = fragments[from].start;
    let from_duration = fragments[from].duration;
    let to_start_pts = fragments[to].start_pts;

    match to_start_pts {
        Some(to_pts) if to > from => {
            let frag = &mut fragments[from];
            frag.duration = to_pts - frag.start;
            if frag.duration < 0.0 {
                warn!(sn = %frag.sn, duration = frag.duration, "negative fragment duration");
            }
        }
        Some(to_pts) => {
            let frag = &mut fragments[to];
            frag.duration = from_start - to_pts;
            if frag.duration < 0.0 {
                warn!(sn = %frag.sn, duration = frag.duration, "negative fragment duration");
            }
        }
        None if to > from => {
            fragments[to].start = from_start + from_duration;
        }
        None => {
            let frag = &mut fragments[to];
            frag.start = (from_start - frag.duration).max(0.0);
        }
    }
}

/// Index pairs `(old, new)` of fragments present in both playlists.
pub fn fragment_intersection(old: &LevelDetails, new: &LevelDetails) -> Vec<(usize, usize)> {
    if old.fragments.is_empty() || new.fragments.is_empty() {
        return Vec::new();
    }
    let (Ok(old_start), Ok(old_end), Ok(new_start), Ok(new_end)) = (
        i64::try_from(old.start_sn),
        i64::try_from(old.end_sn),
        i64::try_from(new.start_sn),
        i64::try_from(new.end_sn),
    ) else {
        return Vec::new();
    };
    let first = old_start.max(new_start) - new_start;
    let last = old_end.min(new_end) - new_start;
    let delta = new_start - old_start;

    (first..=last)
        .filter_map(|i| {
            let old_index = usize::try_from(delta + i).ok()?;
            let new_index = usize::try_from(i).ok()?;
            (old_index < old.fragments.len() && new_index < new.fragments.len())
                .then_some((old_index, new_index))
        })
        .collect()
}

/// Carry timing learned in `old` over to a freshly parsed `new`.
pub fn merge_details(old: &LevelDetails, new: &mut LevelDetails) {
    if new.init_segment.is_some() && old.init_segment.is_some() {
        new.init_segment.clone_from(&old.init_segment);
    }

    let pairs = fragment_intersection(old, new);
    let mut cc_offset: i64 = 0;
    let mut pts_seed: Option<usize> = None;
    new.pts_known = false;
    for &(old_index, new_index) in &pairs {
        let old_frag = &old.fragments[old_index];
        let new_frag = &mut new.fragments[new_index];
        #[expect(clippy::cast_possible_wrap)]
        let offset = old_frag.cc as i64 - new_frag.cc as i64;
        cc_offset = offset;
        if let Some(start_pts) = old_frag.start_pts {
            new_frag.start = start_pts;
            new_frag.start_pts = Some(start_pts);
            new_frag.end_pts = old_frag.end_pts;
            new_frag.duration = old_frag.duration;
            new_frag.backtracked = old_frag.backtracked;
            new_frag.dropped = old_frag.dropped;
            pts_seed = Some(new_index);
        }
        new.pts_known = true;
    }

    if !new.pts_known {
        return;
    }

    if cc_offset != 0 {
        debug!(cc_offset, "discontinuity sliding from playlist");
        for frag in &mut new.fragments {
            frag.cc = frag.cc.saturating_add_signed(cc_offset);
        }
        new.refresh_derived();
    }

    match pts_seed.and_then(|i| new.fragments.get(i).cloned()) {
        Some(mut seed) => {
            if let Some(range) = PtsRange::of(&seed) {
                update_frag_pts_dts(Some(new), &mut seed, range);
            }
        }
        None => adjust_sliding(old, new),
    }

    new.pts_known = old.pts_known;
}

/// Shift `new` by the start of the first fragment it shares with `old`.
pub fn adjust_sliding(old: &LevelDetails, new: &mut LevelDetails) {
    let Some(delta) = new.start_sn.checked_sub(old.start_sn) else {
        return;
    };
    let Some(sliding) = usize::try_from(delta)
        .ok()
        .and_then(|d| old.fragments.get(d))
        .map(|f| f.start)
    else {
        return;
    };
    if sliding != 0.0 {
        debug!(sliding, "live playlist sliding");
    }
    for frag in &mut new.fragments {
        frag.start += sliding;
    }
}

/// Reload delay (ms) of a live playlist.
///
/// One (average) target duration, halved when the reload brought nothing
/// new, minus the time the request itself took, never below half.
pub fn compute_reload_interval(
    old: Option<&LevelDetails>,
    new: &LevelDetails,
    elapsed_since_request_ms: Option<f64>,
) -> u64 {
    let target = if new.average_target_duration > 0.0 {
        new.average_target_duration
    } else {
        new.target_duration
    };
    let mut interval = 1000.0 * target;
    let min_interval = interval / 2.0;
    if old.is_some_and(|old| old.end_sn == new.end_sn) {
        interval = min_interval;
    }
    if let Some(elapsed) = elapsed_since_request_ms {
        interval = min_interval.max(interval - elapsed);
    }
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let interval = interval.round().max(0.0) as u64;
    interval
}

/// Align a reloaded subtitle playlist on the previous one, or on
/// `reference_start` when nothing overlaps.
pub fn merge_subtitle_playlists(old: &LevelDetails, new: &mut LevelDetails, reference_start: f64) {
    let mut last_index = None;
    for (old_index, new_index) in fragment_intersection(old, new) {
        new.fragments[new_index].start = old.fragments[old_index].start;
        last_index = Some(new_index);
    }

    let Some(last_index) = last_index else {
        for frag in &mut new.fragments {
            frag.start += reference_start;
        }
        return;
    };
    for i in last_index + 1..new.fragments.len() {
        new.fragments[i].start = new.fragments[i - 1].end();
    }
}

/// Place `new` on the timeline of another level using program date times.
pub fn align_pdt(new: &mut LevelDetails, reference: &LevelDetails) {
    let (Some(new_first), Some(ref_first)) = (new.fragments.first(), reference.fragments.first())
    else {
        return;
    };
    let (Some(new_pdt), Some(ref_pdt)) = (new_first.program_date_time, ref_first.program_date_time)
    else {
        return;
    };
    let sliding = (new_pdt - ref_pdt) / 1000.0 + ref_first.start;
    if !sliding.is_finite() {
        return;
    }
    debug!(sliding, "adjusting PTS using program date time delta");
    for frag in &mut new.fragments {
        let start = frag.start + sliding;
        frag.start = start;
        frag.start_pts = Some(start);
        frag.end_pts = Some(start + frag.duration);
    }
    new.pts_known = true;
}
