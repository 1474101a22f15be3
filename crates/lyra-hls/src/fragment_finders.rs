//! Position and program-date-time lookups over a fragment list.

use std::cmp::Ordering;

use crate::model::Fragment;

/// Where `candidate` lies relative to `buffer_end`.
///
/// `Less` when the candidate ends before the buffer end (look further),
/// `Greater` when it starts after it, `Equal` when it contains it.
pub fn fragment_within_tolerance(buffer_end: f64, max_tolerance: f64, candidate: &Fragment) -> Ordering {
    let tolerance = candidate.lookup_tolerance(max_tolerance);
    if candidate.start + candidate.duration - tolerance <= buffer_end {
        Ordering::Less
    } else if candidate.start - tolerance > buffer_end && candidate.start != 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Candidate ends (minus tolerance) after `pdt` milliseconds.
pub fn pdt_within_tolerance(pdt: f64, max_tolerance: f64, candidate: &Fragment) -> bool {
    let tolerance = candidate.lookup_tolerance(max_tolerance) * 1000.0;
    candidate
        .end_program_date_time()
        .is_some_and(|end| end - tolerance > pdt)
}

/// Index of the fragment to load after `buffer_end`.
///
/// The successor of `previous` wins when it fits; otherwise binary search.
pub fn find_fragment_by_pts(
    previous: Option<&Fragment>,
    fragments: &[Fragment],
    buffer_end: f64,
    max_tolerance: f64,
) -> Option<usize> {
    let first_sn = fragments.first()?.media_sn()?;
    let next = previous
        .and_then(Fragment::media_sn)
        .and_then(|sn| (sn + 1).checked_sub(first_sn))
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < fragments.len());
    if let Some(index) = next
        && fragment_within_tolerance(buffer_end, max_tolerance, &fragments[index]) == Ordering::Equal
    {
        return Some(index);
    }

    let (mut low, mut high) = (0_isize, isize::try_from(fragments.len()).ok()? - 1);
    while low <= high {
        let mid = (low + high) / 2;
        let index = usize::try_from(mid).ok()?;
        match fragment_within_tolerance(buffer_end, max_tolerance, &fragments[index]) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid - 1,
            Ordering::Equal => return Some(index),
        }
    }
    None
}

/// Index of the fragment containing program date time `pdt` (milliseconds).
pub fn find_fragment_by_pdt(fragments: &[Fragment], pdt: f64, max_tolerance: f64) -> Option<usize> {
    if !pdt.is_finite() {
        return None;
    }
    let start = fragments.first()?.program_date_time.unwrap_or(0.0);
    if pdt < start {
        return None;
    }
    let end = fragments.last()?.end_program_date_time().unwrap_or(0.0);
    if pdt >= end {
        return None;
    }
    fragments
        .iter()
        .position(|frag| pdt_within_tolerance(pdt, max_tolerance, frag))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::model::test_details;

    fn fragments() -> Vec<Fragment> {
        let mut details = test_details(10, 6, 4.0);
        for (i, frag) in details.fragments.iter_mut().enumerate() {
            #[expect(clippy::cast_precision_loss)]
            let offset = i as f64 * 4_000.0;
            frag.program_date_time = Some(1_000_000.0 + offset);
        }
        details.fragments
    }

    #[rstest]
    #[case(0.0, Some(0))]
    #[case(3.9, Some(1))]
    #[case(5.0, Some(1))]
    #[case(19.8, Some(5))]
    #[case(23.8, None)]
    fn pts_lookup_without_previous(#[case] buffer_end: f64, #[case] expected: Option<usize>) {
        assert_eq!(find_fragment_by_pts(None, &fragments(), buffer_end, 0.25), expected);
    }

    #[test]
    fn pts_lookup_prefers_successor() {
        let frags = fragments();
        let found = find_fragment_by_pts(Some(&frags[2]), &frags, 12.0, 0.25);
        assert_eq!(found, Some(3));
    }

    #[test]
    fn pts_lookup_falls_back_to_search_after_seek() {
        let frags = fragments();
        let found = find_fragment_by_pts(Some(&frags[0]), &frags, 17.0, 0.25);
        assert_eq!(found, Some(4));
    }

    #[rstest]
    #[case(999_999.0, None)]
    #[case(1_000_000.0, Some(0))]
    #[case(1_005_000.0, Some(1))]
    #[case(1_023_900.0, None)]
    #[case(1_024_000.0, None)]
    fn pdt_lookup(#[case] pdt: f64, #[case] expected: Option<usize>) {
        assert_eq!(find_fragment_by_pdt(&fragments(), pdt, 0.25), expected);
    }

    #[test]
    fn empty_list_finds_nothing() {
        assert_eq!(find_fragment_by_pts(None, &[], 0.0, 0.25), None);
        assert_eq!(find_fragment_by_pdt(&[], 0.0, 0.25), None);
    }
}
