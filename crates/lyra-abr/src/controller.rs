use tracing::{debug, warn};

use crate::{
    AbrContext, AbrOptions, Estimator, EwmaBandwidthEstimator, InFlightLoad, LevelSource,
    PlaybackState,
};

/// Bandwidth share assumed available when deciding whether a lower level
/// could still finish before the buffer runs out during an emergency abort.
pub const ABANDON_BANDWIDTH_FACTOR: f64 = 0.8;

/// Parameters of one `find_best_level` pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BestLevelQuery {
    pub current_level: usize,
    pub current_frag_duration: Option<f64>,
    /// Bandwidth estimate (bps) before conservatism factors.
    pub bandwidth: f64,
    pub min_auto_level: usize,
    pub max_auto_level: usize,
    /// Seconds a fragment may take to load without causing a stall.
    pub max_fetch_duration: f64,
    pub bandwidth_factor: f64,
    pub bandwidth_up_factor: f64,
}

/// Result of a positive abandon check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbandonDecision {
    /// Level to switch to.
    pub next_level: usize,
    /// Seconds until the current load would finish.
    pub frag_loaded_delay: f64,
    /// Seconds the same fragment would take on `next_level`.
    pub next_load_delay: f64,
    pub buffer_starvation_delay: f64,
}

/// Measured bitrate of a level from accumulated downloads.
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn real_bitrate(loaded_bytes: u64, loaded_duration: f64) -> u64 {
    if loaded_duration <= 0.0 {
        return 0;
    }
    #[expect(clippy::cast_precision_loss)]
    let bits = 8.0 * loaded_bytes as f64;
    (bits / loaded_duration).round() as u64
}

/// Bandwidth-driven level selection.
///
/// Holds the estimator plus the little state the selection depends on: the
/// level of the last loaded main fragment, an externally forced cap and the
/// duration of the initial bitrate test.
pub struct AbrController<E: Estimator> {
    cfg: AbrOptions,
    estimator: Option<E>,
    last_loaded_frag_level: usize,
    forced_auto_level: Option<usize>,
    bitrate_test_delay: f64,
}

pub type DefaultAbrController = AbrController<EwmaBandwidthEstimator>;

impl AbrController<EwmaBandwidthEstimator> {
    /// Controller whose estimator is created by [`Self::ensure_estimator`].
    pub fn new(cfg: AbrOptions) -> Self {
        Self {
            cfg,
            estimator: None,
            last_loaded_frag_level: 0,
            forced_auto_level: None,
            bitrate_test_delay: 0.0,
        }
    }

    /// Create the estimator on first use, with live or VOD half-lives.
    pub fn ensure_estimator(&mut self, live: bool) {
        if self.estimator.is_some() {
            return;
        }
        let (slow, fast) = self.cfg.half_lives(live);
        debug!(live, slow, fast, "creating bandwidth estimator");
        self.estimator = Some(EwmaBandwidthEstimator::new(
            slow,
            fast,
            self.cfg.default_estimate,
        ));
    }
}

impl<E: Estimator> AbrController<E> {
    pub fn with_estimator(cfg: AbrOptions, estimator: E) -> Self {
        Self {
            cfg,
            estimator: Some(estimator),
            last_loaded_frag_level: 0,
            forced_auto_level: None,
            bitrate_test_delay: 0.0,
        }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.cfg
    }

    pub fn estimator(&self) -> Option<&E> {
        self.estimator.as_ref()
    }

    /// Current estimate in bps, the configured default until samples exist.
    pub fn bandwidth_estimate(&self) -> f64 {
        self.estimator
            .as_ref()
            .map_or(self.cfg.default_estimate, Estimator::estimate)
    }

    fn can_estimate(&self) -> bool {
        self.estimator.as_ref().is_some_and(Estimator::can_estimate)
    }

    pub fn last_loaded_frag_level(&self) -> usize {
        self.last_loaded_frag_level
    }

    pub fn bitrate_test_delay(&self) -> f64 {
        self.bitrate_test_delay
    }

    pub fn forced_auto_level(&self) -> Option<usize> {
        self.forced_auto_level
    }

    /// Force (or release with `None`) the next automatic level.
    pub fn set_next_auto_level(&mut self, level: Option<usize>) {
        self.forced_auto_level = level;
    }

    /// Highest level in `[min, max]` that can be fetched within the budget.
    ///
    /// Walks the ladder from the top so the first acceptable level is the best.
    /// `None` means no level avoids rebuffering.
    pub fn find_best_level<L: LevelSource + ?Sized>(
        &self,
        levels: &L,
        query: &BestLevelQuery,
    ) -> Option<usize> {
        if levels.level_count() == 0 {
            return None;
        }
        let top = query.max_auto_level.min(levels.level_count() - 1);
        if query.min_auto_level > top {
            return None;
        }

        for i in (query.min_auto_level..=top).rev() {
            let Some(bitrate) = levels.effective_bitrate(i) else {
                continue;
            };
            let avg_duration = levels
                .average_fragment_duration(i)
                .or(query.current_frag_duration);
            let live = levels.is_live(i);

            let adjusted_bw = if i <= query.current_level {
                query.bandwidth_factor * query.bandwidth
            } else {
                query.bandwidth_up_factor * query.bandwidth
            };
            #[expect(clippy::cast_precision_loss)]
            let bitrate = bitrate as f64;
            let fetch_duration = avg_duration
                .map(|d| bitrate * d / adjusted_bw)
                .filter(|d| d.is_finite() && *d > 0.0);

            debug!(
                level = i,
                bitrate,
                adjusted_bw,
                ?fetch_duration,
                max_fetch_duration = query.max_fetch_duration,
                "abr candidate"
            );

            let within_budget = match fetch_duration {
                None => true,
                Some(fetch) => {
                    (live && self.bitrate_test_delay == 0.0) || fetch < query.max_fetch_duration
                }
            };
            if adjusted_bw > bitrate && within_budget {
                return Some(i);
            }
        }
        None
    }

    /// Level ABR would pick right now, ignoring the forced cap.
    pub fn next_abr_auto_level<L: LevelSource + ?Sized>(&self, levels: &L, ctx: &AbrContext) -> usize {
        let bandwidth = self.bandwidth_estimate();
        let starvation = ctx.playback.starvation_delay();
        let frag_duration = ctx.current_frag_duration.filter(|d| *d > 0.0);

        let mut query = BestLevelQuery {
            current_level: self.last_loaded_frag_level,
            current_frag_duration: frag_duration,
            bandwidth,
            min_auto_level: ctx.min_auto_level,
            max_auto_level: ctx.max_auto_level,
            max_fetch_duration: starvation,
            bandwidth_factor: self.cfg.bandwidth_factor,
            bandwidth_up_factor: self.cfg.bandwidth_up_factor,
        };

        if let Some(level) = self.find_best_level(levels, &query) {
            return level;
        }

        // No level fits the current buffer; accept some rebuffering.
        let mut max_starvation_delay = frag_duration
            .map_or(self.cfg.max_starvation_delay, |d| {
                d.min(self.cfg.max_starvation_delay)
            });
        if starvation == 0.0 && self.bitrate_test_delay > 0.0 {
            // Right after the bitrate test: the test load already consumed
            // part of the loading budget and its measurement is trusted as is.
            let max_loading_delay = frag_duration
                .map_or(self.cfg.max_loading_delay, |d| d.min(self.cfg.max_loading_delay));
            max_starvation_delay = max_loading_delay - self.bitrate_test_delay;
            query.bandwidth_factor = 1.0;
            query.bandwidth_up_factor = 1.0;
            debug!(
                bitrate_test_delay = self.bitrate_test_delay,
                max_starvation_delay, "bitrate test took part of the loading budget"
            );
        }
        query.max_fetch_duration = starvation + max_starvation_delay;

        self.find_best_level(levels, &query).unwrap_or(0)
    }

    /// Next automatic level, honouring a forced cap.
    ///
    /// While the estimator cannot produce a reliable value the forced level
    /// wins outright; afterwards it only caps the ABR result.
    pub fn next_auto_level<L: LevelSource + ?Sized>(&self, levels: &L, ctx: &AbrContext) -> usize {
        if let Some(forced) = self.forced_auto_level {
            if !self.can_estimate() {
                return forced;
            }
            return forced.min(self.next_abr_auto_level(levels, ctx));
        }
        self.next_abr_auto_level(levels, ctx)
    }

    /// Decide whether an in-flight load should be abandoned for a lower level.
    pub fn check_abandon<L: LevelSource + ?Sized>(
        &self,
        levels: &L,
        load: &InFlightLoad,
        playback: &PlaybackState,
        min_auto_level: usize,
    ) -> Option<AbandonDecision> {
        if !load.auto_level || load.level == 0 {
            return None;
        }
        let rate = playback.effective_rate();
        if load.request_delay_ms <= 500.0 * load.duration / rate {
            return None;
        }

        #[expect(clippy::cast_precision_loss)]
        let loaded = load.loaded as f64;
        let load_rate = match load.bandwidth_bps {
            Some(bw) if bw > 0.0 => bw / 8.0,
            _ => loaded * 1000.0 / load.request_delay_ms,
        }
        .max(1.0);

        let level_bitrate = levels.effective_bitrate(load.level)?;
        #[expect(clippy::cast_precision_loss)]
        let expected_len = match load.total {
            Some(total) if total > 0 => total as f64,
            _ => loaded.max((load.duration * level_bitrate as f64 / 8.0).round()),
        };
        let frag_loaded_delay = (expected_len - loaded) / load_rate;
        let buffer_starvation_delay = playback.starvation_delay();

        if buffer_starvation_delay >= 2.0 * load.duration / rate
            || frag_loaded_delay <= buffer_starvation_delay
        {
            return None;
        }

        let floor = min_auto_level.min(load.level - 1);
        let mut candidate = None;
        for next in (floor..load.level).rev() {
            let Some(bitrate) = levels.effective_bitrate(next) else {
                continue;
            };
            #[expect(clippy::cast_precision_loss)]
            let delay =
                load.duration * bitrate as f64 / (8.0 * ABANDON_BANDWIDTH_FACTOR * load_rate);
            candidate = Some((next, delay));
            if delay < buffer_starvation_delay {
                break;
            }
        }

        let (next_level, next_load_delay) = candidate?;
        if next_load_delay >= frag_loaded_delay {
            return None;
        }

        warn!(
            level = load.level,
            next_level,
            frag_loaded_delay,
            next_load_delay,
            buffer_starvation_delay,
            "loading too slow, abandoning fragment"
        );
        Some(AbandonDecision {
            next_level,
            frag_loaded_delay,
            next_load_delay,
            buffer_starvation_delay,
        })
    }

    /// Apply an abandon decision: force the lower level and record the
    /// degraded throughput.
    pub fn record_abandon(&mut self, load: &InFlightLoad, decision: &AbandonDecision) {
        self.forced_auto_level = Some(decision.next_level);
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.sample(load.request_delay_ms, load.loaded);
        }
    }

    /// A main fragment finished downloading.
    pub fn on_fragment_loaded(&mut self, level: usize) {
        self.last_loaded_frag_level = level;
        self.forced_auto_level = None;
    }

    /// A main fragment was parsed and buffered, `duration_ms` after its request.
    ///
    /// Bitrate-test loads count as buffered as soon as they are downloaded and
    /// remember their duration for the next decision.
    pub fn on_fragment_buffered(&mut self, duration_ms: f64, bytes: u64, bitrate_test: bool) {
        if let Some(estimator) = self.estimator.as_mut() {
            estimator.sample(duration_ms, bytes);
        }
        self.bitrate_test_delay = if bitrate_test {
            duration_ms / 1000.0
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{LevelInfo, MockEstimator};

    fn ladder() -> Vec<LevelInfo> {
        vec![
            LevelInfo::new(500_000).with_fragment_duration(4.0),
            LevelInfo::new(1_500_000).with_fragment_duration(4.0),
            LevelInfo::new(3_000_000).with_fragment_duration(4.0),
        ]
    }

    fn estimating(bps: f64) -> MockEstimator {
        let mut est = MockEstimator::new();
        est.expect_can_estimate().return_const(true);
        est.expect_estimate().return_const(bps);
        est.expect_sample().return_const(());
        est
    }

    fn ctx(buffer_ahead: f64) -> AbrContext {
        AbrContext {
            min_auto_level: 0,
            max_auto_level: 2,
            playback: PlaybackState::new(10.0, 10.0 + buffer_ahead, 1.0),
            current_frag_duration: Some(4.0),
        }
    }

    fn query(current_level: usize, bandwidth: f64, max_fetch_duration: f64) -> BestLevelQuery {
        BestLevelQuery {
            current_level,
            current_frag_duration: Some(4.0),
            bandwidth,
            min_auto_level: 0,
            max_auto_level: 2,
            max_fetch_duration,
            bandwidth_factor: 0.95,
            bandwidth_up_factor: 0.7,
        }
    }

    #[rstest]
    #[case(0, 400_000.0, None)]
    #[case(0, 1_000_000.0, Some(0))]
    #[case(0, 4_000_000.0, Some(1))]
    #[case(1, 4_000_000.0, Some(1))]
    #[case(2, 4_000_000.0, Some(2))]
    #[case(0, 5_000_000.0, Some(2))]
    fn find_best_level_applies_hold_and_up_factors(
        #[case] current: usize,
        #[case] bandwidth: f64,
        #[case] expected: Option<usize>,
    ) {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(bandwidth));
        let levels = ladder();
        assert_eq!(
            abr.find_best_level(levels.as_slice(), &query(current, bandwidth, 100.0)),
            expected
        );
    }

    #[rstest]
    #[case(100_000.0)]
    #[case(700_000.0)]
    #[case(1_800_000.0)]
    #[case(2_500_000.0)]
    #[case(3_500_000.0)]
    #[case(9_000_000.0)]
    fn selected_bitrate_never_exceeds_adjusted_bandwidth(#[case] bandwidth: f64) {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(bandwidth));
        let levels = ladder();
        for current in 0..levels.len() {
            if let Some(best) =
                abr.find_best_level(levels.as_slice(), &query(current, bandwidth, 1e9))
            {
                let factor = if best <= current { 0.95 } else { 0.7 };
                #[expect(clippy::cast_precision_loss)]
                let bitrate = levels[best].bitrate as f64;
                assert!(bitrate < bandwidth * factor);
            }
        }
    }

    #[test]
    fn fetch_duration_budget_rejects_slow_levels() {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(2_000_000.0));
        let levels = ladder();
        // Level 1 at 1.9 Mbps adjusted: 1.5M * 4 / 1.9M ~ 3.16 s.
        assert_eq!(
            abr.find_best_level(levels.as_slice(), &query(1, 2_000_000.0, 3.0)),
            Some(0)
        );
        assert_eq!(
            abr.find_best_level(levels.as_slice(), &query(1, 2_000_000.0, 3.5)),
            Some(1)
        );
    }

    #[test]
    fn live_levels_ignore_fetch_budget() {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(2_000_000.0));
        let levels: Vec<LevelInfo> = ladder().into_iter().map(|l| l.with_live(true)).collect();
        assert_eq!(
            abr.find_best_level(levels.as_slice(), &query(1, 2_000_000.0, 0.0)),
            Some(1)
        );
    }

    #[test]
    fn default_estimate_selects_lowest_level() {
        let mut abr = DefaultAbrController::new(AbrOptions::default());
        abr.ensure_estimator(false);
        let levels = ladder();
        assert_eq!(abr.bandwidth_estimate(), 500_000.0);
        assert_eq!(abr.next_auto_level(levels.as_slice(), &ctx(0.0)), 0);
    }

    #[test]
    fn inflated_budget_used_when_buffer_is_short() {
        let mut abr = AbrController::with_estimator(AbrOptions::default(), estimating(2_000_000.0));
        abr.on_fragment_loaded(1);
        let levels = ladder();
        // 1.5 Mbps at 0.95 * 2 Mbps needs ~3.16 s per 4 s fragment: nothing
        // fits an empty buffer, the allowance then decides.
        let mut ctx = ctx(0.0);
        assert_eq!(abr.next_abr_auto_level(levels.as_slice(), &ctx), 1);

        ctx.current_frag_duration = Some(2.0);
        assert_eq!(abr.next_abr_auto_level(levels.as_slice(), &ctx), 0);
    }

    #[test]
    fn result_is_clamped_to_zero_when_nothing_fits() {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(10_000.0));
        let levels = ladder();
        assert_eq!(abr.next_abr_auto_level(levels.as_slice(), &ctx(0.0)), 0);
    }

    #[test]
    fn bitrate_test_disables_conservatism_factors() {
        let mut abr = AbrController::with_estimator(AbrOptions::default(), estimating(1_800_000.0));
        let levels = ladder();
        assert_eq!(abr.next_abr_auto_level(levels.as_slice(), &ctx(0.0)), 0);

        abr.on_fragment_buffered(500.0, 100_000, true);
        assert_eq!(abr.bitrate_test_delay(), 0.5);
        // Factors of 1 let 1.5 Mbps through although 0.7 * 1.8 Mbps would not.
        assert_eq!(abr.next_abr_auto_level(levels.as_slice(), &ctx(0.0)), 1);

        abr.on_fragment_buffered(500.0, 100_000, false);
        assert_eq!(abr.bitrate_test_delay(), 0.0);
    }

    #[rstest]
    #[case::unreliable_estimate_uses_forced(false, 2, 2)]
    #[case::forced_above_abr_is_capped(true, 2, 1)]
    #[case::forced_caps_abr(true, 0, 0)]
    fn forced_level_precedence(
        #[case] can_estimate: bool,
        #[case] forced: usize,
        #[case] expected: usize,
    ) {
        let mut est = MockEstimator::new();
        est.expect_can_estimate().return_const(can_estimate);
        est.expect_estimate().return_const(4_000_000.0);
        let mut abr = AbrController::with_estimator(AbrOptions::default(), est);
        let levels = ladder();
        let ctx = ctx(30.0);

        assert_eq!(abr.next_auto_level(levels.as_slice(), &ctx), 1);

        abr.set_next_auto_level(Some(forced));
        assert_eq!(abr.next_auto_level(levels.as_slice(), &ctx), expected);
    }

    #[test]
    fn fragment_loaded_releases_forced_level() {
        let mut abr = DefaultAbrController::new(AbrOptions::default());
        abr.set_next_auto_level(Some(1));
        abr.on_fragment_loaded(2);
        assert_eq!(abr.forced_auto_level(), None);
        assert_eq!(abr.last_loaded_frag_level(), 2);
    }

    fn slow_load() -> InFlightLoad {
        InFlightLoad {
            level: 2,
            duration: 4.0,
            request_delay_ms: 3_000.0,
            loaded: 150_000,
            total: Some(1_500_000),
            bandwidth_bps: None,
            auto_level: true,
        }
    }

    #[test]
    fn abandon_switches_down_when_starving() {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(400_000.0));
        let levels = ladder();
        let playback = PlaybackState::new(10.0, 11.0, 1.0);

        let decision = abr
            .check_abandon(levels.as_slice(), &slow_load(), &playback, 0)
            .expect("abandon");
        // 50 kB/s: level 1 needs 4*1.5M/(8*0.8*50k) = 18.75 s, level 0 6.25 s.
        assert_eq!(decision.next_level, 0);
        assert!((decision.frag_loaded_delay - 27.0).abs() < 1e-9);
        assert!((decision.next_load_delay - 6.25).abs() < 1e-9);
    }

    #[rstest]
    #[case::too_early(InFlightLoad { request_delay_ms: 1_500.0, ..slow_load() })]
    #[case::manual_level(InFlightLoad { auto_level: false, ..slow_load() })]
    #[case::lowest_level(InFlightLoad { level: 0, ..slow_load() })]
    #[case::almost_done(InFlightLoad { loaded: 1_490_000, ..slow_load() })]
    fn abandon_is_skipped(#[case] load: InFlightLoad) {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(400_000.0));
        let levels = ladder();
        let playback = PlaybackState::new(10.0, 11.0, 1.0);
        assert_eq!(
            abr.check_abandon(levels.as_slice(), &load, &playback, 0),
            None
        );
    }

    #[test]
    fn abandon_is_skipped_with_healthy_buffer() {
        let abr = AbrController::with_estimator(AbrOptions::default(), estimating(400_000.0));
        let levels = ladder();
        let playback = PlaybackState::new(10.0, 30.0, 1.0);
        assert_eq!(
            abr.check_abandon(levels.as_slice(), &slow_load(), &playback, 0),
            None
        );
    }

    #[test]
    fn record_abandon_forces_level_and_samples() {
        let mut est = MockEstimator::new();
        est.expect_sample()
            .withf(|ms, bytes| (*ms - 3_000.0).abs() < 1e-9 && *bytes == 150_000)
            .times(1)
            .return_const(());
        let mut abr = AbrController::with_estimator(AbrOptions::default(), est);
        let decision = AbandonDecision {
            next_level: 0,
            frag_loaded_delay: 27.0,
            next_load_delay: 6.25,
            buffer_starvation_delay: 1.0,
        };
        abr.record_abandon(&slow_load(), &decision);
        assert_eq!(abr.forced_auto_level(), Some(0));
    }

    #[rstest]
    #[case(1_000_000, 4.0, 2_000_000)]
    #[case(0, 4.0, 0)]
    #[case(1_000, 0.0, 0)]
    fn measured_bitrate(#[case] bytes: u64, #[case] duration: f64, #[case] expected: u64) {
        assert_eq!(real_bitrate(bytes, duration), expected);
    }
}
