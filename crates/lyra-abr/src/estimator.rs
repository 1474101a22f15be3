#[cfg(test)]
use mockall::automock;

use crate::ewma::Ewma;

/// Throughput estimation strategy.
///
/// Allows testing `AbrController` with mock estimators.
#[cfg_attr(test, automock)]
pub trait Estimator {
    /// Record one transfer of `bytes` that took `duration_ms`.
    fn sample(&mut self, duration_ms: f64, bytes: u64);

    /// Whether enough samples were recorded for [`Estimator::estimate`] to be meaningful.
    fn can_estimate(&self) -> bool;

    /// Estimated bandwidth in bits per second.
    fn estimate(&self) -> f64;
}

/// Dual-EWMA bandwidth estimator.
///
/// Reports `min(fast, slow)`: a throughput drop shows up within the fast
/// half-life while an increase is only trusted once the slow average follows.
#[derive(Clone, Debug)]
pub struct EwmaBandwidthEstimator {
    fast: Ewma,
    slow: Ewma,
    default_estimate: f64,
}

impl EwmaBandwidthEstimator {
    /// Minimum fast-EWMA weight (seconds of samples) before estimates are trusted.
    pub const MIN_WEIGHT: f64 = 0.001;
    /// Durations below this are clamped; cached responses would otherwise
    /// report absurd throughput.
    pub const MIN_DELAY_MS: f64 = 50.0;

    pub fn new(slow_half_life: f64, fast_half_life: f64, default_estimate: f64) -> Self {
        Self {
            fast: Ewma::new(fast_half_life),
            slow: Ewma::new(slow_half_life),
            default_estimate,
        }
    }

    pub fn sample(&mut self, duration_ms: f64, bytes: u64) {
        let duration_ms = duration_ms.max(Self::MIN_DELAY_MS);
        #[expect(clippy::cast_precision_loss)] // byte counts stay far below 2^52
        let bits = 8.0 * bytes as f64;
        let duration_s = duration_ms / 1000.0;
        let bandwidth_bps = bits / duration_s;

        self.fast.sample(duration_s, bandwidth_bps);
        self.slow.sample(duration_s, bandwidth_bps);

        tracing::trace!(
            duration_ms,
            bytes,
            bandwidth_bps,
            fast = self.fast.estimate(),
            slow = self.slow.estimate(),
            "bandwidth sample"
        );
    }

    pub fn can_estimate(&self) -> bool {
        self.fast.total_weight() >= Self::MIN_WEIGHT
    }

    pub fn estimate(&self) -> f64 {
        if self.can_estimate() {
            self.fast.estimate().min(self.slow.estimate())
        } else {
            self.default_estimate
        }
    }
}

impl Estimator for EwmaBandwidthEstimator {
    fn sample(&mut self, duration_ms: f64, bytes: u64) {
        self.sample(duration_ms, bytes);
    }

    fn can_estimate(&self) -> bool {
        self.can_estimate()
    }

    fn estimate(&self) -> f64 {
        self.estimate()
    }
}
