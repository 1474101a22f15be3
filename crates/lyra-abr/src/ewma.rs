/// Exponentially weighted moving average with bias correction.
///
/// Samples carry a weight (usually the sample duration in seconds), so a long
/// download moves the average further than a short one.
#[derive(Clone, Debug)]
pub struct Ewma {
    alpha: f64,
    estimate: f64,
    total_weight: f64,
}

impl Ewma {
    /// `half_life` is expressed in the same unit as sample weights.
    /// A zero half-life disables smoothing: the last sample wins.
    pub fn new(half_life: f64) -> Self {
        let alpha = if half_life > 0.0 {
            (0.5_f64.ln() / half_life).exp()
        } else {
            0.0
        };
        Self {
            alpha,
            estimate: 0.0,
            total_weight: 0.0,
        }
    }

    pub fn sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight);
        self.estimate = value * (1.0 - adj_alpha) + adj_alpha * self.estimate;
        self.total_weight += weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Bias-corrected estimate: early samples are not dragged toward zero.
    pub fn estimate(&self) -> f64 {
        if self.alpha == 0.0 {
            return self.estimate;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        if zero_factor <= 0.0 {
            return self.estimate;
        }
        self.estimate / zero_factor
    }
}
