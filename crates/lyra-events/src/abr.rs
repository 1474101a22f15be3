/// Events emitted by the bandwidth estimator and level selection.
#[derive(Clone, Debug, PartialEq)]
pub enum AbrEvent {
    /// A throughput sample was recorded.
    Sample {
        duration_ms: f64,
        bytes: u64,
        bandwidth_bps: f64,
    },
    /// Current bandwidth estimate after a sample.
    Estimate { bandwidth_bps: f64 },
    /// An in-flight load was abandoned in favour of a lower level.
    EmergencyDownSwitch { from_level: usize, to_level: usize },
}
