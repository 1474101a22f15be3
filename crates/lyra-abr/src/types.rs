/// ABR (Adaptive Bitrate) configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct AbrOptions {
    /// Factor applied to the estimate when staying on or below the current level.
    pub bandwidth_factor: f64,
    /// Stricter factor applied when considering a higher level.
    pub bandwidth_up_factor: f64,
    /// Estimate (bps) reported until enough samples were recorded.
    pub default_estimate: f64,
    /// Fast EWMA half-life (seconds) for live playlists.
    pub ewma_fast_live: f64,
    /// Slow EWMA half-life (seconds) for live playlists.
    pub ewma_slow_live: f64,
    /// Fast EWMA half-life (seconds) for VOD playlists.
    pub ewma_fast_vod: f64,
    /// Slow EWMA half-life (seconds) for VOD playlists.
    pub ewma_slow_vod: f64,
    /// Extra rebuffering (seconds) tolerated when no level fits the buffer.
    pub max_starvation_delay: f64,
    /// Loading budget (seconds) for the first fragment after a bitrate test.
    pub max_loading_delay: f64,
    /// Use the measured bitrate of a level when it exceeds the advertised one.
    pub max_with_real_bitrate: bool,
    /// Levels at or below this bitrate are never chosen automatically.
    pub min_auto_bitrate: u64,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            bandwidth_factor: 0.95,
            bandwidth_up_factor: 0.7,
            default_estimate: 500_000.0,
            ewma_fast_live: 3.0,
            ewma_slow_live: 9.0,
            ewma_fast_vod: 3.0,
            ewma_slow_vod: 9.0,
            max_starvation_delay: 4.0,
            max_loading_delay: 4.0,
            max_with_real_bitrate: false,
            min_auto_bitrate: 0,
        }
    }
}

impl AbrOptions {
    pub fn with_bandwidth_factor(mut self, factor: f64) -> Self {
        self.bandwidth_factor = factor;
        self
    }

    pub fn with_bandwidth_up_factor(mut self, factor: f64) -> Self {
        self.bandwidth_up_factor = factor;
        self
    }

    pub fn with_default_estimate(mut self, bps: f64) -> Self {
        self.default_estimate = bps;
        self
    }

    pub fn with_max_with_real_bitrate(mut self, enabled: bool) -> Self {
        self.max_with_real_bitrate = enabled;
        self
    }

    pub fn with_min_auto_bitrate(mut self, bps: u64) -> Self {
        self.min_auto_bitrate = bps;
        self
    }

    /// `(slow, fast)` half-lives for the given playlist kind.
    pub fn half_lives(&self, live: bool) -> (f64, f64) {
        if live {
            (self.ewma_slow_live, self.ewma_fast_live)
        } else {
            (self.ewma_slow_vod, self.ewma_fast_vod)
        }
    }
}

/// Quality ladder as seen by the ABR engine.
///
/// Keeps the engine independent from playlist types. Levels are expected in
/// ascending bitrate order.
pub trait LevelSource {
    fn level_count(&self) -> usize;

    /// Advertised bitrate in bits per second, `None` when out of range.
    fn bitrate(&self, index: usize) -> Option<u64>;

    /// Bitrate measured from downloaded fragments, if known.
    fn real_bitrate(&self, _index: usize) -> Option<u64> {
        None
    }

    /// Average fragment duration of the loaded playlist, if loaded.
    fn average_fragment_duration(&self, _index: usize) -> Option<f64> {
        None
    }

    fn is_live(&self, _index: usize) -> bool {
        false
    }

    /// Bitrate used for decisions: the measured one wins when higher.
    fn effective_bitrate(&self, index: usize) -> Option<u64> {
        let bitrate = self.bitrate(index)?;
        Some(match self.real_bitrate(index) {
            Some(real) if real > 0 => real.max(bitrate),
            _ => bitrate,
        })
    }
}

/// Plain level description, handy for tests and simple ladders.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelInfo {
    pub bitrate: u64,
    pub real_bitrate: Option<u64>,
    pub average_fragment_duration: Option<f64>,
    pub live: bool,
}

impl LevelInfo {
    pub fn new(bitrate: u64) -> Self {
        Self {
            bitrate,
            real_bitrate: None,
            average_fragment_duration: None,
            live: false,
        }
    }

    pub fn with_fragment_duration(mut self, secs: f64) -> Self {
        self.average_fragment_duration = Some(secs);
        self
    }

    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn with_real_bitrate(mut self, bps: u64) -> Self {
        self.real_bitrate = Some(bps);
        self
    }
}

impl LevelSource for [LevelInfo] {
    fn level_count(&self) -> usize {
        self.len()
    }

    fn bitrate(&self, index: usize) -> Option<u64> {
        self.get(index).map(|l| l.bitrate)
    }

    fn real_bitrate(&self, index: usize) -> Option<u64> {
        self.get(index).and_then(|l| l.real_bitrate)
    }

    fn average_fragment_duration(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(|l| l.average_fragment_duration)
    }

    fn is_live(&self, index: usize) -> bool {
        self.get(index).is_some_and(|l| l.live)
    }
}

/// Playback position and buffer health.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackState {
    /// Current playback position (seconds).
    pub position: f64,
    /// End of the contiguous buffered range around `position`.
    pub buffer_end: f64,
    /// Signed playback rate, 0 when paused by rate.
    pub playback_rate: f64,
}

impl PlaybackState {
    pub fn new(position: f64, buffer_end: f64, playback_rate: f64) -> Self {
        Self {
            position,
            buffer_end,
            playback_rate,
        }
    }

    /// Absolute rate, with a stopped rate treated as normal speed.
    pub fn effective_rate(&self) -> f64 {
        if self.playback_rate == 0.0 {
            1.0
        } else {
            self.playback_rate.abs()
        }
    }

    /// Seconds of playback left before the buffer runs dry.
    pub fn starvation_delay(&self) -> f64 {
        ((self.buffer_end - self.position) / self.effective_rate()).max(0.0)
    }
}

/// Inputs for the next automatic level decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbrContext {
    pub min_auto_level: usize,
    pub max_auto_level: usize,
    pub playback: PlaybackState,
    /// Duration of the fragment currently loading, if any.
    pub current_frag_duration: Option<f64>,
}

/// Snapshot of an in-flight fragment load.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InFlightLoad {
    pub level: usize,
    /// Nominal fragment duration (seconds).
    pub duration: f64,
    /// Milliseconds since the request was issued.
    pub request_delay_ms: f64,
    pub loaded: u64,
    pub total: Option<u64>,
    /// Transport-reported bandwidth (bits per second), if any.
    pub bandwidth_bps: Option<f64>,
    /// Whether the fragment level was picked by ABR.
    pub auto_level: bool,
}
