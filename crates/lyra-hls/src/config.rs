#![forbid(unsafe_code)]

use std::time::Duration;

pub use lyra_abr::AbrOptions;
use lyra_net::RetryPolicy;

/// Timeout and retry budget of one request family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Time allowed for the whole request, body included.
    pub timeout: Duration,
    pub max_retry: u32,
    /// First retry delay, doubled on every further attempt.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl LoadPolicy {
    pub const fn new(
        timeout: Duration,
        max_retry: u32,
        retry_delay: Duration,
        max_retry_delay: Duration,
    ) -> Self {
        Self {
            timeout,
            max_retry,
            retry_delay,
            max_retry_delay,
        }
    }

    /// Same policy without transport-level retries.
    pub fn without_retry(mut self) -> Self {
        self.max_retry = 0;
        self
    }

    /// Equivalent transport retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, self.retry_delay, self.max_retry_delay)
    }

    /// Delay before retry number `retry` (zero based): `min(2^retry × delay, max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.retry_policy().delay_for_attempt(retry.saturating_add(1))
    }
}

/// How the first level is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StartLevel {
    /// The first variant listed in the manifest.
    #[default]
    First,
    /// Lowest level, measured with a bitrate test load.
    Auto,
    /// Fixed index, clamped to the ladder.
    Index(usize),
}

/// Player configuration. Captured once at construction.
#[derive(Clone, Debug)]
pub struct HlsConfig {
    pub abr: AbrOptions,
    /// Start loading as soon as the manifest is parsed.
    pub auto_start_load: bool,
    /// Position to start at, `None` for the playlist default.
    pub start_position: Option<f64>,
    pub start_level: StartLevel,
    /// Forward buffer target in seconds.
    pub max_buffer_length: f64,
    /// Hard cap of the forward buffer in seconds.
    pub max_max_buffer_length: f64,
    /// Forward buffer target in bytes.
    pub max_buffer_size: u64,
    /// Gaps shorter than this count as contiguous buffer.
    pub max_buffer_hole: f64,
    pub max_frag_lookup_tolerance: f64,
    /// Live start distance from the edge, in target durations.
    pub live_sync_duration_count: u32,
    pub manifest: LoadPolicy,
    pub level: LoadPolicy,
    pub fragment: LoadPolicy,
    pub key: LoadPolicy,
    pub start_fragment_prefetch: bool,
    pub append_error_max_retry: u32,
    pub cap_level_to_player_size: bool,
    pub cap_level_on_fps_drop: bool,
    pub fps_dropped_monitoring_period: Duration,
    pub fps_dropped_monitoring_threshold: f64,
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// Capacity of the public event channel.
    pub events_channel_capacity: usize,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            abr: AbrOptions::default(),
            auto_start_load: true,
            start_position: None,
            start_level: StartLevel::First,
            max_buffer_length: 30.0,
            max_max_buffer_length: 600.0,
            max_buffer_size: 60 * 1000 * 1000,
            max_buffer_hole: 0.5,
            max_frag_lookup_tolerance: 0.25,
            live_sync_duration_count: 3,
            manifest: LoadPolicy::new(
                Duration::from_secs(10),
                1,
                Duration::from_secs(1),
                Duration::from_secs(64),
            ),
            level: LoadPolicy::new(
                Duration::from_secs(10),
                4,
                Duration::from_secs(1),
                Duration::from_secs(64),
            ),
            fragment: LoadPolicy::new(
                Duration::from_secs(20),
                6,
                Duration::from_secs(1),
                Duration::from_secs(64),
            ),
            key: LoadPolicy::new(
                Duration::from_secs(10),
                1,
                Duration::from_secs(1),
                Duration::from_secs(64),
            ),
            start_fragment_prefetch: false,
            append_error_max_retry: 3,
            cap_level_to_player_size: false,
            cap_level_on_fps_drop: false,
            fps_dropped_monitoring_period: Duration::from_secs(5),
            fps_dropped_monitoring_threshold: 0.2,
            tick_interval: Duration::from_millis(100),
            events_channel_capacity: 64,
        }
    }
}

impl HlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    pub fn with_auto_start_load(mut self, enabled: bool) -> Self {
        self.auto_start_load = enabled;
        self
    }

    pub fn with_start_position(mut self, position: f64) -> Self {
        self.start_position = Some(position);
        self
    }

    pub fn with_start_level(mut self, level: StartLevel) -> Self {
        self.start_level = level;
        self
    }

    pub fn with_max_buffer_length(mut self, secs: f64) -> Self {
        self.max_buffer_length = secs;
        self
    }

    pub fn with_max_max_buffer_length(mut self, secs: f64) -> Self {
        self.max_max_buffer_length = secs;
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: u64) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_max_buffer_hole(mut self, secs: f64) -> Self {
        self.max_buffer_hole = secs;
        self
    }

    pub fn with_live_sync_duration_count(mut self, count: u32) -> Self {
        self.live_sync_duration_count = count;
        self
    }

    pub fn with_manifest_policy(mut self, policy: LoadPolicy) -> Self {
        self.manifest = policy;
        self
    }

    pub fn with_level_policy(mut self, policy: LoadPolicy) -> Self {
        self.level = policy;
        self
    }

    pub fn with_fragment_policy(mut self, policy: LoadPolicy) -> Self {
        self.fragment = policy;
        self
    }

    pub fn with_key_policy(mut self, policy: LoadPolicy) -> Self {
        self.key = policy;
        self
    }

    pub fn with_start_fragment_prefetch(mut self, enabled: bool) -> Self {
        self.start_fragment_prefetch = enabled;
        self
    }

    pub fn with_append_error_max_retry(mut self, retries: u32) -> Self {
        self.append_error_max_retry = retries;
        self
    }

    pub fn with_cap_level_to_player_size(mut self, enabled: bool) -> Self {
        self.cap_level_to_player_size = enabled;
        self
    }

    pub fn with_cap_level_on_fps_drop(mut self, enabled: bool) -> Self {
        self.cap_level_on_fps_drop = enabled;
        self
    }

    pub fn with_fps_dropped_monitoring(mut self, period: Duration, threshold: f64) -> Self {
        self.fps_dropped_monitoring_period = period;
        self.fps_dropped_monitoring_threshold = threshold;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_events_channel_capacity(mut self, capacity: usize) -> Self {
        self.events_channel_capacity = capacity;
        self
    }
}
