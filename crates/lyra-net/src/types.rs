use std::{cmp::min, collections::HashMap, time::Duration};

use crate::error::{NetError, NetResult};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

/// Inclusive byte range, as sent in an HTTP `Range` header.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Range covering `[start, end)`, the half-open form playlists use.
    pub fn from_half_open(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end.saturating_sub(1)),
        }
    }

    /// # Errors
    ///
    /// [`NetError::InvalidRange`] when `end` precedes `start`.
    pub fn to_header_value(&self) -> NetResult<String> {
        match self.end {
            Some(end) if end < self.start => Err(NetError::InvalidRange(format!(
                "{}-{}",
                self.start, end
            ))),
            Some(end) => Ok(format!("bytes={}-{}", self.start, end)),
            None => Ok(format!("bytes={}-", self.start)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// No retries at all; callers that run their own retry loop use this.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `0` for the first attempt, then `base * 2^(attempt-1)` capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        min(self.base_delay.saturating_mul(factor), self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Max idle connections per host; playlists and fragments usually share one origin.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            pool_max_idle_per_host: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::open(RangeSpec::from_start(10), "bytes=10-")]
    #[case::closed(RangeSpec::new(0, Some(99)), "bytes=0-99")]
    #[case::half_open(RangeSpec::from_half_open(100, 200), "bytes=100-199")]
    fn range_header(#[case] range: RangeSpec, #[case] expected: &str) {
        assert_eq!(range.to_header_value().unwrap(), expected);
    }

    #[rstest]
    fn inverted_range_is_rejected() {
        let err = RangeSpec::new(10, Some(5)).to_header_value().unwrap_err();
        assert!(matches!(err, NetError::InvalidRange(_)));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(10, 1000)]
    fn backoff_is_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(1000),
        );
        assert_eq!(
            policy.delay_for_attempt(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[rstest]
    fn headers_roundtrip() {
        let mut h = Headers::new();
        assert!(h.is_empty());
        h.insert("Accept", "*/*");
        assert_eq!(h.get("Accept"), Some("*/*"));
        assert_eq!(h.iter().count(), 1);
    }
}
