use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::sleep;
use tracing::debug;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{
    ByteStream,
    error::NetError,
    traits::Net,
    types::{Headers, RangeSpec, RetryPolicy},
};

#[cfg_attr(test, unimock(api = RetryClassifierMock))]
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, error: &NetError) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRetryClassifier;

impl RetryClassifier for DefaultRetryClassifier {
    fn should_retry(&self, error: &NetError) -> bool {
        error.is_retryable()
    }
}

pub trait RetryPolicyTrait: Send + Sync {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool;
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
    fn max_attempts(&self) -> u32;
}

pub struct DefaultRetryPolicy<C = DefaultRetryClassifier> {
    classifier: C,
    policy: RetryPolicy,
}

impl DefaultRetryPolicy {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_classifier(policy, DefaultRetryClassifier)
    }
}

impl<C: RetryClassifier> DefaultRetryPolicy<C> {
    pub fn with_classifier(policy: RetryPolicy, classifier: C) -> Self {
        Self { classifier, policy }
    }
}

impl<C: RetryClassifier> RetryPolicyTrait for DefaultRetryPolicy<C> {
    fn should_retry(&self, error: &NetError, attempt: u32) -> bool {
        attempt < self.policy.max_retries && self.classifier.should_retry(error)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.policy.delay_for_attempt(attempt)
    }

    fn max_attempts(&self) -> u32 {
        self.policy.max_retries
    }
}

/// Re-issues failed requests of the wrapped [`Net`] with exponential backoff.
pub struct RetryNet<N, P> {
    inner: N,
    retry_policy: P,
}

impl<N: Net, P: RetryPolicyTrait> RetryNet<N, P> {
    pub fn new(inner: N, retry_policy: P) -> Self {
        Self {
            inner,
            retry_policy,
        }
    }

    async fn run<T, F, Fut>(&self, url: &Url, mut op: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, NetError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(out) => return Ok(out),
                Err(error) => {
                    if !self.retry_policy.should_retry(&error, attempt) {
                        if attempt > 0 && error.is_retryable() {
                            return Err(NetError::RetryExhausted {
                                max_retries: attempt,
                                source: Box::new(error),
                            });
                        }
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    debug!(%url, attempt, ?delay, %error, "retrying request");
                    sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl<N: Net, P: RetryPolicyTrait> Net for RetryNet<N, P> {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.run(&url, || self.inner.get_bytes(url.clone(), headers.clone()))
            .await
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        self.run(&url, || self.inner.stream(url.clone(), headers.clone()))
            .await
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.run(&url, || {
            self.inner
                .get_range(url.clone(), range.clone(), headers.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use unimock::{MockFn, Unimock, matching};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(100), Duration::from_secs(10))
    }

    #[rstest]
    #[case(0, true)]
    #[case(2, true)]
    #[case(3, false)]
    #[case(4, false)]
    fn default_policy_respects_max_retries(#[case] attempt: u32, #[case] expected: bool) {
        let p = DefaultRetryPolicy::new(policy(3));
        assert_eq!(p.should_retry(&NetError::Timeout, attempt), expected);
    }

    #[rstest]
    fn default_policy_skips_client_errors() {
        let p = DefaultRetryPolicy::new(policy(3));
        assert!(!p.should_retry(&NetError::http_status(404, "http://a"), 0));
    }

    #[rstest]
    #[case(0, Duration::ZERO)]
    #[case(1, Duration::from_millis(100))]
    #[case(3, Duration::from_millis(400))]
    fn default_policy_backoff(#[case] attempt: u32, #[case] expected: Duration) {
        let p = DefaultRetryPolicy::new(policy(5));
        assert_eq!(p.delay_for_attempt(attempt), expected);
    }

    #[rstest]
    fn classifier_decides_retry() {
        let classifier = Unimock::new(
            RetryClassifierMock::should_retry
                .some_call(matching!(_))
                .returns(false),
        );
        let p = DefaultRetryPolicy::with_classifier(policy(3), classifier);
        assert!(!p.should_retry(&NetError::Timeout, 0));
    }
}
