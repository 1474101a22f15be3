use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use lyra_net::{ByteStream, Headers, Net, NetError, NetExt, RangeSpec, RetryPolicy};
use rstest::*;
use url::Url;

/// Fails with the scripted errors, then succeeds.
#[derive(Clone)]
struct FlakyNet {
    calls: Arc<AtomicU32>,
    failures: Vec<NetError>,
}

impl FlakyNet {
    fn new(failures: Vec<NetError>) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
        }
    }

    fn next(&self) -> Result<(), NetError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.failures.get(n) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Net for FlakyNet {
    async fn get_bytes(&self, _url: Url, _headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.next().map(|()| Bytes::from_static(b"payload"))
    }

    async fn stream(&self, _url: Url, _headers: Option<Headers>) -> Result<ByteStream, NetError> {
        self.next()?;
        Ok(Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"ab"))])))
    }

    async fn get_range(
        &self,
        _url: Url,
        range: RangeSpec,
        _headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.next()?;
        let len = range.end.unwrap_or(range.start) - range.start + 1;
        let body = Bytes::from(vec![0u8; len as usize]);
        Ok(Box::pin(stream::iter(vec![Ok(body)])))
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
}

fn url() -> Url {
    Url::parse("http://cdn.test/seg.ts").unwrap()
}

#[rstest]
#[tokio::test]
async fn recovers_after_transient_failures() {
    let inner = FlakyNet::new(vec![NetError::Timeout, NetError::http_status(503, "x")]);
    let calls = inner.calls.clone();
    let net = inner.with_retry(fast_policy(3));

    let body = net.get_bytes(url(), None).await.unwrap();
    assert_eq!(&body[..], b"payload");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn gives_up_after_budget() {
    let inner = FlakyNet::new(vec![NetError::Timeout; 5]);
    let calls = inner.calls.clone();
    let net = inner.with_retry(fast_policy(2));

    let err = net.get_bytes(url(), None).await.unwrap_err();
    assert!(matches!(err, NetError::RetryExhausted { max_retries: 2, .. }));
    assert!(err.is_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[rstest]
#[tokio::test]
async fn client_errors_are_not_retried() {
    let inner = FlakyNet::new(vec![NetError::http_status(404, "x")]);
    let calls = inner.calls.clone();
    let net = inner.with_retry(fast_policy(3));

    let err = net.stream(url(), None).await.err().unwrap();
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn range_requests_are_retried() {
    let inner = FlakyNet::new(vec![NetError::http("connection reset")]);
    let net = inner.with_retry(fast_policy(1));

    let mut body = net
        .get_range(url(), RangeSpec::from_half_open(100, 150), None)
        .await
        .unwrap();
    let chunk = body.next().await.unwrap().unwrap();
    assert_eq!(chunk.len(), 50);
}

#[rstest]
#[tokio::test]
async fn zero_budget_passes_errors_through() {
    let inner = FlakyNet::new(vec![NetError::Timeout]);
    let net = inner.with_retry(RetryPolicy::none());

    let err = net.get_bytes(url(), None).await.unwrap_err();
    assert_eq!(err, NetError::Timeout);
}
