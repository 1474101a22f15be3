use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use lyra_net::{ByteStream, Headers, Net, NetError, NetExt, RangeSpec};
use rstest::*;
use url::Url;

#[derive(Clone)]
struct SlowNet {
    delay: Duration,
}

#[async_trait]
impl Net for SlowNet {
    async fn get_bytes(&self, _url: Url, _headers: Option<Headers>) -> Result<Bytes, NetError> {
        tokio::time::sleep(self.delay).await;
        Ok(Bytes::from_static(b"ok"))
    }

    async fn stream(&self, _url: Url, _headers: Option<Headers>) -> Result<ByteStream, NetError> {
        tokio::time::sleep(self.delay).await;
        Ok(Box::pin(stream::empty()))
    }

    async fn get_range(
        &self,
        url: Url,
        _range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        self.stream(url, headers).await
    }
}

fn url() -> Url {
    Url::parse("http://cdn.test/index.m3u8").unwrap()
}

#[rstest]
#[case::fast(Duration::from_millis(5), true)]
#[case::slow(Duration::from_millis(500), false)]
#[tokio::test]
async fn get_bytes_is_bounded(#[case] delay: Duration, #[case] ok: bool) {
    let net = SlowNet { delay }.with_timeout(Duration::from_millis(100));
    let res = net.get_bytes(url(), None).await;
    assert_eq!(res.is_ok(), ok);
    if let Err(err) = res {
        assert!(err.is_timeout());
    }
}

#[rstest]
#[tokio::test]
async fn stream_head_is_bounded() {
    let net = SlowNet {
        delay: Duration::from_millis(500),
    }
    .with_timeout(Duration::from_millis(50));
    let res = net.stream(url(), None).await;
    assert!(matches!(res, Err(NetError::Timeout)));
}

#[rstest]
#[tokio::test]
async fn timeout_then_retry_compose() {
    let net = SlowNet {
        delay: Duration::from_millis(300),
    }
    .with_timeout(Duration::from_millis(20))
    .with_retry(lyra_net::RetryPolicy::new(
        1,
        Duration::from_millis(1),
        Duration::from_millis(1),
    ));
    let err = net.get_bytes(url(), None).await.unwrap_err();
    assert!(err.is_timeout());
}
