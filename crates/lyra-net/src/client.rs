use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response};
use tracing::trace;
use url::Url;

use crate::{
    ByteStream,
    error::{NetError, NetResult},
    traits::Net,
    types::{Headers, NetOptions, RangeSpec},
};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: NetOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError::Http`] if the TLS backend cannot be initialised.
    pub fn new(options: NetOptions) -> NetResult<Self> {
        let inner = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| NetError::http(e.to_string()))?;
        Ok(Self { inner, options })
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    fn request(&self, url: Url, headers: Option<Headers>) -> RequestBuilder {
        let mut req = self.inner.get(url);
        if let Some(headers) = headers {
            for (k, v) in headers.iter() {
                req = req.header(k, v);
            }
        }
        req
    }

    async fn send(req: RequestBuilder, url: &Url) -> NetResult<Response> {
        let resp = req.send().await?;
        let status = resp.status();
        trace!(%url, status = status.as_u16(), "response");
        if status.is_success() {
            Ok(resp)
        } else {
            Err(NetError::http_status(status.as_u16(), url.as_str()))
        }
    }
}

#[async_trait]
impl Net for HttpClient {
    async fn get_bytes(&self, url: Url, headers: Option<Headers>) -> Result<Bytes, NetError> {
        let req = self
            .request(url.clone(), headers)
            .timeout(self.options.request_timeout);
        let resp = Self::send(req, &url).await?;
        resp.bytes().await.map_err(NetError::from)
    }

    async fn stream(&self, url: Url, headers: Option<Headers>) -> Result<ByteStream, NetError> {
        // Body streaming is bounded by the caller's own timers.
        let req = self.request(url.clone(), headers);
        let resp = Self::send(req, &url).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }

    async fn get_range(
        &self,
        url: Url,
        range: RangeSpec,
        headers: Option<Headers>,
    ) -> Result<ByteStream, NetError> {
        let header = range.to_header_value()?;
        let req = self.request(url.clone(), headers).header("Range", header);
        let resp = Self::send(req, &url).await?;
        Ok(Box::pin(resp.bytes_stream().map_err(NetError::from)))
    }
}
