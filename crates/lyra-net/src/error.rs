use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("timeout")]
    Timeout,
    #[error("request failed after {max_retries} retries: {source}")]
    RetryExhausted {
        max_retries: u32,
        source: Box<NetError>,
    },
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
}

impl NetError {
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Transient failures worth another attempt: timeouts, connection
    /// trouble, 5xx, 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            NetError::Timeout => true,
            NetError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            NetError::RetryExhausted { .. } | NetError::InvalidRange(_) => false,
        }
    }

    /// True for timeouts, including a timeout that exhausted the retry budget.
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::Timeout => true,
            NetError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            NetError::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = error.status() {
            let url = error.url().map(ToString::to_string).unwrap_or_default();
            return Self::http_status(status.as_u16(), url);
        }
        Self::Http(error.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;
