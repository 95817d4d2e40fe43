//! Transport abstractions for talking to the dedup service.
//!
//! A `Transport` performs single request/response calls and opens
//! server-push streams. `HttpTransport` is the reqwest-backed implementation.

use serde_json::Value;
use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;

pub mod cancel;
pub mod http;
pub mod sse;
pub mod stream;

pub use cancel::CancelToken;
pub use http::{HttpConfig, HttpTransport};
pub use stream::{StreamEnd, StreamHandle};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{status} {status_text}")]
    Http { status: u16, status_text: String },
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid payload: {0}")]
    Decode(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn http(status: u16) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown Status")
            .to_string();
        TransportError::Http {
            status,
            status_text,
        }
    }

    /// Numeric status for `Http` failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return TransportError::http(status.as_u16());
        }
        if e.is_decode() {
            return TransportError::Decode(e.to_string());
        }
        TransportError::RequestFailed(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Side-effect free fetch (GET).
    Read,
    /// Submission that may change server state (POST).
    Submit,
}

/// Relative endpoint path, kept as individual segments so each one is
/// encoded on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    segments: Vec<String>,
}

impl Endpoint {
    pub fn new(name: &str) -> Self {
        Self {
            segments: name
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Appends a single segment verbatim; slashes inside it stay part of
    /// the segment.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Ordered query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// Bounds applied by the transport to a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Called for every message pushed on a stream. `Break` closes the stream.
pub type MessageHandler =
    Box<dyn FnMut(Value) -> Result<ControlFlow<()>, TransportError> + Send + 'static>;

/// Called exactly once when a stream stops, whatever the reason.
pub type CloseHandler = Box<dyn FnOnce(StreamEnd) + Send + 'static>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Performs one call. A non-success status fails with `TransportError::Http`;
    /// an empty success body yields `Value::Null`.
    async fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<Value, TransportError>;

    /// Performs one call whose response body carries nothing. Only the
    /// status is checked; whatever body came back is discarded.
    async fn request_unit(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<(), TransportError> {
        self.request(endpoint, method, params, options).await.map(drop)
    }

    /// Opens a push stream and returns without waiting for the connection.
    /// Must be called from within a tokio runtime.
    fn open_stream(
        &self,
        endpoint: &Endpoint,
        params: &Params,
        options: &CallOptions,
        on_message: MessageHandler,
        on_close: CloseHandler,
    ) -> StreamHandle;
}

/// Runs `fut` under the timeout and cancellation in `options`.
pub async fn bounded<F, T>(options: &CallOptions, fut: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    let timed = async {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => fut.await,
        }
    };
    match &options.cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Cancelled),
                res = timed => res,
            }
        }
        None => timed.await,
    }
}
