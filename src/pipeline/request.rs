//! Request configuration and the request / response values that flow
//! through the pipeline.

use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;

use super::error::RequestError;
use super::progress::{Progress, ProgressFn};
use crate::scheduler::Priority;

/// Chunk size used when streaming a request body to the transport.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Per-call request settings.
///
/// Interceptors receive the config by value and hand back a possibly
/// modified copy.
#[derive(Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub priority: Priority,
    /// Deadline for one transport round trip, including the body download.
    pub timeout: Option<Duration>,
    pub retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_delay: Duration,
    pub use_cache: bool,
    /// Defaults to the URL.
    pub cache_key: Option<String>,
    pub cache_ttl: Option<Duration>,
    pub batch: bool,
    /// Defaults to the URL.
    pub batch_key: Option<String>,
    pub batch_delay: Duration,
    /// Generated when absent.
    pub request_id: Option<String>,
    pub on_upload_progress: Option<ProgressFn>,
    pub on_download_progress: Option<ProgressFn>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            priority: Priority::Normal,
            timeout: None,
            retries: 0,
            retry_delay: crate::deadline::DEFAULT_RETRY_DELAY,
            use_cache: false,
            cache_key: None,
            cache_ttl: None,
            batch: false,
            batch_key: None,
            batch_delay: Duration::from_millis(50),
            request_id: None,
            on_upload_progress: None,
            on_download_progress: None,
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("use_cache", &self.use_cache)
            .field("cache_key", &self.cache_key)
            .field("batch", &self.batch)
            .field("batch_key", &self.batch_key)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it `application/json`.
    pub fn json<B: Serialize + ?Sized>(mut self, value: &B) -> Result<Self, RequestError> {
        let body = serde_json::to_vec(value).map_err(|e| RequestError::Parse(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Serve from and store into the response cache.
    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.use_cache = true;
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Defer the request until `delay` after the first member of its
    /// batch arrived.
    pub fn batched(mut self, delay: Duration) -> Self {
        self.batch = true;
        self.batch_delay = delay;
        self
    }

    pub fn batch_key(mut self, key: impl Into<String>) -> Self {
        self.batch_key = Some(key.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn on_upload_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_upload_progress = Some(std::sync::Arc::new(f));
        self
    }

    pub fn on_download_progress(mut self, f: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_download_progress = Some(std::sync::Arc::new(f));
        self
    }
}

/// What the transport is asked to send.
#[derive(Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    on_upload: Option<ProgressFn>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            on_upload: None,
        }
    }

    pub(crate) fn from_config(url: &str, config: &RequestConfig) -> Self {
        Self {
            method: config.method.clone(),
            url: url.to_string(),
            headers: config.headers.clone(),
            body: config.body.clone(),
            on_upload: config.on_upload_progress.clone(),
        }
    }

    /// Body split into `chunk_size` pieces, reporting upload progress as
    /// each piece is pulled.
    pub fn body_stream(
        &self,
        chunk_size: usize,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let body = self.body.clone().unwrap_or_default();
        let total = body.len() as u64;
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Bytes> = (0..body.len())
            .step_by(chunk_size)
            .map(|start| body.slice(start..(start + chunk_size).min(body.len())))
            .collect();

        let on_upload = self.on_upload.clone();
        let mut loaded = 0u64;
        stream::iter(chunks).map(move |chunk| {
            loaded += chunk.len() as u64;
            if let Some(f) = &on_upload {
                f(Progress {
                    loaded,
                    total: Some(total),
                });
            }
            Ok(chunk)
        })
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

pub type BodyStream = BoxStream<'static, Result<Bytes, RequestError>>;

/// Response head plus a body that has not been read yet.
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl RawResponse {
    /// Response with the whole body available up front.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// A `200 OK` JSON response.
    pub fn json(value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::from_bytes(StatusCode::OK, headers, value.to_string())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    /// Collect the body, reporting download progress per chunk.
    pub async fn read(self, on_progress: Option<&ProgressFn>) -> Result<Response, RequestError> {
        let total = self.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);
        let mut stream = self.body;
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
            if let Some(f) = on_progress {
                f(Progress {
                    loaded: body.len() as u64,
                    total,
                });
            }
        }
        Ok(Response {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(body),
        })
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Fully read response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A `200 OK` JSON response.
    pub fn json(value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(StatusCode::OK, headers, value.to_string())
    }

    /// Media type without parameters, empty when absent.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or("", |v| v.split(';').next().unwrap_or("").trim())
    }

    /// Parse the body; only `application/json` is understood.
    pub fn parse_json(&self) -> Result<serde_json::Value, RequestError> {
        let content_type = self.content_type();
        if content_type.eq_ignore_ascii_case("application/json") {
            serde_json::from_slice(&self.body).map_err(|e| RequestError::Parse(e.to_string()))
        } else {
            Err(RequestError::UnsupportedContentType(content_type.to_string()))
        }
    }
}
