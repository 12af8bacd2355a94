//! Outbound transport behind the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::RequestError;
use super::request::{RawResponse, Request, UPLOAD_CHUNK_SIZE};

/// Sends one request and returns the response head with an unread body.
///
/// Implementations should stop early when `cancel` fires; the pipeline
/// drops the returned future on cancellation either way.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request, cancel: CancellationToken) -> Result<RawResponse, RequestError>;
}

/// `reqwest`-backed HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, RequestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request, cancel: CancellationToken) -> Result<RawResponse, RequestError> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if request.body.is_some() {
            builder = builder.body(reqwest::Body::wrap_stream(request.body_stream(UPLOAD_CHUNK_SIZE)));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RequestError::Cancelled),
            response = builder.send() => response?,
        };

        Ok(RawResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.bytes_stream().map_err(RequestError::from).boxed(),
        })
    }
}
