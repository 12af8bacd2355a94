//! Request, response and error hooks around pipeline attempts.

use async_trait::async_trait;

use super::error::RequestError;
use super::request::{RequestConfig, Response};

/// Hooks around every request. All methods default to pass-through.
///
/// Interceptors run in registration order. Returning an error from
/// `on_request` or `on_response` fails the attempt, which then goes
/// through the error hooks and the retry budget like any other failure.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig, RequestError> {
        Ok(config)
    }

    async fn on_response(&self, response: Response) -> Result<Response, RequestError> {
        Ok(response)
    }

    /// Return a response to recover from `error`. The first interceptor
    /// that does wins; the recovered response skips `on_response`.
    async fn on_error(&self, _error: &RequestError, _config: &RequestConfig) -> Option<Response> {
        None
    }
}
