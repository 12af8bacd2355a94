//! Request pipeline.
//!
//! Composes the response cache, an interceptor chain, deferred batching
//! and a bounded priority queue in front of a pluggable [`Transport`].

mod batch;
mod client;
mod error;
mod interceptor;
mod progress;
mod request;
mod transport;

pub use client::{PipelineConfig, RequestPipeline, DEFAULT_MAX_CONCURRENT_REQUESTS};
pub use error::RequestError;
pub use interceptor::Interceptor;
pub use progress::{Progress, ProgressFn};
pub use request::{BodyStream, RawResponse, Request, RequestConfig, Response, UPLOAD_CHUNK_SIZE};
pub use transport::{HttpTransport, Transport};
