//! Tests for the request pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::pipeline::{Progress, RawResponse};

type Responder =
    Box<dyn Fn(&Request, usize) -> BoxFuture<'static, Result<RawResponse, RequestError>> + Send + Sync>;

struct FakeTransport {
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    respond: Responder,
}

impl FakeTransport {
    fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&Request, usize) -> BoxFuture<'static, Result<RawResponse, RequestError>> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    fn json(value: serde_json::Value) -> Arc<Self> {
        Self::new(move |_, _| {
            let value = value.clone();
            Box::pin(async move { Ok(RawResponse::json(&value)) })
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: Request, _cancel: CancellationToken) -> Result<RawResponse, RequestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push(request.clone());
        (self.respond)(&request, call).await
    }
}

fn status_response(status: StatusCode) -> RawResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    RawResponse::from_bytes(status, headers, "{}")
}

fn pipeline(transport: Arc<FakeTransport>, max_concurrent_requests: usize) -> Arc<RequestPipeline> {
    Arc::new(RequestPipeline::new(
        transport,
        PipelineConfig {
            max_concurrent_requests,
            ..Default::default()
        },
    ))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Quote {
    rate: f64,
    term: u32,
}

#[tokio::test]
async fn json_body_decodes_into_the_requested_type() {
    let transport = FakeTransport::json(json!({"rate": 4.5, "term": 30}));
    let pipeline = pipeline(transport, 6);

    let quote: Quote = pipeline.request("/quote", RequestConfig::new()).await.unwrap();
    assert_eq!(quote, Quote { rate: 4.5, term: 30 });
    assert!(pipeline.active_requests().is_empty());
}

#[tokio::test]
async fn cached_requests_skip_the_transport() {
    let transport = FakeTransport::json(json!({"rate": 4.5, "term": 30}));
    let pipeline = pipeline(transport.clone(), 6);

    let config = RequestConfig::new().cached(None);
    let first: Quote = pipeline.request("/quote", config.clone()).await.unwrap();
    let second: Quote = pipeline.request("/quote", config).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);
    assert!(pipeline.cache().contains_key("/quote"));
}

#[tokio::test]
async fn explicit_cache_key_overrides_the_url() {
    let transport = FakeTransport::json(json!({"ok": true}));
    let pipeline = pipeline(transport.clone(), 6);

    let config = RequestConfig::new().cached(None).cache_key("rates");
    pipeline.request_value("/a", config.clone()).await.unwrap();
    pipeline.request_value("/b", config).await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert!(pipeline.cache().contains_key("rates"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_both_reach_the_transport() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(RawResponse::json(&json!({"n": 1})))
        })
    });
    let pipeline = pipeline(transport.clone(), 6);

    let config = RequestConfig::new().cached(None);
    let (a, b) = tokio::join!(
        pipeline.request_value("/same", config.clone()),
        pipeline.request_value("/same", config)
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_json_content_is_rejected() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            Ok(RawResponse::from_bytes(StatusCode::OK, headers, "<html></html>"))
        })
    });
    let pipeline = pipeline(transport, 6);

    let err = pipeline.request_value("/page", RequestConfig::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported content type: text/html");
}

#[tokio::test(start_paused = true)]
async fn http_errors_use_the_retry_budget_then_surface() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async { Ok(status_response(StatusCode::SERVICE_UNAVAILABLE)) })
    });
    let pipeline = pipeline(transport.clone(), 6);

    let config = RequestConfig::new().retries(2).retry_delay(Duration::from_millis(10));
    let err = pipeline.request_value("/flaky", config).await.unwrap_err();

    assert_eq!(err.to_string(), "HTTP error! status: 503");
    assert_eq!(err.status(), Some(503));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_from_a_transient_failure() {
    let transport = FakeTransport::new(|_, call| {
        Box::pin(async move {
            if call == 1 {
                Err(RequestError::Transport("connection reset".into()))
            } else {
                Ok(RawResponse::json(&json!({"attempt": call})))
            }
        })
    });
    let pipeline = pipeline(transport.clone(), 6);

    let value = pipeline
        .request_value("/retry", RequestConfig::new().retries(1))
        .await
        .unwrap();
    assert_eq!(value, json!({"attempt": 2}));
}

#[tokio::test(start_paused = true)]
async fn slow_transport_times_out() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(RawResponse::json(&json!({})))
        })
    });
    let pipeline = pipeline(transport, 6);

    let err = pipeline
        .request_value("/slow", RequestConfig::new().timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout(_)));
}

struct AppendHeader(&'static str);

#[async_trait]
impl Interceptor for AppendHeader {
    async fn on_request(&self, config: RequestConfig) -> Result<RequestConfig, RequestError> {
        let name = HeaderName::from_static("x-order");
        let previous = config
            .headers
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let value = match previous {
            Some(p) => format!("{p},{}", self.0),
            None => self.0.to_string(),
        };
        let value = HeaderValue::from_str(&value).map_err(|e| RequestError::Interceptor(e.to_string()))?;
        Ok(config.header(name, value))
    }
}

#[tokio::test]
async fn request_interceptors_run_in_registration_order() {
    let transport = FakeTransport::json(json!({}));
    let pipeline = pipeline(transport.clone(), 6);
    pipeline.add_interceptor(Arc::new(AppendHeader("auth")));
    pipeline.add_interceptor(Arc::new(AppendHeader("trace")));

    pipeline.request_value("/x", RequestConfig::new()).await.unwrap();

    let seen = transport.seen.lock();
    assert_eq!(seen[0].headers["x-order"], "auth,trace");
}

struct RejectResponses;

#[async_trait]
impl Interceptor for RejectResponses {
    async fn on_response(&self, _response: Response) -> Result<Response, RequestError> {
        Err(RequestError::Interceptor("blocked".into()))
    }
}

#[tokio::test]
async fn response_interceptor_can_fail_the_request() {
    let transport = FakeTransport::json(json!({}));
    let pipeline = pipeline(transport, 6);
    pipeline.add_interceptor(Arc::new(RejectResponses));

    let err = pipeline.request_value("/x", RequestConfig::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Interceptor error: blocked");
}

struct ServeFallback;

#[async_trait]
impl Interceptor for ServeFallback {
    async fn on_error(&self, error: &RequestError, _config: &RequestConfig) -> Option<Response> {
        (error.status() == Some(500)).then(|| Response::json(&json!({"fallback": true})))
    }
}

#[tokio::test]
async fn error_interceptor_recovery_is_parsed_and_cached() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async { Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR)) })
    });
    let pipeline = pipeline(transport.clone(), 6);
    pipeline.add_interceptor(Arc::new(ServeFallback));

    let config = RequestConfig::new().retries(3).cached(None);
    let value = pipeline.request_value("/rates", config).await.unwrap();

    assert_eq!(value, json!({"fallback": true}));
    assert_eq!(transport.calls(), 1);
    assert!(pipeline.cache().contains_key("/rates"));
}

#[tokio::test]
async fn cancelled_queued_request_never_reaches_the_transport() {
    let gate = Arc::new(Notify::new());
    let transport = {
        let gate = Arc::clone(&gate);
        FakeTransport::new(move |_, _| {
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                gate.notified().await;
                Ok(RawResponse::json(&json!({"first": true})))
            })
        })
    };
    let pipeline = pipeline(transport.clone(), 1);

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.request_value("/first", RequestConfig::new()).await })
    };
    wait_until(|| transport.calls() == 1).await;

    let second = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .request_value("/second", RequestConfig::new().request_id("second"))
                .await
        })
    };
    wait_until(|| pipeline.active_requests().contains(&"second".to_string())).await;
    wait_until(|| pipeline.queue_status().queue_length == 1).await;

    assert!(pipeline.cancel_request("second"));
    assert!(second.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(pipeline.queue_status().queue_length, 0);

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), json!({"first": true}));
    assert_eq!(transport.calls(), 1);
    assert!(!pipeline.cancel_request("second"));
}

#[tokio::test(start_paused = true)]
async fn batched_requests_are_deferred_but_not_merged() {
    let transport = FakeTransport::json(json!({"ok": true}));
    let pipeline = pipeline(transport.clone(), 6);
    let started = Instant::now();

    let config = RequestConfig::new().batched(Duration::from_millis(50)).batch_key("rates");
    let (a, b) = tokio::join!(
        pipeline.request_value("/rates?a", config.clone()),
        pipeline.request_value("/rates?b", config)
    );

    assert!(a.is_ok() && b.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_drops_pending_batches() {
    let transport = FakeTransport::json(json!({}));
    let pipeline = pipeline(transport.clone(), 6);

    let waiter = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .request_value("/later", RequestConfig::new().batched(Duration::from_secs(1)))
                .await
        })
    };
    wait_until(|| pipeline.pending_batched() == 1).await;

    assert_eq!(pipeline.cancel_all_requests(), 1);
    assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn batched_request_can_be_cancelled_by_id() {
    let transport = FakeTransport::json(json!({}));
    let pipeline = pipeline(transport.clone(), 6);

    let waiter = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .request_value(
                    "/later",
                    RequestConfig::new().batched(Duration::from_secs(1)).request_id("r1"),
                )
                .await
        })
    };
    wait_until(|| pipeline.pending_batched() == 1).await;
    assert_eq!(pipeline.active_requests(), vec!["r1".to_string()]);

    assert!(pipeline.cancel_request("r1"));
    assert!(waiter.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(pipeline.pending_batched(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.calls(), 0);
    assert!(pipeline.active_requests().is_empty());
}

#[tokio::test]
async fn media_type_match_ignores_case() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("Application/JSON; charset=utf-8"));
            Ok(RawResponse::from_bytes(StatusCode::OK, headers, r#"{"n":1}"#))
        })
    });
    let pipeline = pipeline(transport, 6);

    let value = pipeline.request_value("/mixed-case", RequestConfig::new()).await.unwrap();
    assert_eq!(value, json!({"n": 1}));
}

#[tokio::test]
async fn download_progress_follows_content_length() {
    let transport = FakeTransport::new(|_, _| {
        Box::pin(async {
            let chunks = [r#"{"values":"#, "[1,2,", "3]}"];
            let total: usize = chunks.iter().map(|c| c.len()).sum();
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
            Ok(RawResponse {
                status: StatusCode::OK,
                headers,
                body: stream::iter(chunks.map(|c| Ok(Bytes::from_static(c.as_bytes())))).boxed(),
            })
        })
    });
    let pipeline = pipeline(transport, 6);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    let value = pipeline
        .request_value(
            "/values",
            RequestConfig::new().on_download_progress(move |p| sink.lock().push(p)),
        )
        .await
        .unwrap();

    assert_eq!(value, json!({"values": [1, 2, 3]}));
    let reports = reports.lock();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[2], Progress { loaded: 18, total: Some(18) });
    assert_eq!(reports[2].fraction(), Some(1.0));
}

#[tokio::test]
async fn upload_progress_fires_as_the_body_is_consumed() {
    let transport = FakeTransport::new(|request, _| {
        let body = request.body_stream(4);
        Box::pin(async move {
            let sent: Vec<_> = body.collect().await;
            assert_eq!(sent.len(), 3);
            Ok(RawResponse::json(&json!({})))
        })
    });
    let pipeline = pipeline(transport, 6);
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    pipeline
        .request_value(
            "/upload",
            RequestConfig::new()
                .method(reqwest::Method::POST)
                .body("0123456789")
                .on_upload_progress(move |p| sink.lock().push(p.loaded)),
        )
        .await
        .unwrap();

    assert_eq!(*reports.lock(), vec![4, 8, 10]);
}
