//! Interceptors feeding the capture pipeline
//!
//! Two surfaces, both decorators the host application opts into:
//!
//! - [`CaptureLayer`] wraps any tower `Service<http::Request<B>>`. The
//!   response body is wrapped in [`CaptureBody`], which hands every frame to
//!   the caller unchanged while keeping a bounded copy for the capture.
//! - [`CapturingTransport`] wraps an [`HttpTransport`]. Its
//!   [`open`](CapturingTransport::open) / [`StagedCall::set_request_header`] /
//!   [`StagedCall::send`] sequence stages a call piece by piece.
//!
//! Neither surface changes what the caller sees: responses and errors from
//! the wrapped client are returned as-is, and capture failures stay inside
//! [`CapturePipeline::observe`].
//!
//! # Example
//!
//! ```rust
//! use reasonkit_apiscope::capture::CapturePipeline;
//! use reasonkit_apiscope::config::CaptureConfig;
//! use reasonkit_apiscope::interceptor::{InstallFlag, Interceptor};
//! use reasonkit_apiscope::store::UnknownApiStore;
//! use std::sync::Arc;
//!
//! static INSTALLED: InstallFlag = InstallFlag::new();
//!
//! let store = Arc::new(UnknownApiStore::without_registry());
//! let pipeline = Arc::new(CapturePipeline::new(CaptureConfig::default(), store));
//!
//! let interceptor = Interceptor::install(&INSTALLED, pipeline.clone()).unwrap();
//! assert!(Interceptor::install(&INSTALLED, pipeline).is_none());
//!
//! let _layer = interceptor.layer();
//! ```

use async_trait::async_trait;
use axum::http::{header::CONTENT_TYPE, Request, Response};
use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project::{pin_project, pinned_drop};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    task::{ready, Context, Poll, Waker},
};
use tower::{Layer, Service};
use tracing::{debug, info};

use crate::capture::{CapturePipeline, CapturedExchange, RequestBody};
use crate::redact::sanitize_header_map;

/// Error recorded for a call dropped before it completed
pub const ABORTED_ERROR: &str = "request aborted";

// ============================================================================
// Installation
// ============================================================================

/// Application-owned marker making installation happen once
#[derive(Debug, Default)]
pub struct InstallFlag(AtomicBool);

impl InstallFlag {
    /// A flag that has not been claimed
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Whether an interceptor has been installed against this flag
    pub fn is_installed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle producing capture decorators
#[derive(Clone)]
pub struct Interceptor {
    pipeline: Arc<CapturePipeline>,
}

impl Interceptor {
    /// Claim `flag` and create the interceptor
    ///
    /// Returns `None` if the flag was already claimed, so repeated
    /// installation never stacks a second set of decorators.
    pub fn install(flag: &InstallFlag, pipeline: Arc<CapturePipeline>) -> Option<Self> {
        if flag
            .0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Interceptor already installed");
            return None;
        }
        info!(
            graphql_marker = %pipeline.config().graphql_marker,
            max_body_bytes = pipeline.config().max_body_bytes,
            "Installed API capture interceptor"
        );
        Some(Self { pipeline })
    }

    /// Tower layer capturing calls through a service
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer::new(Arc::clone(&self.pipeline))
    }

    /// Wrap a transport so its calls are captured
    pub fn wrap_transport<T: HttpTransport>(&self, transport: T) -> CapturingTransport<T> {
        CapturingTransport::new(transport, Arc::clone(&self.pipeline))
    }

    /// Pipeline shared by every decorator
    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor").finish_non_exhaustive()
    }
}

// ============================================================================
// Request Body Preview
// ============================================================================

/// Describe a request body without consuming it
pub trait BodyPreview {
    /// Text and buffered bodies are copied; streams are only described
    fn preview(&self) -> RequestBody;
}

impl BodyPreview for () {
    fn preview(&self) -> RequestBody {
        RequestBody::Empty
    }
}

impl BodyPreview for String {
    fn preview(&self) -> RequestBody {
        RequestBody::Text(self.clone())
    }
}

impl BodyPreview for &'static str {
    fn preview(&self) -> RequestBody {
        RequestBody::Text((*self).to_string())
    }
}

impl BodyPreview for Bytes {
    fn preview(&self) -> RequestBody {
        preview_bytes(self)
    }
}

impl BodyPreview for Vec<u8> {
    fn preview(&self) -> RequestBody {
        preview_bytes(self)
    }
}

impl BodyPreview for axum::body::Body {
    fn preview(&self) -> RequestBody {
        if self.size_hint().exact() == Some(0) {
            RequestBody::Empty
        } else {
            RequestBody::Stream
        }
    }
}

impl BodyPreview for Full<Bytes> {
    fn preview(&self) -> RequestBody {
        if self.is_end_stream() {
            return RequestBody::Empty;
        }
        // Full yields its single buffered frame on the first poll
        let mut body = self.clone();
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(&mut body).poll_frame(&mut cx) {
            Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                Ok(data) => preview_bytes(&data),
                Err(_) => RequestBody::Empty,
            },
            _ => RequestBody::Empty,
        }
    }
}

fn preview_bytes(bytes: &[u8]) -> RequestBody {
    if bytes.is_empty() {
        return RequestBody::Empty;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => RequestBody::Text(text.to_string()),
        Err(_) => RequestBody::Binary {
            byte_length: bytes.len(),
        },
    }
}

// ============================================================================
// Tower Surface
// ============================================================================

/// Layer wrapping services in [`CaptureService`]
#[derive(Clone)]
pub struct CaptureLayer {
    pipeline: Arc<CapturePipeline>,
}

impl CaptureLayer {
    /// Create a layer feeding `pipeline`
    pub fn new(pipeline: Arc<CapturePipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for CaptureLayer {
    type Service = CaptureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

/// Service capturing every call made through it
#[derive(Clone)]
pub struct CaptureService<S> {
    inner: S,
    pipeline: Arc<CapturePipeline>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CaptureService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    ReqBody: BodyPreview,
{
    type Response = Response<CaptureBody<ResBody>>;
    type Error = S::Error;
    type Future = CaptureFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let exchange = CapturedExchange {
            request_headers: sanitize_header_map(request.headers()).into_iter().collect(),
            request_body: request.body().preview().with_content_type(content_type),
            ..CapturedExchange::new(request.method().as_str(), request.uri().to_string())
        };

        CaptureFuture {
            future: self.inner.call(request),
            pending: Some(PendingCapture {
                pipeline: Arc::clone(&self.pipeline),
                exchange,
            }),
        }
    }
}

/// Future for [`CaptureService`]
///
/// Dropping it before the inner service answers records the call as
/// aborted.
#[pin_project(PinnedDrop)]
pub struct CaptureFuture<F> {
    #[pin]
    future: F,
    pending: Option<PendingCapture>,
}

impl<F, ResBody, E> Future for CaptureFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: fmt::Display,
{
    type Output = Result<Response<CaptureBody<ResBody>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match ready!(this.future.poll(cx)) {
            Ok(response) => {
                let pending = this.pending.take();
                let status = response.status().as_u16();
                let (parts, body) = response.into_parts();
                let capture = pending.map(|pending| BodyCapture::new(pending, status));
                Poll::Ready(Ok(Response::from_parts(
                    parts,
                    CaptureBody {
                        inner: body,
                        capture,
                    },
                )))
            }
            Err(e) => {
                if let Some(pending) = this.pending.take() {
                    pending.finish_with_error(e.to_string());
                }
                Poll::Ready(Err(e))
            }
        }
    }
}

#[pinned_drop]
impl<F> PinnedDrop for CaptureFuture<F> {
    fn drop(self: Pin<&mut Self>) {
        if let Some(pending) = self.project().pending.take() {
            pending.finish_with_error(ABORTED_ERROR.to_string());
        }
    }
}

struct PendingCapture {
    pipeline: Arc<CapturePipeline>,
    exchange: CapturedExchange,
}

impl PendingCapture {
    fn finish_with_error(mut self, error: String) {
        self.exchange.error = Some(error);
        self.pipeline.observe(self.exchange);
    }
}

struct BodyCapture {
    pending: PendingCapture,
    status: u16,
    buffer: BytesMut,
    limit: usize,
    truncated: bool,
}

impl BodyCapture {
    fn new(pending: PendingCapture, status: u16) -> Self {
        let limit = pending.pipeline.config().max_body_bytes;
        Self {
            pending,
            status,
            buffer: BytesMut::new(),
            limit,
            truncated: false,
        }
    }

    fn tee(&mut self, data: &[u8]) {
        let room = self.limit.saturating_sub(self.buffer.len());
        if data.len() > room {
            self.truncated = true;
        }
        self.buffer.extend_from_slice(&data[..data.len().min(room)]);
    }

    fn finish(self, error: Option<String>) {
        let PendingCapture {
            pipeline,
            mut exchange,
        } = self.pending;
        exchange.status = Some(self.status);
        exchange.response_body = Some(self.buffer.freeze());
        exchange.response_truncated = self.truncated;
        exchange.error = error;
        pipeline.observe(exchange);
    }
}

/// Response body that copies what it forwards into the capture pipeline
///
/// The capture runs once: when the stream ends, when it errors, or when the
/// body is dropped early with whatever was read so far.
#[pin_project(PinnedDrop)]
pub struct CaptureBody<B> {
    #[pin]
    inner: B,
    capture: Option<BodyCapture>,
}

impl<B> CaptureBody<B> {
    /// Get a reference to the wrapped body
    pub fn get_ref(&self) -> &B {
        &self.inner
    }
}

impl<B: fmt::Debug> fmt::Debug for CaptureBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBody")
            .field("inner", &self.inner)
            .field("capturing", &self.capture.is_some())
            .finish()
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let (Some(data), Some(capture)) = (frame.data_ref(), this.capture.as_mut()) {
                    capture.tee(data);
                }
            }
            Some(Err(e)) => {
                if let Some(capture) = this.capture.take() {
                    capture.finish(Some(e.to_string()));
                }
            }
            None => {
                if let Some(capture) = this.capture.take() {
                    capture.finish(None);
                }
            }
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[pinned_drop]
impl<B> PinnedDrop for CaptureBody<B> {
    fn drop(self: Pin<&mut Self>) {
        if let Some(capture) = self.project().capture.take() {
            capture.finish(None);
        }
    }
}

// ============================================================================
// Transport Surface
// ============================================================================

/// Request handed to an [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers, in the order they were set
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: RequestBody,
}

/// Response returned by an [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct InboundResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Full response body
    pub body: Bytes,
}

/// An HTTP client that can be decorated with capture
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Transport failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Perform one call
    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, Self::Error>;
}

/// [`HttpTransport`] decorator capturing every completed call
pub struct CapturingTransport<T> {
    inner: T,
    pipeline: Arc<CapturePipeline>,
}

impl<T: HttpTransport> CapturingTransport<T> {
    /// Wrap `inner`
    pub fn new(inner: T, pipeline: Arc<CapturePipeline>) -> Self {
        Self { inner, pipeline }
    }

    /// Stage a call; headers and body follow
    pub fn open(&self, method: impl Into<String>, url: impl Into<String>) -> StagedCall<'_, T> {
        StagedCall {
            transport: self,
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Get a reference to the wrapped transport
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    fn observe<E: fmt::Display>(
        &self,
        mut exchange: CapturedExchange,
        result: &Result<InboundResponse, E>,
    ) {
        match result {
            Ok(response) => {
                let limit = self.pipeline.config().max_body_bytes;
                let kept = response.body.len().min(limit);
                exchange.status = Some(response.status);
                exchange.response_truncated = kept < response.body.len();
                exchange.response_body = Some(response.body.slice(..kept));
            }
            Err(e) => exchange.error = Some(e.to_string()),
        }
        self.pipeline.observe(exchange);
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for CapturingTransport<T> {
    type Error = T::Error;

    async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, Self::Error> {
        let mut guard = AbortGuard {
            pipeline: &self.pipeline,
            exchange: Some(CapturedExchange {
                request_headers: request.headers.clone(),
                request_body: request.body.clone(),
                ..CapturedExchange::new(request.method.clone(), request.url.clone())
            }),
        };

        let result = self.inner.execute(request).await;
        if let Some(exchange) = guard.exchange.take() {
            self.observe(exchange, &result);
        }
        result
    }
}

/// Records the staged exchange as aborted if `execute` is dropped mid-call
struct AbortGuard<'a> {
    pipeline: &'a CapturePipeline,
    exchange: Option<CapturedExchange>,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            self.pipeline.observe(exchange.error(ABORTED_ERROR));
        }
    }
}

/// A call being assembled through [`CapturingTransport::open`]
pub struct StagedCall<'a, T> {
    transport: &'a CapturingTransport<T>,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
}

impl<T: HttpTransport> StagedCall<'_, T> {
    /// Set a request header; repeating a name appends to its value
    pub fn set_request_header(&mut self, name: &str, value: &str) -> &mut Self {
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        self
    }

    /// Send the call; the capture runs once it completes
    pub async fn send(self, body: RequestBody) -> Result<InboundResponse, T::Error> {
        let content_type = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            .map(|(_, value)| value.as_str());
        let body = body.with_content_type(content_type);

        self.transport
            .execute(OutboundRequest {
                method: self.method,
                url: self.url,
                headers: self.headers,
                body,
            })
            .await
    }
}
