use crate::body::{BoxError, CaptureBuffer, DeadlineBody, RequestBody, ResponseBody, capture_response_body};
use crate::builder::HttpClientBuilder;
use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{HttpError, InvalidUriKind};
use crate::logging::LogEmitter;
use crate::outcome::OutcomeRecord;
use crate::request::RequestBuilder;
use crate::response::{self, HttpResponse};
use crate::transport::Transport;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, Uri};
use http_body_util::BodyExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;

/// Empty header list for calls that set no headers
pub const NO_HEADERS: [(&str, &str); 0] = [];

/// Instrumented HTTP client.
///
/// Every call goes through [`request`](Self::request): the request body is
/// teed into a capture buffer on its way to the transport, the response body
/// is read once for the log record and handed back as a fresh stream, and
/// exactly one outcome record reaches the log sink per call.
///
/// # Thread Safety
///
/// `HttpClient` is `Clone + Send + Sync` and holds no per-request state.
/// Clones share the transport, the connection pool and the background log
/// tasks.
///
/// # Example
///
/// ```ignore
/// let client = HttpClient::new(ClientConfig::default())?;
/// let ctx = RequestContext::new().with_request_id("7c0e4a52");
///
/// let resp = client
///     .request(&ctx, "POST", "https://api.example.com/items",
///              [("content-type", "application/json")],
///              Some(RequestBody::from(r#"{"name":"r"}"#)))
///     .await?;
/// let item: Item = resp.json().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) transport: Transport,
    pub(crate) emitter: LogEmitter,
    pub(crate) config: Arc<ClientConfig>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}

/// Deadline for one call: the client timeout or the context deadline,
/// whichever comes first. `at` is `None` when neither applies.
#[derive(Debug, Clone, Copy)]
struct CallDeadline {
    at: Option<Instant>,
    timeout: Duration,
    from_context: bool,
}

impl CallDeadline {
    fn new(started: Instant, timeout: Duration, ctx: &RequestContext) -> Self {
        // Zero, or a timeout past the end of the clock, means no client deadline
        let client_deadline = if timeout.is_zero() {
            None
        } else {
            started.checked_add(timeout)
        };
        let (at, from_context) = match (client_deadline, ctx.deadline()) {
            (Some(client), Some(context)) if context < client => (Some(context), true),
            (Some(client), _) => (Some(client), false),
            (None, context) => (context, context.is_some()),
        };
        Self {
            at,
            timeout,
            from_context,
        }
    }

    fn error(self) -> HttpError {
        if self.from_context {
            HttpError::DeadlineExceeded
        } else {
            HttpError::Timeout(self.timeout)
        }
    }

    /// Carry the deadline into a streamed body
    fn bind<B>(self, body: B) -> ResponseBody
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        match self.at {
            Some(at) => DeadlineBody::new(body, at, self.error()).boxed(),
            None => body.map_err(Into::<BoxError>::into).boxed(),
        }
    }
}

/// Outcome of a call in progress.
///
/// Emits the record exactly once: through [`finish`](Self::finish) when the
/// call completes, or on drop as `Cancelled` when the caller abandons the
/// future.
struct PendingOutcome<'a> {
    client: &'a HttpClient,
    started: Instant,
    record: OutcomeRecord,
    capture: Option<CaptureBuffer>,
    emitted: bool,
}

impl<'a> PendingOutcome<'a> {
    fn new(client: &'a HttpClient, started: Instant, record: OutcomeRecord) -> Self {
        Self {
            client,
            started,
            record,
            capture: None,
            emitted: false,
        }
    }

    fn finish(&mut self, error: Option<&HttpError>) {
        if self.emitted {
            return;
        }
        self.emitted = true;
        self.record.latency = self.started.elapsed();
        if let Some(capture) = &self.capture {
            self.record.request_body = Some(capture.snapshot());
        }
        if let Some(err) = error {
            self.record.error = Some(err.to_string());
        }
        self.client.emit(&self.record);
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if !self.emitted {
            tracing::debug!(url = %self.record.url, "request future dropped before completion");
            self.finish(Some(&HttpError::Cancelled));
        }
    }
}

impl HttpClient {
    /// Build a client from a configuration with the default tracing sink
    ///
    /// # Errors
    /// Returns an error if the proxy URL is invalid, TLS setup fails, or
    /// the logging backend cannot be initialized.
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        HttpClientBuilder::with_config(config).build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Configuration the client was built from
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Execute one request.
    ///
    /// Headers are applied in order; a later value for the same name replaces
    /// an earlier one. The call is bound to `ctx`: cancellation or an expired
    /// deadline fails it with `HttpError::Cancelled` /
    /// `HttpError::DeadlineExceeded`. The client timeout covers connect,
    /// upload, response headers and, when bodies are logged, the response
    /// body; otherwise the returned body stream carries the same deadline.
    ///
    /// With `fail_on_server_error` (the default) a 5xx response is returned
    /// as `HttpError::HttpStatus`.
    ///
    /// Dropping the returned future before it completes logs the call as
    /// cancelled, with whatever request bytes were sent so far.
    ///
    /// # Errors
    /// Request-build errors (method, URL, header), transport errors, timeouts,
    /// context errors and rejected statuses. Each one is logged before it is
    /// returned.
    pub async fn request<I, K, V>(
        &self,
        ctx: &RequestContext,
        method: &str,
        url: &str,
        headers: I,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse, HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let started = Instant::now();
        let mut outcome = PendingOutcome::new(
            self,
            started,
            OutcomeRecord::new(
                ctx.request_id().map(str::to_owned),
                method.to_owned(),
                url.to_owned(),
            ),
        );

        let result = self
            .execute(
                ctx,
                started,
                method,
                url,
                headers,
                body,
                &mut outcome.record,
                &mut outcome.capture,
            )
            .await;

        outcome.finish(result.as_ref().err());
        result
    }

    /// Wait until every outcome record handed to a background task is written.
    ///
    /// Only relevant with `LogEmission::Background`; call before process exit.
    pub async fn flush_logs(&self) {
        self.emitter.flush().await;
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Method::HEAD, url)
    }

    fn log_bodies(&self) -> bool {
        self.config.log_request_response && self.config.log_body
    }

    fn emit(&self, record: &OutcomeRecord) {
        if !self.config.log_request_response {
            return;
        }
        self.emitter.emit(
            record.severity(),
            record.message(),
            record.fields(self.config.log_body),
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute<I, K, V>(
        &self,
        ctx: &RequestContext,
        started: Instant,
        method: &str,
        url: &str,
        headers: I,
        body: Option<RequestBody>,
        record: &mut OutcomeRecord,
        capture: &mut Option<CaptureBuffer>,
    ) -> Result<HttpResponse, HttpError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let method = Method::from_bytes(method.as_bytes())?;
        let uri = parse_url(url)?;

        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .body(RequestBody::empty())?;
        {
            let map = request.headers_mut();
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_ref().as_bytes())?;
                let value = HeaderValue::from_str(value.as_ref())?;
                map.insert(name, value);
            }
        }

        if let Some(body) = body {
            let body = if self.log_bodies() {
                let (tee, buffer) = body.tee(self.config.max_body_size);
                *capture = Some(buffer);
                tee
            } else {
                body
            };
            *request.body_mut() = body;
        }

        let deadline = CallDeadline::new(started, self.config.timeout, ctx);
        let response = bounded(ctx, deadline, self.transport.clone().oneshot(request)).await?;
        let status = response.status();
        record.status = Some(status);

        let max_body_size = self.config.max_body_size;
        let (parts, body) = response.into_parts();

        let body = if self.log_bodies() {
            let captured =
                bounded(ctx, deadline, async { Ok(capture_response_body(body, max_body_size).await) })
                    .await?;
            if let Some(note) = &captured.read_error {
                tracing::debug!(url = %url, error = %note, "response body read failed while capturing");
            }
            record.response_body = Some(captured.bytes);
            record.response_truncated = captured.truncated;
            record.body_read_error = captured.read_error;

            if captured.truncated {
                deadline.bind(captured.body)
            } else {
                captured.body.boxed()
            }
        } else {
            deadline.bind(body)
        };

        let response = Response::from_parts(parts, body);

        if status.is_server_error() && self.config.fail_on_server_error {
            return Err(match &record.response_body {
                Some(bytes) => HttpError::HttpStatus {
                    status,
                    body_preview: response::preview_text(bytes),
                    content_type: response
                        .headers()
                        .get(http::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from),
                },
                None => {
                    bounded(ctx, deadline, async {
                        Ok(response::status_error(response, max_body_size).await)
                    })
                    .await?
                }
            });
        }

        Ok(HttpResponse::new(response, max_body_size))
    }
}

/// Race `fut` against the caller's cancellation and the call deadline.
async fn bounded<F, T>(ctx: &RequestContext, deadline: CallDeadline, fut: F) -> Result<T, HttpError>
where
    F: Future<Output = Result<T, HttpError>>,
{
    if ctx.is_cancelled() {
        return Err(HttpError::Cancelled);
    }
    let expiry = async {
        match deadline.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        () = ctx.cancellation_token().cancelled() => Err(HttpError::Cancelled),
        () = expiry => Err(deadline.error()),
        result = fut => result,
    }
}

/// Parse an absolute `http`/`https` URL.
pub(crate) fn parse_url(url: &str) -> Result<Uri, HttpError> {
    let uri: Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("http" | "https") => Ok(uri),
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::logging::{Field, LogSink};
    use http_body_util::Full;
    use parking_lot::Mutex;
    use tower::util::BoxCloneSyncService;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<(String, Vec<Field>)>>,
    }

    impl LogSink for MemorySink {
        fn configure(&self) -> Result<(), HttpError> {
            Ok(())
        }

        fn info(&self, message: &str, fields: &[Field]) {
            self.records.lock().push((message.to_owned(), fields.to_vec()));
        }

        fn error(&self, message: &str, fields: &[Field]) {
            self.records.lock().push((message.to_owned(), fields.to_vec()));
        }
    }

    /// Transport that echoes the request body back with the given status.
    fn echo_transport(status: u16) -> Transport {
        BoxCloneSyncService::new(tower::service_fn(move |req: Request<RequestBody>| async move {
            let headers = req.headers().clone();
            let bytes = req
                .into_body()
                .collect()
                .await
                .map_err(HttpError::BodyRead)?
                .to_bytes();
            let mut resp = Response::builder().status(status);
            if let Some(resp_headers) = resp.headers_mut() {
                *resp_headers = headers;
            }
            let body: ResponseBody = Full::new(bytes).map_err(Into::into).boxed();
            Ok::<_, HttpError>(resp.body(body)?)
        }))
    }

    fn client_with(transport: Transport, sink: Arc<MemorySink>) -> HttpClient {
        HttpClientBuilder::with_config(ClientConfig::for_testing())
            .transport(transport)
            .log_sink(sink)
            .build()
            .unwrap()
    }

    #[test]
    fn test_http_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<HttpClient>();
    }

    #[test]
    fn test_parse_url() {
        assert!(parse_url("http://localhost:8080/health").is_ok());
        assert!(parse_url("https://api.example.com/v1").is_ok());
        assert!(matches!(
            parse_url("/relative"),
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::MissingAuthority,
                ..
            })
        ));
        assert!(matches!(
            parse_url("ftp://files.example.com/a"),
            Err(HttpError::InvalidScheme { .. })
        ));
        assert!(matches!(
            parse_url("http://exa mple.com"),
            Err(HttpError::InvalidUri {
                kind: InvalidUriKind::ParseError,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_request_body_reaches_transport_and_log() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(200), sink.clone());

        let resp = client
            .request(
                &RequestContext::new(),
                "PUT",
                "http://stub.local/items/1",
                NO_HEADERS,
                Some(RequestBody::from(r#"{"name":"r"}"#)),
            )
            .await
            .unwrap();
        assert_eq!(&resp.bytes().await.unwrap()[..], br#"{"name":"r"}"#);

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        let request = records[0].1.iter().find(|f| f.key == "request").unwrap();
        assert_eq!(
            request.value,
            crate::FieldValue::Bytes(Bytes::from_static(br#"{"name":"r"}"#))
        );
    }

    #[tokio::test]
    async fn test_headers_last_write_wins() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(200), sink);

        let resp = client
            .request(
                &RequestContext::new(),
                "GET",
                "http://stub.local/h",
                [("X-Mode", "first"), ("x-mode", "second")],
                None,
            )
            .await
            .unwrap();
        let values: Vec<&str> = resp
            .headers()
            .get_all("x-mode")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, ["second"]);
    }

    #[tokio::test]
    async fn test_invalid_method_is_logged_once() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(200), sink.clone());

        let err = client
            .request(&RequestContext::new(), "BAD METHOD", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RequestBuild);
        assert_eq!(sink.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_returns_status_error_with_preview() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(502), sink.clone());

        let err = client
            .request(
                &RequestContext::new(),
                "POST",
                "http://stub.local/x",
                NO_HEADERS,
                Some(RequestBody::from("upstream said no")),
            )
            .await
            .unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(body_preview, "upstream said no");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let records = sink.records.lock();
        assert!(records[0].0.contains("| 502 | Bad Gateway |"));
    }

    #[tokio::test]
    async fn test_server_error_passthrough_when_disabled() {
        let sink = Arc::new(MemorySink::default());
        let client = HttpClientBuilder::with_config(ClientConfig::for_testing())
            .fail_on_server_error(false)
            .transport(echo_transport(503))
            .log_sink(sink)
            .build()
            .unwrap();

        let resp = client
            .request(&RequestContext::new(), "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(200), sink.clone());
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = client
            .request(&ctx, "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Cancelled));
        assert_eq!(sink.records.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_vs_context_deadline() {
        let stalled: Transport = BoxCloneSyncService::new(tower::service_fn(
            |_req: Request<RequestBody>| async {
                std::future::pending::<Result<Response<ResponseBody>, HttpError>>().await
            },
        ));
        let sink = Arc::new(MemorySink::default());
        let client = client_with(stalled, sink.clone());

        let err = client
            .request(&RequestContext::new(), "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_secs(5)));

        let ctx = RequestContext::new().with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = client
            .request(&ctx, "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::DeadlineExceeded));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(5), "returned after {waited:?}");
        assert_eq!(sink.records.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_client_timeouts() {
        for timeout in [Duration::MAX, Duration::ZERO] {
            let sink = Arc::new(MemorySink::default());
            let client = HttpClientBuilder::with_config(ClientConfig::for_testing())
                .timeout(timeout)
                .transport(echo_transport(200))
                .log_sink(sink.clone())
                .build()
                .unwrap();

            let resp = client
                .request(&RequestContext::new(), "GET", "http://stub.local/ok", NO_HEADERS, None)
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "timeout {timeout:?}");
            assert_eq!(sink.records.lock().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_honours_context_deadline() {
        let stalled: Transport = BoxCloneSyncService::new(tower::service_fn(
            |_req: Request<RequestBody>| async {
                std::future::pending::<Result<Response<ResponseBody>, HttpError>>().await
            },
        ));
        let client = HttpClientBuilder::with_config(ClientConfig::for_testing())
            .timeout(Duration::ZERO)
            .transport(stalled)
            .log_sink(Arc::new(MemorySink::default()))
            .build()
            .unwrap();

        let ctx = RequestContext::new().with_timeout(Duration::from_millis(250));
        let err = client
            .request(&ctx, "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_is_logged_as_cancelled() {
        // Reads the whole upload, then never answers
        let stalled: Transport = BoxCloneSyncService::new(tower::service_fn(
            |req: Request<RequestBody>| async move {
                _ = req.into_body().collect().await;
                std::future::pending::<Result<Response<ResponseBody>, HttpError>>().await
            },
        ));
        let sink = Arc::new(MemorySink::default());
        let client = client_with(stalled, sink.clone());

        let ctx = RequestContext::new();
        let call = client.request(
            &ctx,
            "POST",
            "http://stub.local/slow",
            NO_HEADERS,
            Some(RequestBody::from("partial upload")),
        );
        let timed_out = tokio::time::timeout(Duration::from_millis(100), call).await;
        assert!(timed_out.is_err());

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        let (message, fields) = &records[0];
        assert!(message.starts_with("HttpClient | POST | http://stub.local/slow | 500 |"));
        let field = |key: &str| fields.iter().find(|f| f.key == key).map(|f| f.value.clone());
        assert_eq!(
            field("error"),
            Some(crate::FieldValue::Str(HttpError::Cancelled.to_string()))
        );
        assert!(field("statusCode").is_none());
        assert_eq!(
            field("request"),
            Some(crate::FieldValue::Bytes(Bytes::from_static(b"partial upload")))
        );
    }

    #[tokio::test]
    async fn test_completed_call_is_not_logged_again_on_drop() {
        let sink = Arc::new(MemorySink::default());
        let client = client_with(echo_transport(200), sink.clone());

        let resp = client
            .request(&RequestContext::new(), "GET", "http://stub.local/", NO_HEADERS, None)
            .await
            .unwrap();
        drop(resp);
        drop(client);
        assert_eq!(sink.records.lock().len(), 1);
    }
}
