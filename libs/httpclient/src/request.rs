use crate::body::RequestBody;
use crate::client::HttpClient;
use crate::context::RequestContext;
use crate::error::HttpError;
use crate::response::HttpResponse;
use bytes::Bytes;
use http::Method;
use serde::Serialize;

/// Default content type paired with a serialized body
#[derive(Clone, Copy, Debug)]
enum ContentKind {
    Json,
    Form,
}

impl ContentKind {
    fn mime(self) -> &'static str {
        match self {
            ContentKind::Json => "application/json",
            ContentKind::Form => "application/x-www-form-urlencoded",
        }
    }
}

/// HTTP request builder with fluent API
///
/// Created by [`HttpClient::get`], [`HttpClient::post`], etc. A thin layer
/// over [`HttpClient::request`]: `send()` goes through the same pipeline and
/// produces the same single outcome record.
///
/// Header names and values are validated when the request is sent, so an
/// invalid header is reported (and logged) like any other request-build error.
///
/// # Example
///
/// ```ignore
/// let ctx = RequestContext::new().with_request_id("7c0e4a52");
///
/// let created: Item = client
///     .post("https://api.example.com/items")
///     .header("x-tenant", "acme")
///     .json(&NewItem { name: "r" })?
///     .context(ctx)
///     .send()
///     .await?
///     .json()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    client: HttpClient,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    content: Option<ContentKind>,
    ctx: RequestContext,
}

impl RequestBuilder {
    pub(crate) fn new(client: HttpClient, method: Method, url: &str) -> Self {
        Self {
            client,
            method,
            url: url.to_owned(),
            headers: Vec::new(),
            body: None,
            content: None,
            ctx: RequestContext::default(),
        }
    }

    /// Add a single header; a later value for the same name wins
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add multiple headers in order
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set request body as JSON
    ///
    /// Sets Content-Type to `application/json` unless a Content-Type header
    /// was provided.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        let bytes = serde_json::to_vec(body)?;
        self.body = Some(RequestBody::from_bytes(bytes));
        self.content = Some(ContentKind::Json);
        Ok(self)
    }

    /// Set request body as form URL-encoded
    ///
    /// Sets Content-Type to `application/x-www-form-urlencoded` unless a
    /// Content-Type header was provided.
    ///
    /// # Errors
    /// Returns `HttpError::FormEncode` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Result<Self, HttpError> {
        let encoded = serde_urlencoded::to_string(fields)?;
        self.body = Some(RequestBody::from_bytes(encoded));
        self.content = Some(ContentKind::Form);
        Ok(self)
    }

    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::from_bytes(body));
        self.content = None;
        self
    }

    /// Set any request body, including a stream
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self.content = None;
        self
    }

    /// Bind the call to a caller context (cancellation, deadline, request id)
    pub fn context(mut self, ctx: RequestContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Send the request through [`HttpClient::request`]
    ///
    /// # Errors
    /// Same as [`HttpClient::request`].
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if let Some(content) = self.content {
            headers.push((http::header::CONTENT_TYPE.as_str().to_owned(), content.mime().to_owned()));
        }
        headers.extend(self.headers);

        self.client
            .request(&self.ctx, self.method.as_str(), &self.url, headers, self.body)
            .await
    }
}

impl std::fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .finish_non_exhaustive()
    }
}
