use crate::body::{BoxError, ResponseBody};
use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Maximum body preview size for status error messages (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// HTTP response returned by the client.
///
/// When body logging is enabled the body has already been read once for the
/// log record; what the caller gets is a fresh stream over the same bytes.
///
/// - `resp.error_for_status()?` - Check status without reading body
/// - `resp.bytes().await?` - Read raw bytes
/// - `resp.text().await?` / `resp.json::<T>().await?` - Read with status check
/// - `resp.into_body()` - Stream the body without a size limit
///
/// All buffered reads enforce the configured `max_body_size` limit.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    pub(crate) fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Canonical reason phrase of the status, e.g. `"Not Found"` (empty if unknown)
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.inner.status().canonical_reason().unwrap_or("")
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Consume the wrapper and return the inner response
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Body as a stream, without a size limit
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// Check status without reading the body
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` (empty body preview) if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }
        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
        })
    }

    /// Read the body without a status check
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds `max_body_size`,
    /// or the error the body stream failed with.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner.into_body(), self.max_body_size).await
    }

    /// Read the body as UTF-8 text (lossy) after a status check
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` with a body preview if the status is not 2xx,
    /// plus the errors of [`bytes`](Self::bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse the body as JSON after a status check
    ///
    /// # Errors
    /// As [`text`](Self::text), plus `HttpError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Status error with a preview of the body, read up to the preview limit.
pub(crate) async fn status_error(response: Response<ResponseBody>, max_body_size: usize) -> HttpError {
    let status = response.status();
    let content_type = content_type(response.headers());
    let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
    let body_preview = match read_body_limited(response.into_body(), preview_limit).await {
        Ok(bytes) => preview_text(&bytes),
        Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
        Err(_) => "<body unreadable>".to_owned(),
    };
    HttpError::HttpStatus {
        status,
        body_preview,
        content_type,
    }
}

pub(crate) fn preview_text(bytes: &[u8]) -> String {
    let end = bytes.len().min(ERROR_BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    if !response.status().is_success() {
        return Err(status_error(response, max_body_size).await);
    }
    read_body_limited(response.into_body(), max_body_size).await
}

/// Collect `body`, failing once more than `limit` bytes arrive.
pub(crate) async fn read_body_limited(mut body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(body_error)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }
    Ok(Bytes::from(collected))
}

/// Errors raised by this crate's body wrappers come back unchanged.
pub(crate) fn body_error(err: BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::BodyRead(other),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;
    use std::time::Duration;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        let inner = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(
                Full::new(Bytes::from_static(body.as_bytes()))
                    .map_err(Into::into)
                    .boxed(),
            )
            .unwrap();
        HttpResponse::new(inner, 64)
    }

    #[tokio::test]
    async fn test_json_success() {
        let value: serde_json::Value = response(200, r#"{"a":1}"#).json().await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_text_on_error_status_has_preview() {
        let err = response(404, r#"{"error":"missing"}"#).text().await.unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
            } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(body_preview.contains("missing"));
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bytes_ignores_status() {
        let bytes = response(503, "down").bytes().await.unwrap();
        assert_eq!(&bytes[..], b"down");
    }

    #[tokio::test]
    async fn test_body_limit_enforced() {
        let big: &'static str = Box::leak("x".repeat(100).into_boxed_str());
        let err = response(200, big).bytes().await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 64, actual: 100 }));
    }

    #[test]
    fn test_error_for_status_and_status_text() {
        let resp = response(404, "");
        assert_eq!(resp.status_text(), "Not Found");
        assert!(matches!(
            resp.error_for_status(),
            Err(HttpError::HttpStatus { .. })
        ));
        assert!(response(204, "").error_for_status().is_ok());
    }

    #[test]
    fn test_body_error_unwraps_own_errors() {
        let own: BoxError = Box::new(HttpError::Timeout(Duration::from_secs(2)));
        assert!(matches!(body_error(own), HttpError::Timeout(_)));

        let foreign: BoxError = "connection reset".into();
        assert!(matches!(body_error(foreign), HttpError::BodyRead(_)));
    }
}
