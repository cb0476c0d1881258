use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Coarse error classification used for logging and caller-side policy.
///
/// Every [`HttpError`] maps onto exactly one kind via [`HttpError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client construction failed (proxy URL, TLS setup, logging backend init).
    Configuration,
    /// The request could not be built (method, URL, header).
    RequestBuild,
    /// The call failed on the wire, timed out, was cancelled, or got a 5xx.
    Transport,
    /// A body could not be read or exceeded its size limit.
    BodyRead,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Proxy URL is missing or malformed
    #[error("Invalid proxy URL '{url}': {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    /// Logging backend failed its one-time configuration step
    #[error("Logger initialization failed: {0}")]
    LoggerInit(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration could not be loaded or extracted
    #[error("Invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme is neither http nor https
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Client timeout covering the whole request/response cycle elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Caller context deadline passed before the call completed
    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    /// Caller context was cancelled before the call completed
    #[error("Context cancelled")]
    Cancelled,

    /// Transport error (network, connection, proxy tunnel, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Body exceeded size limit
    #[error("Body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Body stream failed while being read
    #[error("Failed to read body: {0}")]
    BodyRead(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// HTTP status rejected by the client policy (5xx) or by `error_for_status`
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl HttpError {
    /// Classify the error into one of the four [`ErrorKind`]s.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::InvalidProxyUrl { .. } | HttpError::LoggerInit(_) | HttpError::Config(_) => {
                ErrorKind::Configuration
            }
            HttpError::RequestBuild(_)
            | HttpError::InvalidMethod(_)
            | HttpError::InvalidHeaderName(_)
            | HttpError::InvalidHeaderValue(_)
            | HttpError::InvalidUri { .. }
            | HttpError::InvalidScheme { .. }
            | HttpError::Json(_)
            | HttpError::FormEncode(_) => ErrorKind::RequestBuild,
            HttpError::Timeout(_)
            | HttpError::DeadlineExceeded
            | HttpError::Cancelled
            | HttpError::Transport(_)
            | HttpError::Tls(_)
            | HttpError::HttpStatus { .. } => ErrorKind::Transport,
            HttpError::BodyTooLarge { .. } | HttpError::BodyRead(_) => ErrorKind::BodyRead,
        }
    }

    /// True when the error came from the caller's context rather than the network.
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(self, HttpError::Cancelled | HttpError::DeadlineExceeded)
    }
}

impl From<figment::Error> for HttpError {
    fn from(err: figment::Error) -> Self {
        HttpError::Config(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        crate::transport::map_transport_error(err)
    }
}
