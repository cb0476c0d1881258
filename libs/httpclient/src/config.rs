use crate::error::HttpError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("httpclient/", env!("CARGO_PKG_VERSION"));

/// Default request timeout (full request/response cycle)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default cap for buffered and captured bodies (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Prefix for environment variable overrides, e.g. `HTTPCLIENT_TIMEOUT=5s`
pub const ENV_PREFIX: &str = "HTTPCLIENT_";

/// Server certificate verification policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum TlsVerification {
    /// Verify server certificates against the configured roots - default and recommended
    #[default]
    Verify,
    /// Accept any server certificate, including self-signed and expired ones
    ///
    /// **WARNING**: This disables protection against interception. Use only
    /// against development endpoints you control.
    AcceptInvalidCerts,
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// How outcome records reach the log sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogEmission {
    /// Write the record before the call returns
    #[default]
    Inline,
    /// Hand the record to a tracked background task; the call returns immediately
    ///
    /// Use [`HttpClient::flush_logs`](crate::HttpClient::flush_logs) before
    /// process exit to drain pending records.
    Background,
}

/// Output format of the default tracing subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Overall HTTP client configuration
///
/// Immutable once the client is built. All fields have defaults, so partial
/// documents (YAML, env) deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ClientConfig {
    /// Deadline for the full request/response cycle (default: 2s)
    ///
    /// Covers connect, request upload, response headers and - when the body
    /// is buffered for logging - the response body transfer. Zero means no
    /// client timeout; the caller's context deadline still applies.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Route requests through `proxy_url` (default: false)
    pub use_proxy: bool,

    /// HTTP proxy URL, `http://[user:pass@]host[:port]` (default: none)
    pub proxy_url: Option<String>,

    /// Emit an outcome record for every call (default: true)
    pub log_request_response: bool,

    /// Include request/response bodies in outcome records (default: true)
    pub log_body: bool,

    /// Server certificate verification policy (default: `Verify`)
    pub tls_verification: TlsVerification,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Inline or background record emission (default: `Inline`)
    pub log_emission: LogEmission,

    /// Maximum buffered body size in bytes (default: 10 MB)
    ///
    /// Bounds body capture for logging and the response helpers
    /// (`bytes()`, `text()`, `json()`).
    pub max_body_size: usize,

    /// Treat 5xx responses as call failures (default: true)
    pub fail_on_server_error: bool,

    /// User-Agent header value, applied unless the caller sets one
    pub user_agent: String,

    /// Maximum number of redirects to follow (default: 10, 0 disables)
    pub max_redirects: usize,

    /// Output format of the default tracing subscriber (default: `Json`)
    pub log_format: LogFormat,

    /// Default `EnvFilter` directive when `RUST_LOG` is unset (default: "info")
    pub log_filter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            use_proxy: false,
            proxy_url: None,
            log_request_response: true,
            log_body: true,
            tls_verification: TlsVerification::Verify,
            tls_roots: TlsRootConfig::default(),
            log_emission: LogEmission::Inline,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            fail_on_server_error: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_redirects: 10,
            log_format: LogFormat::Json,
            log_filter: "info".to_owned(),
        }
    }
}

impl ClientConfig {
    /// Configuration for talking to local stub servers in tests
    ///
    /// Short timeout, inline emission, no redirects.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_redirects: 0,
            log_format: LogFormat::Text,
            ..Default::default()
        }
    }

    /// Extract a configuration from an arbitrary figment.
    ///
    /// Missing keys fall back to [`ClientConfig::default`].
    ///
    /// # Errors
    /// Returns `HttpError::Config` if a present key has the wrong shape.
    pub fn from_figment(figment: &Figment) -> Result<Self, HttpError> {
        Ok(Figment::from(Serialized::defaults(Self::default()))
            .merge(figment.clone())
            .extract()?)
    }

    /// Load configuration from defaults, an optional YAML file and
    /// `HTTPCLIENT_`-prefixed environment variables (highest precedence).
    ///
    /// # Errors
    /// Returns `HttpError::Config` if the file or an env value cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, HttpError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        // Keys keep their case so the camelCase mapping survives extraction
        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .lowercase(false)
                .map(|key| env_key(key.as_str()).into()),
        );
        Ok(figment.extract()?)
    }
}

/// Map `LOG_REQUEST_RESPONSE` style env keys onto the camelCase field names.
fn env_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out
}

/// Humantime (`"2s"`, `"1500ms"`) representation for `Duration` config fields.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}
