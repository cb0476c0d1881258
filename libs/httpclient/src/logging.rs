//! Logging collaborator for outcome records.
//!
//! A [`LogSink`] receives one message plus an ordered list of typed
//! [`Field`]s per call. [`TracingSink`] is the default: it forwards records
//! as `tracing` events and owns the process-wide subscriber initialization.
//! [`LogEmitter`] decides whether a record is written inline or on a tracked
//! background task.

use crate::config::{ClientConfig, LogEmission, LogFormat};
use crate::error::HttpError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

/// Tracing target used for outcome records
pub const LOG_TARGET: &str = "httpclient";

/// Value of a structured log field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    /// Raw payload bytes
    Bytes(Bytes),
    Duration(Duration),
    Json(Value),
}

impl FieldValue {
    /// JSON rendering used by [`TracingSink`].
    ///
    /// Bytes become embedded JSON when they parse, UTF-8 text otherwise and
    /// base64 as the last resort. Durations are rounded to milliseconds.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::UInt(n) => Value::from(*n),
            FieldValue::Bytes(bytes) => bytes_to_json(bytes),
            FieldValue::Duration(d) => Value::String(format_latency(*d)),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

/// One key/value pair of an outcome record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: &'static str,
    pub value: FieldValue,
}

impl Field {
    #[must_use]
    pub fn new(key: &'static str, value: FieldValue) -> Self {
        Self { key, value }
    }
}

/// Render a byte payload as a JSON value.
pub(crate) fn bytes_to_json(bytes: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_owned()),
        Err(_) => Value::String(STANDARD.encode(bytes)),
    }
}

/// Latency rounded to whole milliseconds, e.g. `52ms` or `1s 200ms`.
#[must_use]
pub fn format_latency(latency: Duration) -> String {
    let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    let rounded = if latency.as_micros() % 1000 >= 500 {
        millis.saturating_add(1)
    } else {
        millis
    };
    humantime::format_duration(Duration::from_millis(rounded)).to_string()
}

/// Structured logging backend.
///
/// Implementations must tolerate concurrent calls; the client never holds a
/// lock while calling into the sink.
pub trait LogSink: Send + Sync {
    /// One-time backend setup, run when a client is built.
    ///
    /// # Errors
    /// A failure aborts client construction.
    fn configure(&self) -> Result<(), HttpError>;

    fn info(&self, message: &str, fields: &[Field]);

    fn error(&self, message: &str, fields: &[Field]);
}

static SUBSCRIBER_INIT: OnceLock<()> = OnceLock::new();

/// [`LogSink`] backed by `tracing`.
///
/// Each record becomes one event on target `httpclient` with the message as
/// the event message and all fields in a single `fields` JSON object.
#[derive(Debug, Clone)]
pub struct TracingSink {
    format: LogFormat,
    default_filter: String,
}

impl TracingSink {
    #[must_use]
    pub fn new(format: LogFormat, default_filter: impl Into<String>) -> Self {
        Self {
            format,
            default_filter: default_filter.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.log_format, config.log_filter.clone())
    }

    fn render(fields: &[Field]) -> String {
        let map: Map<String, Value> = fields
            .iter()
            .map(|f| (f.key.to_owned(), f.value.to_json()))
            .collect();
        Value::Object(map).to_string()
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// `RUST_LOG` when set, otherwise `default_directive`.
fn build_filter(default_directive: &str) -> Result<EnvFilter, HttpError> {
    let directive = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_directive.to_owned());
    EnvFilter::try_new(directive).map_err(|e| HttpError::LoggerInit(Box::new(e)))
}

impl LogSink for TracingSink {
    fn configure(&self) -> Result<(), HttpError> {
        let filter = build_filter(&self.default_filter)?;
        let format = self.format;

        SUBSCRIBER_INIT.get_or_init(|| {
            let builder = tracing_subscriber::fmt().with_env_filter(filter);
            let installed = match format {
                LogFormat::Json => builder.json().try_init(),
                LogFormat::Text => builder.try_init(),
            };
            if installed.is_err() {
                tracing::debug!("global tracing subscriber already installed, keeping it");
            }
        });
        Ok(())
    }

    fn info(&self, message: &str, fields: &[Field]) {
        tracing::info!(target: LOG_TARGET, fields = %Self::render(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &[Field]) {
        tracing::error!(target: LOG_TARGET, fields = %Self::render(fields), "{message}");
    }
}

/// Severity of an outcome record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// Writes records to the sink inline or on tracked background tasks.
///
/// Clones share the tracker; concurrent flushes are serialized so one
/// flush never reopens the tracker under another one still waiting.
#[derive(Clone)]
pub struct LogEmitter {
    sink: Arc<dyn LogSink>,
    mode: LogEmission,
    tasks: TaskTracker,
    flush_lock: Arc<tokio::sync::Mutex<()>>,
}

impl LogEmitter {
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>, mode: LogEmission) -> Self {
        Self {
            sink,
            mode,
            tasks: TaskTracker::new(),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Hand one record to the sink.
    ///
    /// Background emission falls back to an inline write when called
    /// outside a tokio runtime.
    pub fn emit(&self, severity: Severity, message: String, fields: Vec<Field>) {
        let handle = match self.mode {
            LogEmission::Inline => None,
            LogEmission::Background => Handle::try_current().ok(),
        };
        match handle {
            Some(handle) => {
                let sink = Arc::clone(&self.sink);
                // Sinks may do blocking I/O
                self.tasks.spawn_blocking_on(
                    move || write(sink.as_ref(), severity, &message, &fields),
                    &handle,
                );
            }
            None => write(self.sink.as_ref(), severity, &message, &fields),
        }
    }

    /// Wait for every background write spawned so far.
    pub async fn flush(&self) {
        let _serialized = self.flush_lock.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("mode", &self.mode)
            .field("pending", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

fn write(sink: &dyn LogSink, severity: Severity, message: &str, fields: &[Field]) {
    match severity {
        Severity::Info => sink.info(message, fields),
        Severity::Error => sink.error(message, fields),
    }
}
