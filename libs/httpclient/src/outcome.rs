//! Per-call outcome record and its rendering for the log sink.

use crate::body::CapturedBytes;
use crate::logging::{Field, FieldValue, Severity, format_latency};
use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Status rendered in the message of calls that produced no response
const NO_RESPONSE_STATUS: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

/// Everything known about one call once its outcome is settled.
///
/// Built exactly once per [`HttpClient::request`](crate::HttpClient::request)
/// invocation and handed to the log sink; never stored.
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    pub request_id: Option<String>,
    /// Method as passed by the caller
    pub method: String,
    pub url: String,
    /// Present when a response was received
    pub status: Option<StatusCode>,
    pub latency: Duration,
    /// Error returned to the caller, if any
    pub error: Option<String>,
    /// Request bytes that reached the transport
    pub request_body: Option<CapturedBytes>,
    /// Response bytes read for logging
    pub response_body: Option<Bytes>,
    pub response_truncated: bool,
    /// Failure while draining the response body; the caller sees it too
    pub body_read_error: Option<String>,
}

impl OutcomeRecord {
    pub(crate) fn new(request_id: Option<String>, method: String, url: String) -> Self {
        Self {
            request_id,
            method,
            url,
            status: None,
            latency: Duration::ZERO,
            error: None,
            request_body: None,
            response_body: None,
            response_truncated: false,
            body_read_error: None,
        }
    }

    /// Error when the call failed, info otherwise
    #[must_use]
    pub fn severity(&self) -> Severity {
        if self.error.is_some() {
            Severity::Error
        } else {
            Severity::Info
        }
    }

    /// `HttpClient | <METHOD> | <url> | <code> | <status text> | <latency>`
    ///
    /// Calls without a response render as `500 | Internal Server Error`.
    #[must_use]
    pub fn message(&self) -> String {
        let status = self.status.unwrap_or(NO_RESPONSE_STATUS);
        format!(
            "HttpClient | {} | {} | {} | {} | {}",
            self.method,
            self.url,
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            format_latency(self.latency)
        )
    }

    /// Structured fields in a stable order; body payloads only when `include_bodies`.
    #[must_use]
    pub fn fields(&self, include_bodies: bool) -> Vec<Field> {
        let mut fields = Vec::with_capacity(10);

        if let Some(id) = &self.request_id {
            fields.push(Field::new("requestId", FieldValue::Str(id.clone())));
        }
        fields.push(Field::new("url", FieldValue::Str(self.url.clone())));
        fields.push(Field::new("method", FieldValue::Str(self.method.clone())));
        if let Some(status) = self.status {
            fields.push(Field::new("statusCode", FieldValue::UInt(status.as_u16().into())));
        }
        fields.push(Field::new("latency", FieldValue::Duration(self.latency)));
        if let Some(error) = &self.error {
            fields.push(Field::new("error", FieldValue::Str(error.clone())));
        }
        if let Some(note) = &self.body_read_error {
            fields.push(Field::new("bodyReadError", FieldValue::Str(note.clone())));
        }

        if include_bodies {
            if let Some(captured) = &self.request_body
                && captured.total > 0
            {
                fields.push(Field::new("request", FieldValue::Bytes(captured.bytes.clone())));
                if captured.truncated {
                    fields.push(Field::new("requestTruncated", FieldValue::Json(Value::Bool(true))));
                }
            }
            if let Some(bytes) = &self.response_body {
                fields.push(Field::new("response", FieldValue::Bytes(bytes.clone())));
                if self.response_truncated {
                    fields.push(Field::new("responseTruncated", FieldValue::Json(Value::Bool(true))));
                }
            }
        }

        fields
    }
}
