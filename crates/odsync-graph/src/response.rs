//! HTTP response holder shared across one retry-wrapped call
//!
//! A single [`ResponseHolder`] is created at the start of each call made
//! through [`crate::retry`] and reused (via [`ResponseHolder::reset`])
//! across every attempt of that call, so a caller inspecting the final
//! outcome always sees the state of the attempt that actually returned.

use serde_json::Value;
use std::collections::HashMap;

/// Parsed representation of a response body.
///
/// Mirrors the shape of whatever JSON (or absence of JSON) the transport
/// returned, without forcing every caller to guess at a concrete type up
/// front.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Object(serde_json::Map<String, Value>),
    Array(Vec<Value>),
    Primitive(Value),
    Null,
}

impl ParsedBody {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => ParsedBody::Object(map),
            Value::Array(arr) => ParsedBody::Array(arr),
            Value::Null => ParsedBody::Null,
            other => ParsedBody::Primitive(other),
        }
    }

    pub fn as_json(&self) -> Value {
        match self {
            ParsedBody::Object(map) => Value::Object(map.clone()),
            ParsedBody::Array(arr) => Value::Array(arr.clone()),
            ParsedBody::Primitive(v) => v.clone(),
            ParsedBody::Null => Value::Null,
        }
    }
}

/// Canonical reason phrases for codes this crate actually branches on, used
/// when the transport leaves `status.reason` empty (routine under HTTP/2).
pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        422 => "Unprocessable Entity",
        423 => "Locked",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        507 => "Insufficient Storage",
        509 => "Bandwidth Limit Exceeded",
        _ => "",
    }
}

/// Carries status, headers, parsed body, and a raw-bytes capture for one
/// request/response pair. Reusable across retries via [`reset`].
#[derive(Debug, Clone, Default)]
pub struct ResponseHolder {
    status: Option<u16>,
    reason: String,
    headers: HashMap<String, String>,
    body: Option<ParsedBody>,
    raw: Vec<u8>,
}

impl ResponseHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a status line has been observed for the current attempt.
    pub fn has_response(&self) -> bool {
        self.status.is_some()
    }

    /// Clears all fields so this holder can be reused for the next attempt.
    pub fn reset(&mut self) {
        self.status = None;
        self.reason.clear();
        self.headers.clear();
        self.body = None;
        self.raw.clear();
    }

    pub fn set_status(&mut self, status: u16, reason: impl Into<String>) {
        self.status = Some(status);
        let reason = reason.into();
        self.reason = if reason.is_empty() {
            canonical_reason(status).to_string()
        } else {
            reason
        };
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into().to_ascii_lowercase(), value.into());
    }

    pub fn set_body(&mut self, body: ParsedBody) {
        self.body = Some(body);
    }

    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = raw;
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&ParsedBody> {
        self.body.as_ref()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn retry_after(&self) -> Option<&str> {
        self.header("retry-after")
    }

    pub fn www_authenticate(&self) -> Option<&str> {
        self.header("www-authenticate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_holder_has_no_response() {
        let holder = ResponseHolder::new();
        assert!(!holder.has_response());
    }

    #[test]
    fn set_status_populates_has_response() {
        let mut holder = ResponseHolder::new();
        holder.set_status(200, "OK");
        assert!(holder.has_response());
        assert_eq!(holder.status(), Some(200));
        assert_eq!(holder.reason(), "OK");
    }

    #[test]
    fn empty_reason_falls_back_to_canonical() {
        let mut holder = ResponseHolder::new();
        holder.set_status(429, "");
        assert_eq!(holder.reason(), "Too Many Requests");
    }

    #[test]
    fn unknown_status_with_empty_reason_is_empty() {
        let mut holder = ResponseHolder::new();
        holder.set_status(299, "");
        assert_eq!(holder.reason(), "");
    }

    #[test]
    fn reset_clears_all_fields() {
        let mut holder = ResponseHolder::new();
        holder.set_status(200, "OK");
        holder.set_header("Retry-After", "5");
        holder.set_body(ParsedBody::Null);
        holder.set_raw(vec![1, 2, 3]);

        holder.reset();

        assert!(!holder.has_response());
        assert!(holder.reason().is_empty());
        assert!(holder.headers().is_empty());
        assert!(holder.body().is_none());
        assert!(holder.raw().is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut holder = ResponseHolder::new();
        holder.set_header("Retry-After", "120");
        assert_eq!(holder.retry_after(), Some("120"));
        assert_eq!(holder.header("RETRY-AFTER"), Some("120"));
    }

    #[test]
    fn parsed_body_roundtrips_through_json() {
        let value = serde_json::json!({"id": "abc", "size": 11});
        let parsed = ParsedBody::from_json(value.clone());
        assert_eq!(parsed.as_json(), value);
    }
}
