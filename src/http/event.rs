//! Canonical request/response representation used by the routing pipeline.
//!
//! An [`InternalEvent`] is built once per request by the converter and is only
//! changed by pipeline stages through their return values. An [`InternalResult`]
//! is terminal: once a stage produces one, routing stops.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A query parameter or response header: one value or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultiValue {
    One(String),
    Many(Vec<String>),
}

impl MultiValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(vs) => vs.first().map(String::as_str),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn joined(&self, sep: &str) -> String {
        match self {
            Self::One(v) => v.clone(),
            Self::Many(vs) => vs.join(sep),
        }
    }

    /// Add a value, promoting to `Many` as needed.
    pub fn push(&mut self, value: String) {
        match self {
            Self::One(existing) => {
                let first = std::mem::take(existing);
                *self = Self::Many(vec![first, value]);
            }
            Self::Many(vs) => vs.push(value),
        }
    }
}

impl From<&str> for MultiValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for MultiValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

pub type Query = BTreeMap<String, MultiValue>;
pub type ResponseHeaders = BTreeMap<String, MultiValue>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalEvent {
    pub method: String,
    /// Path component only, never includes the query string.
    pub raw_path: String,
    /// Absolute URL including query string.
    pub url: String,
    pub body: Option<Bytes>,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub query: Query,
    pub cookies: BTreeMap<String, String>,
    pub remote_address: String,
}

impl InternalEvent {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// The raw `cookie` header, empty when absent.
    pub fn cookie_header(&self) -> &str {
        self.header("cookie").unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalResult {
    pub status_code: u16,
    pub headers: ResponseHeaders,
    pub body: Bytes,
    /// The body is binary and must not be treated as text by any transport.
    pub is_base64_encoded: bool,
}

impl InternalResult {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: ResponseHeaders::new(),
            body: Bytes::new(),
            is_base64_encoded: false,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<MultiValue>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn redirect(status_code: u16, location: &str) -> Self {
        Self::new(status_code).with_header("location", location)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(MultiValue::first)
    }
}

/// A route that matched the final path, with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoute {
    pub route: String,
    #[serde(rename = "type")]
    pub kind: RouteType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Page,
    App,
    Route,
}

/// The routing pipeline's answer when it did not produce a terminal result.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingResult {
    pub internal_event: InternalEvent,
    pub is_external_rewrite: bool,
    pub is_isr: bool,
    pub resolved_routes: Vec<ResolvedRoute>,
    pub initial_url: String,
    pub locale: Option<String>,
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Respond immediately (redirect, middleware response, cache hit).
    Respond(InternalResult),
    /// Continue to the origin (or external proxy) with this event.
    Forward(Box<RoutingResult>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_value_push() {
        let mut v = MultiValue::from("a=1");
        v.push("b=2".into());
        assert_eq!(v, MultiValue::Many(vec!["a=1".into(), "b=2".into()]));
        assert_eq!(v.joined(","), "a=1,b=2");
        assert_eq!(v.first(), Some("a=1"));
    }

    #[test]
    fn test_result_builders() {
        let result = InternalResult::redirect(308, "/a");
        assert_eq!(result.status_code, 308);
        assert_eq!(result.header("location"), Some("/a"));
        assert!(result.body.is_empty());
    }
}
