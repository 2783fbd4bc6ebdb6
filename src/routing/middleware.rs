//! Next.js middleware invocation.
//!
//! # Responsibilities
//! - Decide whether middleware runs for a request (preview bypass, matchers)
//! - Build the middleware input (url, geo, headers, nextConfig, body)
//! - Partition the middleware's response headers into request and response headers
//! - Turn the response into a rewrite, a pass-through, or a terminal response
//!
//! # Design Decisions
//! - Implementations are registered by manifest entry name at startup; no lookup by
//!   string on the request path beyond the registry built once
//! - The stock implementation calls a Node sidecar over HTTP ([`RemoteMiddleware`])

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::http::event::{InternalEvent, InternalResult, MultiValue, ResponseHeaders};
use crate::manifest::routes::compile_regex;
use crate::manifest::{I18nConfig, ManifestError, MiddlewareManifest, NextConfig};
use crate::routing::i18n::localize_path;
use crate::routing::url::{is_external, parse_query};
use crate::routing::RoutingError;

const REQUEST_HEADER_PREFIX: &str = "x-middleware-request-";
const FILTERED_HEADERS: [&str; 4] = [
    "x-middleware-override-headers",
    "x-middleware-next",
    "x-middleware-rewrite",
    "content-encoding",
];
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("middleware transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("middleware returned invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Geo {
    pub city: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareNextConfig {
    pub base_path: String,
    pub i18n: Option<I18nConfig>,
    pub trailing_slash: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareInput {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub geo: Geo,
    pub next_config: MiddlewareNextConfig,
    #[serde(skip)]
    pub body: Option<Bytes>,
}

/// What a middleware function answered. Header order is preserved; names may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiddlewareResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MiddlewareResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Middleware: Send + Sync + std::fmt::Debug {
    async fn invoke(&self, input: MiddlewareInput) -> Result<MiddlewareResponse, MiddlewareError>;
}

/// Runs middleware in a Node sidecar. The input travels as JSON in the
/// `x-middleware-input` header with the request body as the HTTP body, and the
/// sidecar's HTTP response is the middleware response.
#[derive(Debug, Clone)]
pub struct RemoteMiddleware {
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteMiddleware {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, MiddlewareError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl Middleware for RemoteMiddleware {
    async fn invoke(&self, input: MiddlewareInput) -> Result<MiddlewareResponse, MiddlewareError> {
        let envelope = serde_json::to_string(&input)
            .map_err(|e| MiddlewareError::InvalidResponse(e.to_string()))?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-middleware-input", envelope)
            .body(input.body.unwrap_or_default())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await?;
        Ok(MiddlewareResponse { status, headers, body })
    }
}

#[derive(Debug)]
struct RegisteredMiddleware {
    name: String,
    matchers: Vec<Regex>,
    handler: Arc<dyn Middleware>,
}

/// Middleware implementations keyed by manifest entry, in manifest order.
#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    entries: Vec<RegisteredMiddleware>,
}

impl MiddlewareRegistry {
    /// Bind each manifest entry to its implementation. Entries with no
    /// implementation fall back to `default`, and are skipped without one.
    pub fn new(
        manifest: &MiddlewareManifest,
        handlers: &HashMap<String, Arc<dyn Middleware>>,
        default: Option<Arc<dyn Middleware>>,
    ) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();
        for info in manifest.ordered() {
            let Some(handler) = handlers.get(&info.name).cloned().or_else(|| default.clone()) else {
                tracing::warn!(name = %info.name, "middleware in manifest has no implementation, skipping");
                continue;
            };
            let matchers = info
                .matchers
                .iter()
                .map(|m| compile_regex(&m.regexp))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(RegisteredMiddleware {
                name: info.name.clone(),
                matchers,
                handler,
            });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, path: &str) -> Option<&RegisteredMiddleware> {
        self.entries.iter().find(|entry| {
            entry
                .matchers
                .iter()
                .any(|re| re.is_match(path).unwrap_or(false))
        })
    }
}

/// What routing does after middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    /// Routing continues with this event.
    Continue {
        event: InternalEvent,
        response_headers: ResponseHeaders,
        is_external_rewrite: bool,
    },
    /// The middleware's response is the answer.
    Respond(InternalResult),
}

fn geo(event: &InternalEvent) -> Geo {
    let get = |name: &str| event.header(name).map(str::to_string);
    Geo {
        city: get("x-open-next-city"),
        country: get("x-open-next-country"),
        region: get("x-open-next-region"),
        latitude: get("x-open-next-latitude"),
        longitude: get("x-open-next-longitude"),
    }
}

/// Make a same-origin redirect target relative.
pub fn normalize_location(location: &str, base_url: &str) -> String {
    let (Ok(target), Ok(base)) = (Url::parse(location), Url::parse(base_url)) else {
        return location.to_string();
    };
    let origin = target.origin().ascii_serialization();
    let search = target.query().map(|q| format!("?{q}")).unwrap_or_default();
    let hash = target.fragment().map(|f| format!("#{f}")).unwrap_or_default();
    let href = format!("{origin}{}{search}{hash}", target.path());
    if target.origin() == base.origin() {
        href[origin.len()..].to_string()
    } else {
        href
    }
}

pub async fn handle_middleware(
    event: InternalEvent,
    initial_search: &str,
    registry: &MiddlewareRegistry,
    config: &NextConfig,
    preview_mode_id: &str,
) -> Result<MiddlewareOutcome, RoutingError> {
    let passthrough = |event| MiddlewareOutcome::Continue {
        event,
        response_headers: ResponseHeaders::new(),
        is_external_rewrite: false,
    };

    if event.header("x-isr").is_some()
        && event.header("x-prerender-revalidate") == Some(preview_mode_id)
    {
        return Ok(passthrough(event));
    }

    let normalized = localize_path(&event, config.i18n.as_ref());
    let Some(entry) = registry.find(&normalized) else {
        return Ok(passthrough(event));
    };

    let mut initial_url = Url::parse(&event.url)
        .and_then(|u| u.join(&normalized))
        .map_err(|source| RoutingError::Url {
            url: event.url.clone(),
            source,
        })?;
    let search = initial_search.strip_prefix('?').unwrap_or(initial_search);
    initial_url.set_query((!search.is_empty()).then_some(search));

    let input = MiddlewareInput {
        url: initial_url.to_string(),
        method: event.method.clone(),
        headers: event.headers.clone(),
        geo: geo(&event),
        next_config: MiddlewareNextConfig {
            base_path: config.base_path.clone(),
            i18n: config.i18n.clone(),
            trailing_slash: config.trailing_slash,
        },
        body: event.body.clone(),
    };

    tracing::debug!(middleware = %entry.name, url = %input.url, "invoking middleware");
    let result = entry
        .handler
        .invoke(input)
        .await
        .map_err(|e| RoutingError::Middleware(e.to_string()))?;

    let mut request_headers = BTreeMap::new();
    let mut response_headers = ResponseHeaders::new();
    for (key, value) in &result.headers {
        let lower = key.to_lowercase();
        if let Some(name) = lower.strip_prefix(REQUEST_HEADER_PREFIX) {
            request_headers.insert(name.to_string(), value.clone());
            continue;
        }
        if FILTERED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if lower == "set-cookie" {
            match response_headers.get_mut(&lower) {
                Some(existing) => existing.push(value.clone()),
                None => {
                    response_headers.insert(lower, MultiValue::Many(vec![value.clone()]));
                }
            }
        } else if lower == "location" && REDIRECT_STATUSES.contains(&result.status) {
            response_headers.insert(lower, normalize_location(value, &event.url).into());
        } else {
            response_headers.insert(lower, value.clone().into());
        }
    }

    let rewrite = result.header("x-middleware-rewrite").map(str::to_string);
    if rewrite.is_none() && result.header("x-middleware-next").is_none() {
        return Ok(MiddlewareOutcome::Respond(InternalResult {
            status_code: result.status,
            headers: response_headers,
            body: result.body,
            is_base64_encoded: false,
        }));
    }

    let mut is_external_rewrite = false;
    let mut query = event.query.clone();
    let mut url = event.url.clone();
    if let Some(rewrite) = rewrite {
        url = rewrite;
        if is_external(&url, event.host()) {
            is_external_rewrite = true;
        } else {
            let parsed = Url::parse(&url).map_err(|source| RoutingError::Url {
                url: url.clone(),
                source,
            })?;
            query = parse_query(parsed.query().unwrap_or(""));
            if let Some(data_req) = event.query.get("__nextDataReq") {
                query.insert("__nextDataReq".to_string(), data_req.clone());
            }
        }
    }

    let raw_path = Url::parse(&url)
        .map(|u| u.path().to_string())
        .map_err(|source| RoutingError::Url {
            url: url.clone(),
            source,
        })?;
    let mut headers = event.headers.clone();
    headers.extend(request_headers);

    Ok(MiddlewareOutcome::Continue {
        event: InternalEvent {
            raw_path,
            url,
            headers,
            query,
            ..event
        },
        response_headers,
        is_external_rewrite,
    })
}
