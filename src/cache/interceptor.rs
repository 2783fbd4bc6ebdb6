//! Serve ISR pages straight from the incremental cache.

use std::sync::Arc;

use base64::Engine;

use super::control::{compute_cache_control, CachedResponse};
use super::{CacheEntry, CacheError, CacheValue, IncrementalCache};
use crate::actor::Clock;
use crate::http::event::{InternalEvent, InternalResult};
use crate::lifecycle::tasks::RequestTasks;
use crate::manifest::routes::compile_regex;
use crate::manifest::{BuildOutput, ManifestError};
use crate::observability::metrics;
use crate::revalidation::Queue;
use crate::routing::i18n::localize_path;
use crate::routing::url::decode_path_segment;
use crate::tag_cache::TagCache;

pub const VARY_HEADER: &str =
    "RSC, Next-Router-State-Tree, Next-Router-Prefetch, Next-Router-Segment-Prefetch, Next-Url";

const BINARY_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/epub+zip",
    "application/msword",
    "application/pdf",
    "application/rtf",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/x-protobuf",
    "application/zip",
    "application/gzip",
    "application/x-tar",
    "application/x-7z-compressed",
    "font/otf",
    "font/woff",
    "font/woff2",
    "image/avif",
    "image/bmp",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/vnd.microsoft.icon",
    "image/webp",
    "audio/aac",
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
    "video/mp4",
    "video/mpeg",
    "video/ogg",
    "video/quicktime",
    "video/webm",
];

pub fn is_binary_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| BINARY_CONTENT_TYPES.contains(&ct.trim().to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub struct CacheInterceptor {
    build: Arc<BuildOutput>,
    dynamic_isr: Vec<fancy_regex::Regex>,
    cache: Arc<dyn IncrementalCache>,
    tag_cache: Option<Arc<dyn TagCache>>,
    queue: Option<Arc<dyn Queue>>,
    clock: Arc<dyn Clock>,
    max_concurrency: u32,
}

impl CacheInterceptor {
    pub fn new(
        build: Arc<BuildOutput>,
        cache: Arc<dyn IncrementalCache>,
        tag_cache: Option<Arc<dyn TagCache>>,
        queue: Option<Arc<dyn Queue>>,
        clock: Arc<dyn Clock>,
        max_concurrency: u32,
    ) -> Result<Self, ManifestError> {
        let mut dynamic: Vec<&String> = build
            .prerender
            .dynamic_routes
            .values()
            .map(|r| &r.route_regex)
            .collect();
        dynamic.sort();
        let dynamic_isr = dynamic
            .into_iter()
            .map(|r| compile_regex(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            build,
            dynamic_isr,
            cache,
            tag_cache,
            queue,
            clock,
            max_concurrency,
        })
    }

    /// A cached response for `event`, or `None` to render at the origin.
    pub async fn intercept(&self, event: &InternalEvent, tasks: &RequestTasks) -> Option<InternalResult> {
        match self.try_intercept(event, tasks).await {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(e) => {
                metrics::record_cache_outcome("error");
                tracing::debug!(url = %event.url, error = %e, "cache interception failed, falling through");
                None
            }
        }
    }

    fn bypass(event: &InternalEvent) -> bool {
        if !matches!(event.method.as_str(), "GET" | "HEAD") {
            return true;
        }
        if event.header("next-action").is_some() || event.header("x-prerender-revalidate").is_some()
        {
            return true;
        }
        let cookies = event.cookie_header();
        cookies.contains("__prerender_bypass") || cookies.contains("__next_preview_data")
    }

    /// Cache path: localized, base path and trailing slash removed, segments decoded.
    pub fn cache_path(&self, event: &InternalEvent) -> String {
        let config = &self.build.next_config;
        let mut path = localize_path(event, config.i18n.as_ref());
        if !config.base_path.is_empty() {
            if let Some(rest) = path.strip_prefix(&config.base_path) {
                path = rest.to_string();
            }
        }
        if path.ends_with('/') {
            path.pop();
        }
        path.split('/')
            .map(decode_path_segment)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn is_isr(&self, path: &str) -> bool {
        let route = if path.is_empty() { "/" } else { path };
        self.build.prerender.routes.contains_key(route)
            || self
                .dynamic_isr
                .iter()
                .any(|re| re.is_match(route).unwrap_or(false))
    }

    async fn try_intercept(
        &self,
        event: &InternalEvent,
        tasks: &RequestTasks,
    ) -> Result<Option<InternalResult>, CacheError> {
        if Self::bypass(event) {
            metrics::record_cache_outcome("bypass");
            return Ok(None);
        }
        let path = self.cache_path(event);
        if !self.is_isr(&path) {
            return Ok(None);
        }

        let key = if path.is_empty() { "/index" } else { path.as_str() };
        let Some(entry) = self.cache.get(key).await? else {
            metrics::record_cache_outcome("miss");
            return Ok(None);
        };

        if matches!(entry.value, CacheValue::App { .. } | CacheValue::Route { .. })
            && !entry.should_bypass_tag_cache
        {
            if let Some(tag_cache) = &self.tag_cache {
                let tags = entry.value.tags();
                if !tags.is_empty()
                    && tag_cache
                        .has_been_revalidated(&tags, entry.last_modified)
                        .await?
                {
                    metrics::record_cache_outcome("tag_invalidated");
                    return Ok(None);
                }
            }
        }

        let (mut result, body_for_etag) = self.render(event, &entry)?;
        let host = event.host().unwrap_or("localhost");
        let control = compute_cache_control(
            CachedResponse {
                path: &path,
                body: &body_for_etag,
                host,
                revalidate: entry.value.revalidate(),
                last_modified: Some(entry.last_modified),
            },
            self.clock.now_ms(),
            &self.build.prerender,
            &self.build.next_config,
            self.max_concurrency,
        );
        apply_headers(&mut result, &control, &entry);

        if let (Some(message), Some(queue)) = (control.revalidation.clone(), &self.queue) {
            let queue = Arc::clone(queue);
            tasks.spawn("revalidation", async move { queue.send(message).await });
        }
        metrics::record_cache_outcome(control.status.as_str());
        tracing::debug!(path = %key, kind = entry.value.kind(), status = control.status.as_str(), "served from ISR cache");
        Ok(Some(result))
    }

    /// Result without cache headers, plus the bytes the etag is computed over.
    fn render(&self, event: &InternalEvent, entry: &CacheEntry) -> Result<(InternalResult, Vec<u8>), CacheError> {
        let status = entry.value.meta().and_then(|m| m.status);
        match &entry.value {
            CacheValue::App { html, rsc, .. } => {
                let is_rsc = event.header("rsc").is_some();
                let (body, content_type) = if is_rsc {
                    (rsc.clone(), "text/x-component")
                } else {
                    (html.clone(), "text/html; charset=utf-8")
                };
                let result = InternalResult::new(status.unwrap_or(200))
                    .with_header("content-type", content_type)
                    .with_body(body.clone());
                Ok((result, body.into_bytes()))
            }
            CacheValue::Page { html, json, .. } => {
                let is_data = event.query.contains_key("__nextDataReq");
                let (body, content_type) = if is_data {
                    (serde_json::to_string(json)?, "application/json")
                } else {
                    (html.clone(), "text/html; charset=utf-8")
                };
                let result = InternalResult::new(status.unwrap_or(200))
                    .with_header("content-type", content_type)
                    .with_body(body.clone());
                Ok((result, body.into_bytes()))
            }
            CacheValue::Redirect { .. } => Ok((InternalResult::new(status.unwrap_or(307)), Vec::new())),
            CacheValue::Route { body, meta, .. } => {
                let content_type = meta
                    .as_ref()
                    .and_then(|m| m.headers.get("content-type"))
                    .and_then(|v| v.first());
                let binary = is_binary_content_type(content_type);
                let bytes = if binary {
                    base64::engine::general_purpose::STANDARD.decode(body)?
                } else {
                    body.clone().into_bytes()
                };
                let mut result = InternalResult::new(status.unwrap_or(200)).with_body(bytes);
                result.is_base64_encoded = binary;
                Ok((result, body.clone().into_bytes()))
            }
        }
    }
}

/// Cache headers first, then the stored meta headers, then `vary`.
fn apply_headers(result: &mut InternalResult, control: &super::CacheControl, entry: &CacheEntry) {
    let redirect = matches!(entry.value, CacheValue::Redirect { .. });
    if !redirect {
        control.apply(result);
    }
    if let Some(meta) = entry.value.meta() {
        for (name, value) in &meta.headers {
            result.headers.insert(name.to_ascii_lowercase(), value.clone());
        }
    }
    if redirect {
        control.apply(result);
    } else {
        result.headers.insert("vary".to_string(), VARY_HEADER.into());
    }
}

impl std::fmt::Debug for CacheInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInterceptor")
            .field("build_id", &self.build.build_id)
            .field("dynamic_isr", &self.dynamic_isr.len())
            .field("tag_cache", &self.tag_cache.is_some())
            .field("queue", &self.queue.is_some())
            .finish()
    }
}
