//! `/_next/image` and `/cdn-cgi/image/...` passthrough.
//!
//! # Data Flow
//! ```text
//! GET <basePath>/_next/image?url=...&w=...&q=...
//!     → validate the `url` parameter (length, recursion, allow-lists)
//!     → local: static asset resolver | remote: reqwest (3 redirects max)
//!     → sniff the payload type from its first bytes
//!     → respond with the original bytes and hardened headers
//! ```
//!
//! # Design Decisions
//! - No resizing: the image is served as fetched, the width/quality
//!   parameters are ignored
//! - The upstream `content-type` is never trusted
//! - SVG is rejected unless explicitly allowed

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::assets::AssetResolver;
use crate::config::{ImageConfig, LocalPatternConfig, RemotePatternConfig};
use crate::edge::sniff::{self, detect_image_content_type};
use crate::http::event::{InternalEvent, InternalResult, MultiValue};
use crate::manifest::NextConfig;
use crate::observability::metrics;

const MAX_URL_LENGTH: usize = 3072;
const MAX_REDIRECTS: usize = 3;
const IMMUTABLE: &str = "public, max-age=315360000, immutable";
const REVALIDATE: &str = "public, max-age=0, must-revalidate";
const STATIC_MEDIA_PREFIX: &str = "/_next/static/media";

const CDN_CGI_IMAGE: &str = r"^/cdn-cgi/image/.+?/(?<url>.+)$";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("\"url\" parameter is required")]
    MissingUrl,

    #[error("\"url\" parameter cannot be an array")]
    ArrayUrl,

    #[error("\"url\" parameter is too long")]
    TooLong,

    #[error("\"url\" parameter cannot be a protocol-relative URL (//)")]
    ProtocolRelative,

    #[error("\"url\" parameter cannot be recursive")]
    Recursive,

    #[error("\"url\" parameter is not allowed")]
    NotAllowed,

    #[error("\"url\" parameter is invalid")]
    Invalid,

    #[error("\"url\" parameter is valid but upstream response is invalid")]
    UpstreamInvalid { status: u16 },

    #[error("\"url\" parameter is valid but upstream response timed out")]
    UpstreamTimeout,

    #[error("\"url\" parameter is valid but image type is not allowed")]
    TypeNotAllowed,
}

impl ImageError {
    pub fn status(&self) -> u16 {
        match self {
            Self::UpstreamInvalid { status } => *status,
            Self::UpstreamTimeout => 504,
            _ => 400,
        }
    }

    fn into_result(self) -> InternalResult {
        InternalResult::new(self.status())
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_header("cache-control", "no-store")
            .with_body(self.to_string())
    }
}

#[derive(Debug)]
struct LocalPattern {
    pathname: Regex,
    search: Option<String>,
}

#[derive(Debug)]
struct RemotePattern {
    protocol: Option<String>,
    hostname: Regex,
    port: Option<String>,
    pathname: Regex,
    search: Option<String>,
}

impl LocalPattern {
    fn compile(config: &LocalPatternConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            pathname: Regex::new(&config.pathname)?,
            search: config.search.clone(),
        })
    }

    fn matches(&self, url: &Url) -> bool {
        search_matches(self.search.as_deref(), url) && self.pathname.is_match(url.path())
    }
}

impl RemotePattern {
    fn compile(config: &RemotePatternConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            protocol: config
                .protocol
                .as_ref()
                .map(|p| p.trim_end_matches(':').to_ascii_lowercase()),
            hostname: Regex::new(&config.hostname)?,
            port: config.port.clone(),
            pathname: Regex::new(&config.pathname)?,
            search: config.search.clone(),
        })
    }

    fn matches(&self, url: &Url) -> bool {
        if let Some(protocol) = &self.protocol {
            if protocol != url.scheme() {
                return false;
            }
        }
        if let Some(port) = &self.port {
            let actual = url.port().map(|p| p.to_string()).unwrap_or_default();
            if port != &actual {
                return false;
            }
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        self.hostname.is_match(host)
            && search_matches(self.search.as_deref(), url)
            && self.pathname.is_match(url.path())
    }
}

/// `search` is compared against `?query`, or the empty string when there is none.
fn search_matches(expected: Option<&str>, url: &Url) -> bool {
    match expected {
        None => true,
        Some(expected) => {
            let actual = url.query().map(|q| format!("?{q}")).unwrap_or_default();
            expected == actual
        }
    }
}

/// Route path of the image endpoint for this build.
pub fn image_route(config: &NextConfig) -> String {
    let mut route = format!("{}/_next/image", config.base_path);
    if config.trailing_slash {
        route.push('/');
    }
    route
}

/// Where the image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageSource {
    Local { path: String, is_static: bool },
    Remote(Url),
}

struct Fetched {
    body: Bytes,
    cache_control: Option<String>,
}

pub struct ImageHandler {
    route: String,
    base_path: String,
    allow_svg: bool,
    content_security_policy: String,
    content_disposition_type: String,
    local_patterns: Vec<LocalPattern>,
    remote_patterns: Vec<RemotePattern>,
    cdn_cgi: Regex,
    assets: Option<Arc<dyn AssetResolver>>,
    http: reqwest::Client,
}

impl ImageHandler {
    pub fn new(
        config: &ImageConfig,
        next_config: &NextConfig,
        assets: Option<Arc<dyn AssetResolver>>,
    ) -> Result<Self, ImageSetupError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()?;
        Ok(Self {
            route: image_route(next_config),
            base_path: next_config.base_path.clone(),
            allow_svg: config.allow_svg,
            content_security_policy: config.content_security_policy.clone(),
            content_disposition_type: config.content_disposition_type.clone(),
            local_patterns: config
                .local_patterns
                .iter()
                .map(LocalPattern::compile)
                .collect::<Result<_, _>>()?,
            remote_patterns: config
                .remote_patterns
                .iter()
                .map(RemotePattern::compile)
                .collect::<Result<_, _>>()?,
            cdn_cgi: Regex::new(CDN_CGI_IMAGE)?,
            assets,
            http,
        })
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn is_image_request(&self, event: &InternalEvent) -> bool {
        event.raw_path == self.route
    }

    pub fn is_cdn_cgi_request(event: &InternalEvent) -> bool {
        event.raw_path.starts_with("/cdn-cgi/image/")
    }

    /// Serve `<basePath>/_next/image`.
    pub async fn handle(&self, event: &InternalEvent) -> InternalResult {
        let result = match self.validate(event) {
            Ok(source) => self.serve(source).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(result) => {
                metrics::record_image_request("ok");
                result
            }
            Err(e) => {
                tracing::debug!(url = %event.url, error = %e, "image request rejected");
                metrics::record_image_request("rejected");
                e.into_result()
            }
        }
    }

    fn validate(&self, event: &InternalEvent) -> Result<ImageSource, ImageError> {
        let url = match event.query.get("url") {
            None => return Err(ImageError::MissingUrl),
            Some(MultiValue::Many(_)) => return Err(ImageError::ArrayUrl),
            Some(MultiValue::One(url)) if url.is_empty() => return Err(ImageError::MissingUrl),
            Some(MultiValue::One(url)) => url,
        };
        if url.len() > MAX_URL_LENGTH {
            return Err(ImageError::TooLong);
        }
        if url.starts_with("//") {
            return Err(ImageError::ProtocolRelative);
        }

        if url.starts_with('/') {
            let parsed = Url::parse("http://n")
                .and_then(|base| base.join(url))
                .map_err(|_| ImageError::Invalid)?;
            let path = parsed.path();
            let recursive_prefix = format!("{}/_next/image", self.base_path);
            if path.starts_with(&recursive_prefix) {
                return Err(ImageError::Recursive);
            }
            if !self.local_patterns.iter().any(|p| p.matches(&parsed)) {
                return Err(ImageError::NotAllowed);
            }
            return Ok(ImageSource::Local {
                is_static: path
                    .strip_prefix(&self.base_path)
                    .unwrap_or(path)
                    .starts_with(STATIC_MEDIA_PREFIX),
                path: path.to_string(),
            });
        }

        let parsed = Url::parse(url).map_err(|_| ImageError::Invalid)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ImageError::Invalid);
        }
        if !self.remote_patterns.iter().any(|p| p.matches(&parsed)) {
            return Err(ImageError::NotAllowed);
        }
        Ok(ImageSource::Remote(parsed))
    }

    async fn serve(&self, source: ImageSource) -> Result<InternalResult, ImageError> {
        let (fetched, is_static) = match &source {
            ImageSource::Local { path, is_static } => (self.fetch_local(path).await?, *is_static),
            ImageSource::Remote(url) => (self.fetch_remote(url.clone()).await?, false),
        };

        let content_type = detect_image_content_type(&fetched.body)
            .filter(|ct| *ct != sniff::SVG || self.allow_svg)
            .ok_or(ImageError::TypeNotAllowed)?;

        let upstream_immutable = fetched
            .cache_control
            .as_deref()
            .is_some_and(|cc| cc.contains("immutable"));
        let cache_control = if is_static || upstream_immutable {
            IMMUTABLE.to_string()
        } else {
            fetched.cache_control.unwrap_or_else(|| REVALIDATE.to_string())
        };

        let mut result = InternalResult::new(200)
            .with_header("content-type", content_type)
            .with_header("cache-control", cache_control)
            .with_header("vary", "Accept")
            .with_header("content-disposition", self.content_disposition_type.as_str())
            .with_header("content-security-policy", self.content_security_policy.as_str())
            .with_body(fetched.body);
        result.is_base64_encoded = true;
        Ok(result)
    }

    async fn fetch_local(&self, path: &str) -> Result<Fetched, ImageError> {
        let asset = match &self.assets {
            Some(assets) => assets.get(path).await,
            None => None,
        };
        let asset = asset.ok_or(ImageError::UpstreamInvalid { status: 404 })?;
        if asset.status_code >= 300 {
            return Err(ImageError::UpstreamInvalid { status: asset.status_code });
        }
        Ok(Fetched {
            cache_control: asset.header("cache-control").map(str::to_string),
            body: asset.body,
        })
    }

    async fn fetch_remote(&self, url: Url) -> Result<Fetched, ImageError> {
        let response = self.http.get(url.clone()).send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "image fetch failed");
            if e.is_timeout() {
                ImageError::UpstreamTimeout
            } else {
                ImageError::UpstreamInvalid { status: 508 }
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::UpstreamInvalid { status: status.as_u16() });
        }
        let cache_control = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ImageError::UpstreamTimeout
            } else {
                ImageError::UpstreamInvalid { status: 508 }
            }
        })?;
        Ok(Fetched { body, cache_control })
    }

    /// Serve `/cdn-cgi/image/<options>/<url>` by fetching the original image.
    pub async fn handle_cdn_cgi(&self, event: &InternalEvent) -> InternalResult {
        let Some(url) = self
            .cdn_cgi
            .captures(&event.raw_path)
            .and_then(|c| c.name("url"))
            .map(|m| m.as_str().to_string())
        else {
            return InternalResult::new(404).with_body("Not Found!");
        };

        if url.starts_with("http://") || url.starts_with("https://") {
            let Ok(parsed) = Url::parse(&url) else {
                return InternalResult::new(404).with_body("Not Found!");
            };
            return match self.http.get(parsed).send().await {
                Ok(response) => passthrough(response).await,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "cdn-cgi image fetch failed");
                    InternalResult::new(if e.is_timeout() { 504 } else { 502 })
                }
            };
        }

        let path = format!("/{url}");
        let asset = match &self.assets {
            Some(assets) => assets.get(&path).await,
            None => None,
        };
        asset.unwrap_or_else(|| InternalResult::new(404).with_body("Not Found!"))
    }
}

async fn passthrough(response: reqwest::Response) -> InternalResult {
    let status = response.status().as_u16();
    let mut result = InternalResult::new(status);
    for name in [reqwest::header::CONTENT_TYPE, reqwest::header::CACHE_CONTROL] {
        if let Some(value) = response.headers().get(&name).and_then(|v| v.to_str().ok()) {
            result.headers.insert(name.as_str().to_string(), value.into());
        }
    }
    match response.bytes().await {
        Ok(body) => {
            result.body = body;
            result.is_base64_encoded = true;
            result
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read cdn-cgi image body");
            InternalResult::new(502)
        }
    }
}

impl std::fmt::Debug for ImageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandler")
            .field("route", &self.route)
            .field("allow_svg", &self.allow_svg)
            .field("local_patterns", &self.local_patterns.len())
            .field("remote_patterns", &self.remote_patterns.len())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ImageSetupError {
    #[error("invalid image pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to build image client: {0}")]
    Client(#[from] reqwest::Error),
}
