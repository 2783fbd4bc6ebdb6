//! Static assets (`public/` files and `/_next/static`) served without touching the origin.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::http::event::{InternalEvent, InternalResult};

const IMMUTABLE: &str = "public, max-age=31536000, immutable";
const REVALIDATE: &str = "public, max-age=0, must-revalidate";

#[async_trait]
pub trait AssetResolver: Send + Sync + std::fmt::Debug {
    /// The asset at `path`, if there is one.
    async fn get(&self, path: &str) -> Option<InternalResult>;

    /// Answer the request from assets when it is a plain GET/HEAD for one.
    async fn maybe_get_asset(&self, event: &InternalEvent) -> Option<InternalResult> {
        if event.method != "GET" && event.method != "HEAD" {
            return None;
        }
        self.get(&event.raw_path).await
    }
}

pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("pdf") => "application/pdf",
        Some("webmanifest") => "application/manifest+json",
        _ => "application/octet-stream",
    }
}

/// Assets laid out on disk as they are served: `<root>/_next/static/...`, `<root>/favicon.ico`.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
    base_path: String,
}

impl StaticAssets {
    pub fn new(root: impl Into<PathBuf>, base_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_path: base_path.into(),
        }
    }

    /// Map a request path to a file under the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = path.strip_prefix(&self.base_path).unwrap_or(path);
        let decoded = percent_encoding::percent_decode_str(path).decode_utf8().ok()?;
        let relative = Path::new(decoded.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl AssetResolver for StaticAssets {
    async fn get(&self, path: &str) -> Option<InternalResult> {
        let file = self.resolve(path)?;
        let meta = tokio::fs::metadata(&file).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        let body = tokio::fs::read(&file).await.ok()?;
        let cache_control = if path.contains("/_next/static/") {
            IMMUTABLE
        } else {
            REVALIDATE
        };
        tracing::trace!(path, file = ?file, "serving static asset");
        Some(
            InternalResult::new(200)
                .with_header("content-type", content_type_for(path))
                .with_header("cache-control", cache_control)
                .with_body(Bytes::from(body)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> (tempfile::TempDir, StaticAssets) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("_next/static/chunks")).unwrap();
        std::fs::write(dir.path().join("_next/static/chunks/app.js"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
        let assets = StaticAssets::new(dir.path(), "");
        (dir, assets)
    }

    #[tokio::test]
    async fn test_serves_static_chunk_immutable() {
        let (_dir, assets) = assets();
        let r = assets.get("/_next/static/chunks/app.js").await.unwrap();
        assert_eq!(r.status_code, 200);
        assert_eq!(r.header("cache-control"), Some(IMMUTABLE));
        assert_eq!(r.header("content-type"), Some("application/javascript; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_public_file_and_misses() {
        let (_dir, assets) = assets();
        assert_eq!(&assets.get("/robots.txt").await.unwrap().body[..], b"User-agent: *");
        assert!(assets.get("/missing.txt").await.is_none());
        assert!(assets.get("/_next/static").await.is_none());
        assert!(assets.get("/../etc/passwd").await.is_none());
        assert!(assets.get("/%2e%2e/secret").await.is_none());
        assert!(assets.get("/").await.is_none());
    }

    #[tokio::test]
    async fn test_only_get_and_head() {
        let (_dir, assets) = assets();
        let mut event = InternalEvent {
            method: "POST".into(),
            raw_path: "/robots.txt".into(),
            ..Default::default()
        };
        assert!(assets.maybe_get_asset(&event).await.is_none());
        event.method = "HEAD".into();
        assert!(assets.maybe_get_asset(&event).await.is_some());
    }
}
