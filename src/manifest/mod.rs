//! Next.js build output.
//!
//! # Data Flow
//! ```text
//! <build dir>/BUILD_ID
//! <build dir>/routes-manifest.json          → routes.rs
//! <build dir>/prerender-manifest.json       → prerender.rs
//! <build dir>/server/middleware-manifest.json
//! <build dir>/server/app-path-routes-manifest.json
//! <build dir>/server/pages-manifest.json
//! <build dir>/required-server-files.json    → NextConfig
//!     → BuildOutput (immutable, shared via Arc)
//! ```
//!
//! # Design Decisions
//! - Loaded once per (re)load; nothing reads manifests from disk on the request path
//! - Optional manifests default to empty; only BUILD_ID and routes-manifest are required
//! - Rule regexes are compiled at load time so a broken manifest fails startup, not requests

pub mod middleware;
pub mod prerender;
pub mod routes;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use middleware::{MiddlewareInfo, MiddlewareManifest};
pub use prerender::{Fallback, PrerenderManifest, PrerenderRoute, Revalidate};
pub use routes::{
    CompiledHeaderRule, CompiledRewrite, HeaderRule, RouteDefinition, RouteHas, RoutesManifest,
    RewriteRule,
};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid route regex {regex:?}: {message}")]
    Regex { regex: String, message: String },
}

/// Domain-restricted locale group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainLocale {
    pub domain: String,
    pub default_locale: String,
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub http: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub default_locale: String,
    #[serde(default)]
    pub locale_detection: Option<bool>,
    #[serde(default)]
    pub domains: Option<Vec<DomainLocale>>,
}

/// The subset of `next.config.js` the gateway acts on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NextConfig {
    pub base_path: String,
    pub trailing_slash: bool,
    pub skip_trailing_slash_redirect: bool,
    pub i18n: Option<I18nConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RequiredServerFiles {
    #[serde(default)]
    config: NextConfig,
}

/// Everything the gateway needs from a `next build`.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub build_id: String,
    pub next_config: NextConfig,
    pub routes: RoutesManifest,
    pub prerender: PrerenderManifest,
    pub middleware: MiddlewareManifest,
    /// `app-path-routes-manifest.json`: app entry (`/blog/[slug]/page`) → route (`/blog/[slug]`).
    pub app_path_routes: HashMap<String, String>,
    /// `pages-manifest.json`: page → server file.
    pub pages: HashMap<String, String>,
}

impl BuildOutput {
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let build_id_path = dir.join("BUILD_ID");
        let build_id = fs::read_to_string(&build_id_path)
            .map_err(|source| ManifestError::Io {
                path: build_id_path,
                source,
            })?
            .trim()
            .to_string();

        let routes: RoutesManifest = read_json(&dir.join("routes-manifest.json"))?;
        let prerender: PrerenderManifest = read_optional_json(&dir.join("prerender-manifest.json"))?;
        let middleware = read_optional_json(&dir.join("server/middleware-manifest.json"))?;
        let app_path_routes =
            read_optional_json(&dir.join("server/app-path-routes-manifest.json"))?;
        let pages = read_optional_json(&dir.join("server/pages-manifest.json"))?;
        let required: RequiredServerFiles =
            read_optional_json(&dir.join("required-server-files.json"))?;

        let mut next_config = required.config;
        // routes-manifest is authoritative for these when present
        if next_config.base_path.is_empty() {
            next_config.base_path = routes.base_path.clone();
        }
        if next_config.i18n.is_none() {
            next_config.i18n = routes.i18n.clone();
        }

        tracing::info!(
            build_id = %build_id,
            static_routes = routes.static_routes.len(),
            dynamic_routes = routes.dynamic_routes.len(),
            prerendered = prerender.routes.len(),
            "build output loaded"
        );

        Ok(Self {
            build_id,
            next_config,
            routes,
            prerender,
            middleware,
            app_path_routes,
            pages,
        })
    }

    /// Static API routes from the pages manifest, which Next does not list as static routes.
    pub fn static_api_routes(&self) -> Vec<RouteDefinition> {
        let mut pages: Vec<&String> = self
            .pages
            .keys()
            .filter(|p| p.starts_with("/api") && !p.contains('['))
            .collect();
        pages.sort();
        pages
            .into_iter()
            .map(|page| RouteDefinition {
                page: page.clone(),
                regex: format!("^{page}(?:/)?$"),
                ..Default::default()
            })
            .collect()
    }

    pub fn preview_mode_id(&self) -> &str {
        &self.prerender.preview.preview_mode_id
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ManifestError> {
    if !path.exists() {
        tracing::debug!(path = ?path, "optional manifest missing, using defaults");
        return Ok(T::default());
    }
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_minimal_build() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "BUILD_ID", "abc123\n");
        write(
            dir.path(),
            "routes-manifest.json",
            r#"{"version":3,"basePath":"","staticRoutes":[{"page":"/","regex":"^/(?:/)?$","routeKeys":{},"namedRegex":"^/(?:/)?$"}],"dynamicRoutes":[]}"#,
        );
        write(
            dir.path(),
            "server/pages-manifest.json",
            r#"{"/api/health":"pages/api/health.js","/api/[id]":"pages/api/[id].js","/about":"pages/about.html"}"#,
        );

        let build = BuildOutput::load(dir.path()).unwrap();
        assert_eq!(build.build_id, "abc123");
        assert_eq!(build.routes.static_routes.len(), 1);
        assert!(build.prerender.routes.is_empty());

        let api = build.static_api_routes();
        assert_eq!(api.len(), 1);
        assert_eq!(api[0].page, "/api/health");
        assert_eq!(api[0].regex, "^/api/health(?:/)?$");
    }

    #[test]
    fn test_missing_build_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuildOutput::load(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn test_next_config_from_required_server_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "BUILD_ID", "b1");
        write(dir.path(), "routes-manifest.json", r#"{"basePath":""}"#);
        write(
            dir.path(),
            "required-server-files.json",
            r#"{"version":1,"config":{"trailingSlash":true,"i18n":{"locales":["en","fr"],"defaultLocale":"en"}}}"#,
        );

        let build = BuildOutput::load(dir.path()).unwrap();
        assert!(build.next_config.trailing_slash);
        let i18n = build.next_config.i18n.unwrap();
        assert_eq!(i18n.locales, vec!["en", "fr"]);
        assert_eq!(i18n.locale_detection, None);
    }
}
