//! Route matching against the build's route manifests.
//!
//! # Responsibilities
//! - Compile static/dynamic route regexes with an optional base-path + locale prefix
//! - Classify each route as `page`, `app` or `route`
//! - Return every matching route; callers pick precedence
//!
//! # Design Decisions
//! - Compiled once per build output, immutable at runtime
//! - Non-exclusive: a path may match several routes
//! - No I/O

use std::collections::{HashMap, HashSet};

use fancy_regex::Regex;

use crate::http::event::{ResolvedRoute, RouteType};
use crate::manifest::routes::compile_regex;
use crate::manifest::{ManifestError, NextConfig, RouteDefinition};

/// The prefix every route regex is re-anchored on: `^<basePath>/?(?:en/?|fr/?)?`.
pub fn optional_prefix(config: &NextConfig) -> String {
    let locales = config
        .i18n
        .as_ref()
        .map(|i| {
            i.locales
                .iter()
                .map(|l| format!("{}/?", regex::escape(l)))
                .collect::<Vec<_>>()
                .join("|")
        })
        .unwrap_or_default();
    let locale_prefix = if locales.is_empty() {
        "^/".to_string()
    } else {
        format!("^/(?:{locales})?")
    };
    let base_prefix = if config.base_path.is_empty() {
        "^/".to_string()
    } else {
        format!("^{}/?", regex::escape(&config.base_path))
    };
    locale_prefix.replacen("^/", &base_prefix, 1)
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    page: String,
    kind: RouteType,
    regex: Regex,
}

#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    routes: Vec<CompiledRoute>,
}

impl RouteMatcher {
    pub fn new(
        routes: &[RouteDefinition],
        config: &NextConfig,
        app_path_routes: &HashMap<String, String>,
    ) -> Result<Self, ManifestError> {
        let prefix = optional_prefix(config);

        let mut app_paths = HashSet::new();
        let mut route_paths = HashSet::new();
        for (entry, route) in app_path_routes {
            if entry.ends_with("page") {
                app_paths.insert(route.as_str());
            } else if entry.ends_with("route") {
                route_paths.insert(route.as_str());
            }
        }

        let routes = routes
            .iter()
            .map(|route| {
                let kind = if app_paths.contains(route.page.as_str()) {
                    RouteType::App
                } else if route_paths.contains(route.page.as_str()) {
                    RouteType::Route
                } else {
                    RouteType::Page
                };
                Ok(CompiledRoute {
                    page: route.page.clone(),
                    kind,
                    regex: compile_regex(&route.regex.replacen("^/", &prefix, 1))?,
                })
            })
            .collect::<Result<Vec<_>, ManifestError>>()?;

        Ok(Self { routes })
    }

    pub fn matches(&self, path: &str) -> Vec<ResolvedRoute> {
        self.routes
            .iter()
            .filter(|r| r.regex.is_match(path).unwrap_or(false))
            .map(|r| ResolvedRoute {
                route: r.page.clone(),
                kind: r.kind,
            })
            .collect()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.routes
            .iter()
            .any(|r| r.regex.is_match(path).unwrap_or(false))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::I18nConfig;

    fn route(page: &str, regex: &str) -> RouteDefinition {
        RouteDefinition {
            page: page.into(),
            regex: regex.into(),
            ..Default::default()
        }
    }

    fn localized() -> NextConfig {
        NextConfig {
            i18n: Some(I18nConfig {
                locales: vec!["en".into(), "fr".into()],
                default_locale: "en".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_optional_prefix() {
        assert_eq!(optional_prefix(&NextConfig::default()), "^/");
        assert_eq!(optional_prefix(&localized()), "^/(?:en/?|fr/?)?");
        let with_base = NextConfig {
            base_path: "/app".into(),
            ..localized()
        };
        assert_eq!(optional_prefix(&with_base), "^/app/?(?:en/?|fr/?)?");
    }

    #[test]
    fn test_matches_localized_and_plain() {
        let m = RouteMatcher::new(
            &[route("/vehicles/[id]", "^/vehicles/([^/]+?)(?:/)?$")],
            &localized(),
            &HashMap::new(),
        )
        .unwrap();
        assert!(m.is_match("/vehicles/3"));
        assert!(m.is_match("/fr/vehicles/3"));
        assert!(!m.is_match("/de/vehicles/3"));
    }

    #[test]
    fn test_classification() {
        let mut app = HashMap::new();
        app.insert("/dashboard/page".to_string(), "/dashboard".to_string());
        app.insert("/api/export/route".to_string(), "/api/export".to_string());

        let m = RouteMatcher::new(
            &[
                route("/dashboard", "^/dashboard(?:/)?$"),
                route("/api/export", "^/api/export(?:/)?$"),
                route("/about", "^/about(?:/)?$"),
            ],
            &NextConfig::default(),
            &app,
        )
        .unwrap();

        assert_eq!(m.matches("/dashboard")[0].kind, RouteType::App);
        assert_eq!(m.matches("/api/export")[0].kind, RouteType::Route);
        assert_eq!(m.matches("/about/")[0].kind, RouteType::Page);
        assert!(m.matches("/nope").is_empty());
    }

    #[test]
    fn test_non_exclusive() {
        let m = RouteMatcher::new(
            &[
                route("/[slug]", "^/([^/]+?)(?:/)?$"),
                route("/[...all]", "^/(.+?)(?:/)?$"),
            ],
            &NextConfig::default(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(m.matches("/x").len(), 2);
    }
}
