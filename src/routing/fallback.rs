//! 404 policy for dynamic routes declared with `fallback: false`.
//!
//! A path matching such a route that was not pre-rendered, and that no static
//! route or other dynamic route claims, is served the `/404` page.

use std::collections::HashSet;

use fancy_regex::Regex;

use crate::http::event::InternalEvent;
use crate::manifest::routes::compile_regex;
use crate::manifest::{ManifestError, NextConfig, PrerenderManifest};
use crate::routing::matcher::RouteMatcher;
use crate::routing::url::construct_next_url;
use crate::routing::RoutingError;

#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy {
    fallback_false: Vec<(String, Regex)>,
    prerendered: HashSet<String>,
}

impl FallbackPolicy {
    pub fn new(prerender: &PrerenderManifest) -> Result<Self, ManifestError> {
        let mut fallback_false = prerender
            .dynamic_routes
            .iter()
            .filter(|(_, route)| route.is_fallback_false())
            .map(|(name, route)| Ok((name.clone(), compile_regex(&route.route_regex)?)))
            .collect::<Result<Vec<_>, ManifestError>>()?;
        fallback_false.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            fallback_false,
            prerendered: prerender.routes.keys().cloned().collect(),
        })
    }

    /// Returns the (possibly rewritten) event and whether it is an ISR route.
    pub fn apply(
        &self,
        event: InternalEvent,
        static_routes: &RouteMatcher,
        dynamic_routes: &RouteMatcher,
        config: &NextConfig,
    ) -> Result<(InternalEvent, bool), RoutingError> {
        let route_fallback = self
            .fallback_false
            .iter()
            .any(|(_, re)| re.is_match(&event.raw_path).unwrap_or(false));

        let mut localized = match config.i18n.as_ref() {
            Some(i18n) => {
                let first = event.raw_path.split('/').nth(1).unwrap_or("");
                if i18n.locales.iter().any(|l| l == first) {
                    event.raw_path.clone()
                } else {
                    format!("/{}{}", i18n.default_locale, event.raw_path)
                }
            }
            None => event.raw_path.clone(),
        };
        if config.trailing_slash && localized.ends_with('/') {
            localized.pop();
        }

        let static_match = static_routes.is_match(&localized);
        let dynamic_match = dynamic_routes
            .matches(&localized)
            .iter()
            .any(|r| !self.fallback_false.iter().any(|(name, _)| *name == r.route));
        let pregenerated = self.prerendered.contains(&localized);

        if route_fallback && !pregenerated && !static_match && !dynamic_match {
            let url = construct_next_url(&event.url, "/404", "").map_err(|source| RoutingError::Url {
                url: event.url.clone(),
                source,
            })?;
            let mut headers = event.headers.clone();
            headers.insert("x-invoke-status".to_string(), "404".to_string());
            tracing::debug!(path = %event.raw_path, "fallback: false route not pre-rendered, serving 404");
            return Ok((
                InternalEvent {
                    raw_path: "/404".to_string(),
                    url,
                    headers,
                    ..event
                },
                false,
            ));
        }

        Ok((event, route_fallback || pregenerated))
    }
}
