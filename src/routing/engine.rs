//! The routing pipeline.
//!
//! Stage order:
//! 1. strip inbound internal headers
//! 2. compute config headers
//! 3. data-route fix-up
//! 4. redirects (repeated slash, trailing slash, locale, config redirects)
//! 5. middleware, merging its response headers with the config headers
//! 6. before-files rewrites, then static assets
//! 7. static routes, else after-files rewrites
//! 8. fallback: false policy
//! 9. dynamic routes, else fallback rewrites
//! 10. nothing matched → /404
//! 11. cache interception
//! 12. attach headers to the result or the forwarded event

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::assets::AssetResolver;
use crate::cache::interceptor::CacheInterceptor;
use crate::http::event::{
    InternalEvent, InternalResult, MultiValue, ResponseHeaders, Routed, RoutingResult,
};
use crate::lifecycle::tasks::RequestTasks;
use crate::manifest::{BuildOutput, CompiledHeaderRule, CompiledRewrite, ManifestError};
use crate::observability::metrics;
use crate::routing::fallback::FallbackPolicy;
use crate::routing::i18n::{detect_locale, handle_locale_redirect};
use crate::routing::matcher::RouteMatcher;
use crate::routing::middleware::{handle_middleware, MiddlewareOutcome, MiddlewareRegistry};
use crate::routing::normalize::{fix_data_page, handle_repeated_slash_redirect, handle_trailing_slash_redirect};
use crate::routing::rules::{config_headers, handle_rewrites};
use crate::routing::url::construct_next_url;
use crate::routing::{Flow, RoutingError};

pub const INTERNAL_HEADER_PREFIX: &str = "x-opennext-";
pub const MIDDLEWARE_HEADER_PREFIX: &str = "x-middleware-response-";
const NO_CACHE: &str = "private, no-cache, no-store, max-age=0, must-revalidate";

#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingOptions {
    pub enable_cache_interception: bool,
    /// Middleware response headers win over `next.config.js` headers.
    pub middleware_headers_override_next_config: bool,
}

/// Everything routing needs, compiled from one build output.
pub struct RoutingContext {
    pub build: Arc<BuildOutput>,
    pub static_routes: RouteMatcher,
    pub dynamic_routes: RouteMatcher,
    redirects: Vec<CompiledRewrite>,
    before_files: Vec<CompiledRewrite>,
    after_files: Vec<CompiledRewrite>,
    fallback_rewrites: Vec<CompiledRewrite>,
    headers: Vec<CompiledHeaderRule>,
    fallback: FallbackPolicy,
    middleware: MiddlewareRegistry,
    options: RoutingOptions,
    assets: Option<Arc<dyn AssetResolver>>,
    interceptor: Option<Arc<CacheInterceptor>>,
}

impl RoutingContext {
    pub fn new(
        build: Arc<BuildOutput>,
        middleware: MiddlewareRegistry,
        options: RoutingOptions,
        assets: Option<Arc<dyn AssetResolver>>,
        interceptor: Option<Arc<CacheInterceptor>>,
    ) -> Result<Self, ManifestError> {
        let mut static_defs = build.routes.static_routes.clone();
        static_defs.extend(build.static_api_routes());
        let config = &build.next_config;
        let rewrites = &build.routes.rewrites;

        Ok(Self {
            static_routes: RouteMatcher::new(&static_defs, config, &build.app_path_routes)?,
            dynamic_routes: RouteMatcher::new(
                &build.routes.dynamic_routes,
                config,
                &build.app_path_routes,
            )?,
            redirects: CompiledRewrite::compile_all(
                &build
                    .routes
                    .redirects
                    .iter()
                    .filter(|r| !r.internal)
                    .cloned()
                    .collect::<Vec<_>>(),
            )?,
            before_files: CompiledRewrite::compile_all(&rewrites.before_files)?,
            after_files: CompiledRewrite::compile_all(&rewrites.after_files)?,
            fallback_rewrites: CompiledRewrite::compile_all(&rewrites.fallback)?,
            headers: CompiledHeaderRule::compile_all(&build.routes.headers)?,
            fallback: FallbackPolicy::new(&build.prerender)?,
            middleware,
            options,
            assets,
            interceptor,
            build,
        })
    }

    pub fn options(&self) -> RoutingOptions {
        self.options
    }

    /// Route one request. Never fails: errors become a rewrite to `/500`.
    pub async fn route(&self, event: InternalEvent, tasks: &RequestTasks) -> Routed {
        let fallback = event.clone();
        match self.try_route(event, tasks).await {
            Ok(routed) => routed,
            Err(e) => {
                tracing::error!(error = %e, url = %fallback.url, "routing failed, rewriting to /500");
                metrics::record_routing_error();
                self.internal_error(fallback)
            }
        }
    }

    fn internal_error(&self, event: InternalEvent) -> Routed {
        let url = construct_next_url(&event.url, "/500", "").unwrap_or_else(|_| event.url.clone());
        let locale = self
            .build
            .next_config
            .i18n
            .as_ref()
            .map(|i18n| detect_locale(&event, i18n));
        Routed::Forward(Box::new(RoutingResult {
            initial_url: event.url.clone(),
            internal_event: InternalEvent {
                method: "GET".to_string(),
                raw_path: "/500".to_string(),
                url,
                body: None,
                ..event
            },
            is_external_rewrite: false,
            is_isr: false,
            resolved_routes: Vec::new(),
            locale,
        }))
    }

    async fn try_route(
        &self,
        mut event: InternalEvent,
        tasks: &RequestTasks,
    ) -> Result<Routed, RoutingError> {
        let config = &self.build.next_config;
        let initial_url = event.url.clone();
        let initial_search = ::url::Url::parse(&event.url)
            .ok()
            .and_then(|u| u.query().map(|q| format!("?{q}")))
            .unwrap_or_default();

        // 1
        event.headers.retain(|k, _| {
            !k.starts_with(INTERNAL_HEADER_PREFIX) && !k.starts_with(MIDDLEWARE_HEADER_PREFIX)
        });

        // 2
        let next_headers = config_headers(&event, &self.headers, config);

        // 3
        let mut event = match fix_data_page(event, &self.build.build_id, &config.base_path)? {
            Flow::Continue(e) => e,
            Flow::Respond(result) => return Ok(Routed::Respond(result)),
        };

        // 4
        if let Some(redirect) = self.handle_redirects(&event)? {
            return Ok(Routed::Respond(redirect));
        }

        // 5
        let (middleware_event, middleware_headers, mut is_external_rewrite) = match handle_middleware(
            event,
            &initial_search,
            &self.middleware,
            config,
            self.build.preview_mode_id(),
        )
        .await?
        {
            MiddlewareOutcome::Respond(result) => return Ok(Routed::Respond(result)),
            MiddlewareOutcome::Continue {
                event,
                response_headers,
                is_external_rewrite,
            } => (event, response_headers, is_external_rewrite),
        };
        event = middleware_event;
        let headers = self.merge_headers(middleware_headers, next_headers);

        // 6
        if !is_external_rewrite {
            if let Some(out) = handle_rewrites(&event, &self.before_files, config)? {
                event = out.event;
                is_external_rewrite = out.is_external_rewrite;
            }
            if !is_external_rewrite {
                if let Some(assets) = &self.assets {
                    if let Some(mut result) = assets.maybe_get_asset(&event).await {
                        apply_result_headers(&mut result, &headers);
                        return Ok(Routed::Respond(result));
                    }
                }
            }
        }

        // 7
        let found_static = self.static_routes.matches(&event.raw_path);
        let is_static_route = !is_external_rewrite && !found_static.is_empty();
        if !(is_static_route || is_external_rewrite) {
            if let Some(out) = handle_rewrites(&event, &self.after_files, config)? {
                event = out.event;
                is_external_rewrite = out.is_external_rewrite;
            }
        }

        // 8
        let mut is_isr = false;
        if !is_external_rewrite {
            let (e, isr) =
                self.fallback
                    .apply(event, &self.static_routes, &self.dynamic_routes, config)?;
            event = e;
            is_isr = isr;
        }

        // 9
        let found_dynamic = self.dynamic_routes.matches(&event.raw_path);
        let is_dynamic_route = !is_external_rewrite && !found_dynamic.is_empty();
        if !(is_dynamic_route || is_static_route || is_external_rewrite) {
            if let Some(out) = handle_rewrites(&event, &self.fallback_rewrites, config)? {
                event = out.event;
                is_external_rewrite = out.is_external_rewrite;
            }
        }

        // 10
        let found_before_rewrites = is_static_route || is_dynamic_route || is_external_rewrite;
        let is_image = event.raw_path.starts_with("/_next/image");
        if !(found_before_rewrites
            || is_image
            || self.static_routes.is_match(&event.raw_path)
            || self.dynamic_routes.is_match(&event.raw_path))
        {
            let url = construct_next_url(&event.url, "/404", "").map_err(|source| RoutingError::Url {
                url: event.url.clone(),
                source,
            })?;
            event.headers.insert(
                format!("{MIDDLEWARE_HEADER_PREFIX}cache-control"),
                NO_CACHE.to_string(),
            );
            event.raw_path = "/404".to_string();
            event.url = url;
        }

        // 11
        if self.options.enable_cache_interception && !is_external_rewrite {
            if let Some(interceptor) = &self.interceptor {
                if let Some(mut result) = interceptor.intercept(&event, tasks).await {
                    apply_result_headers(&mut result, &headers);
                    return Ok(Routed::Respond(result));
                }
            }
        }

        // 12
        for (key, value) in &headers {
            event
                .headers
                .insert(format!("{MIDDLEWARE_HEADER_PREFIX}{key}"), value.joined(","));
        }

        let mut resolved_routes = found_static;
        resolved_routes.extend(found_dynamic);
        let locale = config.i18n.as_ref().map(|i18n| detect_locale(&event, i18n));

        Ok(Routed::Forward(Box::new(RoutingResult {
            internal_event: event,
            is_external_rewrite,
            is_isr,
            resolved_routes,
            initial_url,
            locale,
        })))
    }

    fn handle_redirects(&self, event: &InternalEvent) -> Result<Option<InternalResult>, RoutingError> {
        let config = &self.build.next_config;
        if let Some(r) = handle_repeated_slash_redirect(event)? {
            return Ok(Some(r));
        }
        if let Some(r) = handle_trailing_slash_redirect(event, config) {
            return Ok(Some(r));
        }
        if let Some(r) = handle_locale_redirect(event, config.i18n.as_ref(), &config.base_path) {
            return Ok(Some(r));
        }
        if let Some(out) = handle_rewrites(event, &self.redirects, config)? {
            let status = out.rule.status_code.unwrap_or(308);
            return Ok(Some(InternalResult::redirect(status, &out.event.url)));
        }
        Ok(None)
    }

    fn merge_headers(
        &self,
        middleware: ResponseHeaders,
        next: BTreeMap<String, String>,
    ) -> ResponseHeaders {
        let next: ResponseHeaders = next.into_iter().map(|(k, v)| (k, MultiValue::One(v))).collect();
        let (mut base, overlay) = if self.options.middleware_headers_override_next_config {
            (next, middleware)
        } else {
            (middleware, next)
        };
        base.extend(overlay);
        base
    }
}

fn apply_result_headers(result: &mut InternalResult, headers: &ResponseHeaders) {
    for (key, value) in headers {
        result.headers.insert(key.clone(), value.clone());
    }
}

impl std::fmt::Debug for RoutingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingContext")
            .field("build_id", &self.build.build_id)
            .field("static_routes", &self.static_routes.len())
            .field("dynamic_routes", &self.dynamic_routes.len())
            .field("options", &self.options)
            .finish()
    }
}
