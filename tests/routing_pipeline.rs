//! Routing pipeline tests against a build output on disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use render_edge::http::event::{InternalEvent, Routed, RoutingResult};
use render_edge::lifecycle::RequestTasks;
use render_edge::manifest::BuildOutput;
use render_edge::routing::middleware::{
    Middleware, MiddlewareError, MiddlewareInput, MiddlewareRegistry, MiddlewareResponse,
};
use render_edge::routing::{RoutingContext, RoutingOptions};

mod common;

const HOST: &str = "fleet.example.com";

fn context_for(routes: serde_json::Value) -> (tempfile::TempDir, RoutingContext) {
    let dir = tempfile::tempdir().unwrap();
    common::write_build(dir.path(), &routes, &common::prerender_manifest());
    let build = Arc::new(BuildOutput::load(dir.path()).unwrap());
    let ctx = RoutingContext::new(
        build,
        MiddlewareRegistry::default(),
        RoutingOptions::default(),
        None,
        None,
    )
    .unwrap();
    (dir, ctx)
}

fn context() -> (tempfile::TempDir, RoutingContext) {
    context_for(common::routes_manifest())
}

fn event(path_and_query: &str, headers: &[(&str, &str)]) -> InternalEvent {
    let raw_path = path_and_query.split('?').next().unwrap().to_string();
    let mut event = InternalEvent {
        method: "GET".to_string(),
        raw_path,
        url: format!("https://{HOST}{path_and_query}"),
        remote_address: "10.0.0.1".to_string(),
        ..Default::default()
    };
    event.headers.insert("host".to_string(), HOST.to_string());
    for (k, v) in headers {
        event.headers.insert(k.to_string(), v.to_string());
    }
    event
}

async fn route(ctx: &RoutingContext, event: InternalEvent) -> Routed {
    ctx.route(event, &RequestTasks::new()).await
}

fn forwarded(routed: Routed) -> RoutingResult {
    match routed {
        Routed::Forward(result) => *result,
        Routed::Respond(result) => panic!("expected forward, got {} response", result.status_code),
    }
}

fn redirect_location(routed: Routed, status: u16) -> String {
    match routed {
        Routed::Respond(result) => {
            assert_eq!(result.status_code, status);
            result.header("location").unwrap().to_string()
        }
        Routed::Forward(result) => panic!("expected redirect, got forward to {}", result.internal_event.raw_path),
    }
}

#[tokio::test]
async fn test_static_route_forwards_with_config_headers() {
    let (_dir, ctx) = context();
    let result = forwarded(route(&ctx, event("/fleet", &[])).await);

    assert_eq!(result.internal_event.raw_path, "/fleet");
    assert_eq!(
        result.internal_event.header("x-middleware-response-x-fleet-page"),
        Some("1")
    );
    assert_eq!(result.resolved_routes.len(), 1);
    assert_eq!(result.resolved_routes[0].route, "/fleet");
    assert!(result.is_isr);
    assert_eq!(result.initial_url, format!("https://{HOST}/fleet"));
}

#[tokio::test]
async fn test_inbound_internal_headers_are_stripped() {
    let (_dir, ctx) = context();
    let result = forwarded(
        route(
            &ctx,
            event(
                "/fleet",
                &[("x-opennext-isr", "1"), ("x-middleware-response-set-cookie", "a=b")],
            ),
        )
        .await,
    );
    assert!(result.internal_event.header("x-opennext-isr").is_none());
    assert!(result
        .internal_event
        .header("x-middleware-response-set-cookie")
        .is_none());
}

#[tokio::test]
async fn test_trailing_slash_redirect_keeps_query() {
    let (_dir, ctx) = context();
    let location = redirect_location(route(&ctx, event("/fleet/?sort=asc", &[])).await, 308);
    assert_eq!(location, format!("https://{HOST}/fleet?sort=asc"));
}

#[tokio::test]
async fn test_repeated_slashes_redirect() {
    let (_dir, ctx) = context();
    let location = redirect_location(route(&ctx, event("//fleet", &[])).await, 308);
    assert_eq!(location, format!("https://{HOST}/fleet"));
}

#[tokio::test]
async fn test_config_redirect() {
    let (_dir, ctx) = context();
    let location = redirect_location(route(&ctx, event("/old-fleet", &[])).await, 308);
    assert_eq!(location, format!("https://{HOST}/fleet"));
}

#[tokio::test]
async fn test_locale_redirect_from_root() {
    let mut routes = common::routes_manifest();
    routes["i18n"] = serde_json::json!({"locales": ["en", "fr"], "defaultLocale": "en"});
    let (_dir, ctx) = context_for(routes);

    let location = redirect_location(route(&ctx, event("/", &[("accept-language", "fr-FR,fr;q=0.9")])).await, 307);
    assert_eq!(location, format!("https://{HOST}/fr"));

    // default locale stays put
    let result = forwarded(route(&ctx, event("/", &[("accept-language", "en-US")])).await);
    assert_eq!(result.internal_event.raw_path, "/");
    assert_eq!(result.locale.as_deref(), Some("en"));
}

#[tokio::test]
async fn test_after_files_rewrite_resolves_dynamic_route() {
    let (_dir, ctx) = context();
    let result = forwarded(route(&ctx, event("/trucks/7", &[])).await);

    assert_eq!(result.internal_event.raw_path, "/vehicles/7");
    assert!(!result.is_external_rewrite);
    assert!(result
        .resolved_routes
        .iter()
        .any(|r| r.route == "/vehicles/[id]"));
    assert_eq!(result.initial_url, format!("https://{HOST}/trucks/7"));
}

#[tokio::test]
async fn test_fallback_false_serves_404_for_unknown_params() {
    let (_dir, ctx) = context();

    let missing = forwarded(route(&ctx, event("/depots/south", &[])).await);
    assert_eq!(missing.internal_event.raw_path, "/404");
    assert_eq!(missing.internal_event.header("x-invoke-status"), Some("404"));
    assert!(!missing.is_isr);

    let prerendered = forwarded(route(&ctx, event("/depots/north", &[])).await);
    assert_eq!(prerendered.internal_event.raw_path, "/depots/north");
    assert!(prerendered.is_isr);
}

#[tokio::test]
async fn test_unmatched_path_forwards_to_404_uncached() {
    let (_dir, ctx) = context();
    let result = forwarded(route(&ctx, event("/nowhere?x=1", &[])).await);

    assert_eq!(result.internal_event.raw_path, "/404");
    assert_eq!(result.internal_event.url, format!("https://{HOST}/404"));
    assert_eq!(
        result
            .internal_event
            .header("x-middleware-response-cache-control"),
        Some("private, no-cache, no-store, max-age=0, must-revalidate")
    );
}

#[tokio::test]
async fn test_data_request_for_other_build_is_404_json() {
    let (_dir, ctx) = context();
    match route(&ctx, event("/_next/data/old-build/fleet.json", &[])).await {
        Routed::Respond(result) => {
            assert_eq!(result.status_code, 404);
            assert_eq!(result.header("content-type"), Some("application/json"));
            assert_eq!(&result.body[..], b"{}");
        }
        Routed::Forward(_) => panic!("expected 404 response"),
    }
}

#[tokio::test]
async fn test_data_request_for_current_build_maps_to_page() {
    let (_dir, ctx) = context();
    let result = forwarded(
        route(
            &ctx,
            event(&format!("/_next/data/{}/fleet.json", common::BUILD_ID), &[]),
        )
        .await,
    );
    assert_eq!(result.internal_event.raw_path, "/fleet");
    assert!(result.internal_event.query.contains_key("__nextDataReq"));
}

/// Lets the request through and sets `x-fleet-page`, which `/fleet` also gets from config.
#[derive(Debug)]
struct FleetPageMiddleware;

#[async_trait]
impl Middleware for FleetPageMiddleware {
    async fn invoke(&self, _input: MiddlewareInput) -> Result<MiddlewareResponse, MiddlewareError> {
        Ok(MiddlewareResponse {
            status: 200,
            headers: vec![
                ("x-middleware-next".to_string(), "1".to_string()),
                ("x-fleet-page".to_string(), "middleware".to_string()),
            ],
            body: Default::default(),
        })
    }
}

fn context_with_middleware(override_next_config: bool) -> (tempfile::TempDir, RoutingContext) {
    let dir = tempfile::tempdir().unwrap();
    common::write_build(dir.path(), &common::routes_manifest(), &common::prerender_manifest());
    common::write_middleware_manifest(dir.path(), "^/fleet(?:/)?$");
    let build = Arc::new(BuildOutput::load(dir.path()).unwrap());
    let handler: Arc<dyn Middleware> = Arc::new(FleetPageMiddleware);
    let registry = MiddlewareRegistry::new(&build.middleware, &HashMap::new(), Some(handler)).unwrap();
    let options = RoutingOptions {
        middleware_headers_override_next_config: override_next_config,
        ..Default::default()
    };
    let ctx = RoutingContext::new(build, registry, options, None, None).unwrap();
    (dir, ctx)
}

#[tokio::test]
async fn test_config_headers_win_over_middleware_by_default() {
    let (_dir, ctx) = context_with_middleware(false);
    let result = forwarded(route(&ctx, event("/fleet", &[])).await);
    assert_eq!(
        result.internal_event.header("x-middleware-response-x-fleet-page"),
        Some("1")
    );
}

#[tokio::test]
async fn test_middleware_headers_can_override_config_headers() {
    let (_dir, ctx) = context_with_middleware(true);
    let result = forwarded(route(&ctx, event("/fleet", &[])).await);
    assert_eq!(
        result.internal_event.header("x-middleware-response-x-fleet-page"),
        Some("middleware")
    );
}
