//! Forwarding routed requests to render origins.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::{EdgeConfig, HealthCheckConfig, RetryConfig};
use crate::http::converter::{apply_headers, to_response};
use crate::http::event::{InternalEvent, MultiValue, RoutingResult};
use crate::observability::metrics;
use crate::origin::backend::BackendGuard;
use crate::origin::external::ExternalProxy;
use crate::origin::pool::OriginPool;
use crate::origin::resolver::OriginResolver;
use crate::origin::OriginError;
use crate::resilience::{calculate_backoff, is_idempotent};
use crate::routing::engine::MIDDLEWARE_HEADER_PREFIX;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-length",
];

/// Per-request facts the dispatcher forwards to the origin.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub request_id: String,
}

pub struct OriginDispatcher {
    pool: Arc<OriginPool>,
    resolver: OriginResolver,
    client: Client<HttpConnector, Body>,
    external: ExternalProxy,
    retry: RetryConfig,
    health: HealthCheckConfig,
}

impl OriginDispatcher {
    pub fn new(config: &EdgeConfig, pool: Arc<OriginPool>) -> Result<Self, OriginError> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        Ok(Self {
            pool,
            resolver: OriginResolver::new(&config.origins),
            client: Client::builder(TokioExecutor::new()).build(connector),
            external: ExternalProxy::new(Duration::from_secs(config.timeouts.request_secs))?,
            retry: config.retries.clone(),
            health: config.health_check.clone(),
        })
    }

    pub fn pool(&self) -> &Arc<OriginPool> {
        &self.pool
    }

    pub fn external(&self) -> &ExternalProxy {
        &self.external
    }

    /// Render `routing` on an origin. Returns the response and the label of
    /// whoever produced it.
    pub async fn dispatch(&self, routing: RoutingResult, ctx: &ForwardContext) -> (Response<Body>, String) {
        let overlay = middleware_headers(&routing.internal_event);

        if routing.is_external_rewrite {
            let result = self.external.proxy(&routing.internal_event).await;
            let mut response = to_response(result);
            apply_headers(response.headers_mut(), &overlay);
            return (response, "external".to_string());
        }

        let host = routing.internal_event.host().map(str::to_string);
        let group = self
            .resolver
            .resolve(host.as_deref(), &routing.internal_event.raw_path)
            .to_string();

        match self.forward(&routing, &group, ctx).await {
            Ok((mut response, backend)) => {
                apply_headers(response.headers_mut(), &overlay);
                (response, backend)
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, group = %group, error = %e, "origin dispatch failed");
                let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::BAD_GATEWAY);
                let mut response = Response::new(Body::from(e.to_string()));
                *response.status_mut() = status;
                (response, "none".to_string())
            }
        }
    }

    async fn forward(
        &self,
        routing: &RoutingResult,
        group: &str,
        ctx: &ForwardContext,
    ) -> Result<(Response<Body>, String), OriginError> {
        let event = &routing.internal_event;
        let method = Method::from_bytes(event.method.as_bytes())
            .map_err(|_| OriginError::InvalidRequest(format!("bad method {}", event.method)))?;
        let max_attempts = if self.retry.enabled && is_idempotent(&method) {
            self.retry.max_attempts.max(1)
        } else {
            1
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let backend = self.pool.acquire(group)?;
            let request = build_request(&method, routing, &backend, ctx)?;
            let started = Instant::now();

            match self.client.request(request).await {
                Ok(response) => {
                    let status = response.status();
                    metrics::record_origin_attempt(&backend.name, status.as_u16(), started);
                    let gateway_failure = matches!(
                        status,
                        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
                    );
                    if gateway_failure {
                        backend.mark_failure(self.health.unhealthy_threshold as usize);
                    } else {
                        backend.mark_success(self.health.healthy_threshold as usize);
                    }

                    if gateway_failure && attempts < max_attempts {
                        let delay = calculate_backoff(attempts, self.retry.base_delay_ms, self.retry.max_delay_ms);
                        tracing::info!(request_id = %ctx.request_id, backend = %backend.name, attempt = attempts, delay = ?delay, status = %status, "retrying origin request");
                        drop(backend);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let name = backend.name.clone();
                    let (parts, body) = response.into_parts();
                    return Ok((Response::from_parts(parts, Body::new(body)), name));
                }
                Err(e) => {
                    metrics::record_origin_attempt(&backend.name, 502, started);
                    backend.mark_failure(self.health.unhealthy_threshold as usize);
                    tracing::error!(request_id = %ctx.request_id, backend = %backend.name, attempt = attempts, error = %e, "origin request failed");
                    if attempts < max_attempts {
                        let delay = calculate_backoff(attempts, self.retry.base_delay_ms, self.retry.max_delay_ms);
                        drop(backend);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

/// The `x-middleware-response-*` headers routing left on the event, unprefixed.
fn middleware_headers(event: &InternalEvent) -> BTreeMap<String, MultiValue> {
    event
        .headers
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(MIDDLEWARE_HEADER_PREFIX)
                .filter(|name| !HOP_BY_HOP.contains(name))
                .map(|name| (name.to_string(), MultiValue::from(v.as_str())))
        })
        .collect()
}

fn build_request(
    method: &Method,
    routing: &RoutingResult,
    backend: &BackendGuard,
    ctx: &ForwardContext,
) -> Result<Request<Body>, OriginError> {
    let event = &routing.internal_event;
    let parsed = url::Url::parse(&event.url)
        .map_err(|e| OriginError::InvalidRequest(format!("{}: {e}", event.url)))?;
    let search = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
    let uri = format!("http://{}{}{}", backend.addr, parsed.path(), search);

    let mut builder = Request::builder().method(method.clone()).uri(uri);
    let Some(headers) = builder.headers_mut() else {
        return Err(OriginError::InvalidRequest("invalid request parts".to_string()));
    };
    for (name, value) in &event.headers {
        if HOP_BY_HOP.contains(&name.as_str()) || name.starts_with(MIDDLEWARE_HEADER_PREFIX) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(n, v);
        }
    }

    let forwarded_for = match event.header("x-forwarded-for") {
        Some(chain) if !event.remote_address.is_empty() => format!("{chain}, {}", event.remote_address),
        Some(chain) => chain.to_string(),
        None => event.remote_address.clone(),
    };
    let mut extra = vec![
        ("x-forwarded-for", forwarded_for),
        ("x-forwarded-proto", parsed.scheme().to_string()),
        ("x-request-id", ctx.request_id.clone()),
        ("x-opennext-initial-url", routing.initial_url.clone()),
    ];
    if let Some(host) = event.host() {
        extra.push(("x-forwarded-host", host.to_string()));
    }
    if let Some(locale) = &routing.locale {
        extra.push(("x-opennext-locale", locale.clone()));
    }
    if routing.is_isr {
        extra.push(("x-opennext-isr", "1".to_string()));
    }
    if let Ok(routes) = serde_json::to_string(&routing.resolved_routes) {
        extra.push(("x-opennext-resolved-routes", routes));
    }
    for (name, value) in extra {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }

    let body = event.body.clone().map(Body::from).unwrap_or_else(Body::empty);
    builder
        .body(body)
        .map_err(|e| OriginError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::http::event::{ResolvedRoute, RouteType};

    fn routing(url: &str) -> RoutingResult {
        let mut event = InternalEvent {
            method: "GET".into(),
            raw_path: "/blog/a".into(),
            url: url.into(),
            remote_address: "10.1.1.1".into(),
            ..Default::default()
        };
        event.headers.insert("host".into(), "shop.example.com".into());
        event.headers.insert("x-forwarded-for".into(), "1.2.3.4".into());
        event
            .headers
            .insert(format!("{MIDDLEWARE_HEADER_PREFIX}x-powered-by"), "edge".into());
        RoutingResult {
            internal_event: event,
            is_external_rewrite: false,
            is_isr: true,
            resolved_routes: vec![ResolvedRoute {
                route: "/blog/[slug]".into(),
                kind: RouteType::Page,
            }],
            initial_url: url.into(),
            locale: Some("en".into()),
        }
    }

    #[test]
    fn test_build_request_headers() {
        let pool = OriginPool::new(
            &[BackendConfig {
                name: "web-1".into(),
                group: "default".into(),
                address: "127.0.0.1:3000".into(),
                max_connections: 10,
            }],
            "round_robin",
        );
        let backend = pool.acquire("default").unwrap();
        let ctx = ForwardContext {
            request_id: "req-1".into(),
        };
        let request = build_request(
            &Method::GET,
            &routing("https://shop.example.com/blog/a?x=1"),
            &backend,
            &ctx,
        )
        .unwrap();

        assert_eq!(request.uri().to_string(), "http://127.0.0.1:3000/blog/a?x=1");
        let h = request.headers();
        assert_eq!(h["host"], "shop.example.com");
        assert_eq!(h["x-forwarded-for"], "1.2.3.4, 10.1.1.1");
        assert_eq!(h["x-forwarded-proto"], "https");
        assert_eq!(h["x-forwarded-host"], "shop.example.com");
        assert_eq!(h["x-request-id"], "req-1");
        assert_eq!(h["x-opennext-locale"], "en");
        assert_eq!(h["x-opennext-isr"], "1");
        assert_eq!(
            h["x-opennext-resolved-routes"],
            r#"[{"route":"/blog/[slug]","type":"page"}]"#
        );
        assert!(h.get("x-middleware-response-x-powered-by").is_none());
    }

    #[test]
    fn test_middleware_headers_are_unprefixed() {
        let headers = middleware_headers(&routing("http://localhost/").internal_event);
        assert_eq!(headers.get("x-powered-by"), Some(&MultiValue::from("edge")));
        assert_eq!(headers.len(), 1);
    }
}
