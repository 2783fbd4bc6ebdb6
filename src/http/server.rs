//! HTTP server setup and the edge request handler.
//!
//! # Responsibilities
//! - Create the axum Router and wire tower layers (trace, request id, timeout, body limit)
//! - Convert requests into internal events and run them through the edge
//! - Dispatch forwarded requests to origins
//! - Hand each request's background work to the tracker once the response is ready

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::EdgeConfig;
use crate::edge::Edge;
use crate::http::converter::{to_internal_event, to_response, ConvertError};
use crate::http::event::Routed;
use crate::lifecycle::{BackgroundTracker, RequestTasks, Shutdown};
use crate::observability::metrics;
use crate::origin::{ForwardContext, OriginDispatcher};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Swapped whole on config or build reload.
    pub edge: Arc<ArcSwap<Edge>>,
    pub origins: Arc<OriginDispatcher>,
    pub tracker: BackgroundTracker,
    pub max_body_size: usize,
}

pub struct EdgeServer {
    router: Router,
}

impl EdgeServer {
    pub fn new(config: &EdgeConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    #[allow(deprecated)]
    fn build_router(config: &EdgeConfig, state: AppState) -> Router {
        let max_body = config.listener.max_body_size;
        Router::new()
            .route("/{*path}", any(edge_handler))
            .route("/", any(edge_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .map_response(|res: Response<_>| res.map(Body::new))
                    .layer(RequestBodyLimitLayer::new(max_body)),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then stop accepting and finish in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "edge server starting");

        let mut signal = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
            })
            .await?;

        tracing::info!("edge server stopped");
        Ok(())
    }
}

async fn edge_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = request.method().to_string();

    let event = match to_internal_event(request, remote, state.max_body_size).await {
        Ok(event) => event,
        Err(e) => {
            let status = match &e {
                ConvertError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ConvertError::MissingHost => StatusCode::BAD_REQUEST,
            };
            tracing::debug!(request_id = %request_id, error = %e, "rejecting request");
            metrics::record_request(&method, status.as_u16(), "edge", start);
            let mut response = Response::new(Body::from(e.to_string()));
            *response.status_mut() = status;
            return response;
        }
    };
    tracing::debug!(request_id = %request_id, method = %method, url = %event.url, "edge request");

    let tasks = RequestTasks::new();
    let edge = state.edge.load_full();
    let (response, origin) = match edge.handle(event, state.origins.external(), &tasks).await {
        Routed::Respond(result) => (to_response(result), "edge".to_string()),
        Routed::Forward(routing) => {
            let ctx = ForwardContext {
                request_id: request_id.clone(),
            };
            state.origins.dispatch(*routing, &ctx).await
        }
    };
    state.tracker.drain_request(tasks);

    metrics::record_request(&method, response.status().as_u16(), &origin, start);
    response
}
