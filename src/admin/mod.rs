//! Admin API: inspection of origins and actors, on-demand tag revalidation.
//!
//! All routes require `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::actor::Namespace;
use crate::edge::Edge;
use crate::lifecycle::BackgroundTracker;
use crate::origin::OriginPool;
use crate::purge::PurgeActor;
use crate::revalidation::QueueActor;
use crate::tag_cache::ShardedTagCache;

use self::auth::admin_auth;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub edge: Arc<ArcSwap<Edge>>,
    pub pool: Arc<OriginPool>,
    pub queues: Option<Arc<Namespace<QueueActor>>>,
    pub tags: Option<Arc<ShardedTagCache>>,
    pub purge: Option<Arc<Namespace<PurgeActor>>>,
    pub tracker: BackgroundTracker,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/queues", get(get_queues))
        .route("/admin/tags", get(get_tags))
        .route("/admin/purge", get(get_purge))
        .route("/admin/revalidate", post(post_revalidate))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
