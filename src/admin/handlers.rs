use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::revalidation::QueueSnapshot;

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn disabled(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{what} is not enabled"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub build_id: String,
    pub background_tasks: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendStatus {
    pub name: String,
    pub address: String,
    pub healthy: bool,
    pub active_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct TagsQuery {
    /// Comma-separated tag list.
    pub tags: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevalidateRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevalidateResponse {
    pub tags: Vec<String>,
    pub revalidated_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeStatus {
    pub pending: usize,
    pub next_alarm_ms: Option<i64>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let edge = state.edge.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_id: edge.routing.build.build_id.clone(),
        background_tasks: state.tracker.active_count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .pool
        .all_backends()
        .into_iter()
        .map(|b| BackendStatus {
            name: b.name.clone(),
            address: b.addr.to_string(),
            healthy: b.is_healthy(),
            active_connections: b.active_connections(),
        })
        .collect();
    Json(statuses)
}

pub async fn get_queues(State(state): State<AdminState>) -> Result<Json<Vec<QueueSnapshot>>, ApiError> {
    let queues = state.queues.as_ref().ok_or_else(|| disabled("revalidation queue"))?;
    let mut snapshots = queues
        .instances()
        .into_iter()
        .map(|(_, actor)| actor.snapshot())
        .collect::<Result<Vec<_>, _>>()
        .map_err(internal)?;
    snapshots.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(snapshots))
}

pub async fn get_tags(
    State(state): State<AdminState>,
    Query(query): Query<TagsQuery>,
) -> Result<Json<BTreeMap<String, i64>>, ApiError> {
    let tags = state.tags.as_ref().ok_or_else(|| disabled("tag cache"))?;
    let list = split_tags(&query.tags);
    tags.get_revalidation_times(&list).map(Json).map_err(internal)
}

pub async fn post_revalidate(
    State(state): State<AdminState>,
    Json(body): Json<RevalidateRequest>,
) -> Result<Json<RevalidateResponse>, ApiError> {
    let tags = state.tags.as_ref().ok_or_else(|| disabled("tag cache"))?;
    let list: Vec<String> = body
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if list.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no tags given".to_string()));
    }
    let revalidated_at = tags.revalidate_tags(&list).map_err(internal)?;
    tracing::info!(tags = ?list, revalidated_at, "tags revalidated via admin api");
    Ok(Json(RevalidateResponse {
        tags: list,
        revalidated_at,
    }))
}

pub async fn get_purge(State(state): State<AdminState>) -> Result<Json<PurgeStatus>, ApiError> {
    let purge = state.purge.as_ref().ok_or_else(|| disabled("cache purge"))?;
    let actor = purge.get(crate::purge::PURGE_ACTOR_ID).map_err(internal)?;
    Ok(Json(PurgeStatus {
        pending: actor.pending().map_err(internal)?,
        next_alarm_ms: actor.next_alarm().map_err(internal)?,
    }))
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
