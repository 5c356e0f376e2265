//! Request handlers. Each one forwards to a single [`StorageEngine`]
//! operation and renders its result as JSON or raw bytes.
//!
//! [`StorageEngine`]: fathom_engine::StorageEngine

use std::collections::BTreeMap;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use bytes::Bytes;
use fathom_engine::DomainHealth;
use fathom_repair::{RebalanceStatus, RepairStats};
use fathom_types::{DomainName, NodeName, TenantId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// Presigned URL lifetime when the request names none.
const DEFAULT_URL_TTL_SECS: u64 = 3600;

/// Longest presigned URL lifetime accepted.
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Deserialize)]
pub(crate) struct TenantQuery {
    #[serde(default)]
    tenant: u64,
}

#[derive(Deserialize)]
pub(crate) struct PathQuery {
    path: String,
}

#[derive(Deserialize)]
pub(crate) struct UrlQuery {
    path: String,
    ttl_secs: Option<u64>,
}

#[derive(Deserialize)]
pub(crate) struct RebalanceQuery {
    domain: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct StoreResponse {
    pub path: String,
}

#[derive(Serialize)]
pub(crate) struct UrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

#[derive(Serialize)]
pub(crate) struct LocationsResponse {
    pub hash: String,
    pub tenant: u64,
    pub nodes: Vec<NodeName>,
}

#[derive(Serialize)]
pub(crate) struct RebalanceResponse {
    pub task_id: String,
}

#[derive(Serialize)]
pub(crate) struct DegradedResponse {
    pub pending: usize,
}

#[derive(Serialize)]
pub(crate) struct NodeResponse {
    pub node: NodeName,
    pub enabled: bool,
    pub changed: bool,
}

// -----------------------------------------------------------------------
// Data plane
// -----------------------------------------------------------------------

/// `PUT /chunks/{hash}?tenant=N`
pub(crate) async fn store_chunk(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<TenantQuery>,
    body: Bytes,
) -> Result<Json<StoreResponse>, ApiError> {
    let size = body.len();
    let path = state
        .engine
        .store(body, &hash, TenantId(query.tenant))
        .await?;
    info!(%path, size, "chunk stored");
    Ok(Json(StoreResponse {
        path: path.to_string(),
    }))
}

/// `GET /chunks/{hash}?path=P`
pub(crate) async fn fetch_chunk(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.engine.fetch_bytes(&query.path, &hash).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}

/// `GET /chunks/{hash}/url?path=P&ttl_secs=N`
pub(crate) async fn presigned_url(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<UrlResponse>, ApiError> {
    let ttl = query.ttl_secs.unwrap_or(DEFAULT_URL_TTL_SECS);
    if ttl == 0 || ttl > MAX_URL_TTL_SECS {
        return Err(ApiError::InvalidRequest {
            message: format!("ttl_secs must be between 1 and {MAX_URL_TTL_SECS}"),
        });
    }
    let url = state
        .engine
        .fetch_presigned_url(&query.path, &hash, Duration::from_secs(ttl))
        .await?;
    Ok(Json(UrlResponse {
        url,
        expires_in_secs: ttl,
    }))
}

/// `DELETE /chunks` with a `{hash: path}` body.
pub(crate) async fn delete_chunks(
    State(state): State<AppState>,
    Json(entries): Json<BTreeMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete(&entries).await?;
    info!(count = entries.len(), "chunks deleted");
    Ok(StatusCode::NO_CONTENT)
}

// -----------------------------------------------------------------------
// Admin
// -----------------------------------------------------------------------

pub(crate) async fn cluster_health(
    State(state): State<AppState>,
) -> Json<BTreeMap<NodeName, bool>> {
    Json(state.engine.cluster_health())
}

pub(crate) async fn domain_health(
    State(state): State<AppState>,
) -> Json<BTreeMap<DomainName, DomainHealth>> {
    Json(state.engine.domain_health())
}

/// `GET /admin/chunks/{hash}/locations?tenant=N`
pub(crate) async fn chunk_locations(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<LocationsResponse>, ApiError> {
    let nodes = state
        .engine
        .chunk_locations(&hash, TenantId(query.tenant))
        .await?;
    Ok(Json(LocationsResponse {
        hash,
        tenant: query.tenant,
        nodes,
    }))
}

/// `POST /admin/rebalance?domain=D`
pub(crate) async fn trigger_rebalance(
    State(state): State<AppState>,
    Query(query): Query<RebalanceQuery>,
) -> Result<(StatusCode, Json<RebalanceResponse>), ApiError> {
    let domain = query.domain.as_deref().map(DomainName::from);
    let task_id = state.engine.trigger_rebalance(domain).await?;
    Ok((StatusCode::ACCEPTED, Json(RebalanceResponse { task_id })))
}

pub(crate) async fn rebalance_status(State(state): State<AppState>) -> Json<RebalanceStatus> {
    Json(state.engine.rebalance_status())
}

pub(crate) async fn trigger_repair(
    State(state): State<AppState>,
) -> Result<Json<RepairStats>, ApiError> {
    Ok(Json(state.engine.trigger_repair().await?))
}

pub(crate) async fn degraded_pending(
    State(state): State<AppState>,
) -> Result<Json<DegradedResponse>, ApiError> {
    let pending = state.engine.degraded_pending()?;
    Ok(Json(DegradedResponse { pending }))
}

pub(crate) async fn enable_node(
    state: State<AppState>,
    node: Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    set_node_enabled(state, node, true)
}

pub(crate) async fn disable_node(
    state: State<AppState>,
    node: Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    set_node_enabled(state, node, false)
}

fn set_node_enabled(
    State(state): State<AppState>,
    Path(node): Path<String>,
    enabled: bool,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = NodeName::from(node.as_str());
    let changed = state.engine.set_node_enabled(&node, enabled)?;
    Ok(Json(NodeResponse {
        node,
        enabled,
        changed,
    }))
}
