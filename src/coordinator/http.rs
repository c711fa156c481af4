//! Coordinator HTTP API
//!
//! JSON request/response bodies; unknown fields are ignored; failures are
//! `{error: string}` with the status codes of the error taxonomy.

use super::{Coordinator, RouteSource};
use crate::Error;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the coordinator router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/nodes/register", post(register_node))
        .route("/nodes/unregister", post(unregister_node))
        .route("/route", get(route_user))
        .route("/vnodes", get(vnode_status))
        .with_state(coordinator)
        .layer(cors)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(rename = "instanceId")]
    instance_id: Option<String>,
    #[serde(default = "default_weight")]
    weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "assignedVnodes")]
    assigned_vnodes: Vec<u32>,
}

async fn register_node(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let Some(instance_id) = request.instance_id.filter(|id| !id.is_empty()) else {
        return bad_request("instanceId is required");
    };
    if request.weight == 0 {
        return bad_request("weight must be positive");
    }

    match coordinator.register(&instance_id, request.weight).await {
        Ok(assigned_vnodes) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                instance_id,
                assigned_vnodes,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct UnregisterRequest {
    #[serde(rename = "instanceId")]
    instance_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnregisterResponse {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "removedVnodes")]
    removed_vnodes: Vec<u32>,
}

async fn unregister_node(
    State(coordinator): State<Arc<Coordinator>>,
    Json(request): Json<UnregisterRequest>,
) -> Response {
    let Some(instance_id) = request.instance_id.filter(|id| !id.is_empty()) else {
        return bad_request("instanceId is required");
    };

    match coordinator.unregister(&instance_id).await {
        Ok(removed_vnodes) => Json(UnregisterResponse {
            instance_id,
            removed_vnodes,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct RouteQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RouteResponse {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vnode: Option<u32>,
    instance: String,
    source: RouteSource,
}

async fn route_user(
    State(coordinator): State<Arc<Coordinator>>,
    Query(query): Query<RouteQuery>,
) -> Response {
    let Some(user_id) = query.user_id.filter(|id| !id.is_empty()) else {
        return bad_request("userId is required");
    };

    match coordinator.route(&user_id).await {
        Ok(decision) => Json(RouteResponse {
            user_id,
            vnode: decision.vnode,
            instance: decision.instance,
            source: decision.source,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct VnodeStatusResponse {
    owners: HashMap<u32, String>,
    loads: HashMap<u32, u64>,
}

async fn vnode_status(State(coordinator): State<Arc<Coordinator>>) -> Response {
    match coordinator.vnode_status().await {
        Ok((owners, loads)) => Json(VnodeStatusResponse { owners, loads }).into_response(),
        Err(err) => error_response(err),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn error_response(err: Error) -> Response {
    let status = match err {
        Error::RingFull => StatusCode::CONFLICT,
        Error::InstanceNotFound(_) | Error::OwnerNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
