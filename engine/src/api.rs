//! HTTP surface of the decision engine.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::ScheduleError;
use crate::registry::SchedulerRegistry;

type AppState = Arc<SchedulerRegistry>;

pub fn router(registry: AppState) -> Router {
    Router::new()
        .route("/schedule", get(get_default_schedule))
        .route("/schedule/{namespace}/{name}", get(get_schedule))
        .route("/setschedule", post(set_default_manual_schedule))
        .route("/schedule/{namespace}/{name}/manual", post(set_manual_schedule))
        .route("/config/{namespace}/{name}", put(configure_schedule))
        .route("/healthz", get(health))
        .with_state(registry)
}

pub async fn serve(registry: AppState, port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "decision engine API listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

fn schedule_response(result: Result<Value, ScheduleError>) -> Response {
    match result {
        Ok(schedule) => Json(schedule).into_response(),
        Err(ScheduleError::Pending { .. }) => {
            (StatusCode::ACCEPTED, Json(json!({"status": "pending"}))).into_response()
        }
        Err(e @ ScheduleError::Unknown { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn get_default_schedule(State(registry): State<AppState>) -> Response {
    registry.ensure_default();
    let (namespace, name) = registry.default_key();
    schedule_response(registry.get_schedule(&namespace, &name))
}

async fn get_schedule(
    State(registry): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    schedule_response(registry.get_schedule(&namespace, &name))
}

fn reject_non_object(payload: &Value) -> Option<Response> {
    if payload.is_object() {
        return None;
    }
    Some(
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "payload must be an object"})),
        )
            .into_response(),
    )
}

async fn set_default_manual_schedule(
    State(registry): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    if let Some(rejection) = reject_non_object(&payload) {
        return rejection;
    }
    let (namespace, name) = registry.default_key();
    registry.manual_override(&namespace, &name, payload).await;
    (StatusCode::ACCEPTED, Json(json!({"status": "schedule set"}))).into_response()
}

async fn set_manual_schedule(
    State(registry): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Response {
    if let Some(rejection) = reject_non_object(&payload) {
        return rejection;
    }
    registry.manual_override(&namespace, &name, payload).await;
    (StatusCode::ACCEPTED, Json(json!({"status": "schedule set"}))).into_response()
}

async fn configure_schedule(
    State(registry): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Response {
    if let Some(rejection) = reject_non_object(&payload) {
        return rejection;
    }
    registry.configure(&namespace, &name, &payload).await;
    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response()
}

async fn health() -> Response {
    Json(json!({"status": "ready"})).into_response()
}
