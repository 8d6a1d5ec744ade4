//! HTTP/JSON front end.
//!
//! A thin adaptor over the storage contract: four POST routes on port
//! 10000 by default, plus a liveness probe. Response bodies follow the
//! fixed wire format of the API (`{ "key" : "K", "value" : "V" }` objects,
//! `[ ... ]` key lists with `, ` separators), so they are formatted by hand
//! rather than through a serializer, with serde_json handling only the
//! string escaping.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::storage::Storage;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

/// Builds the API router.
pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/v1/get", post(get_key))
        .route("/v1/set", post(set_key))
        .route("/v1/delete", post(delete_key))
        .route("/v1/query", post(query_prefix))
        .with_state(state)
}

/// Runs the HTTP server until SIGINT or SIGTERM.
pub async fn serve(db: Arc<Database>, port: u16) -> Result<()> {
    let app = router(AppState { db });
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Completes when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[derive(Deserialize)]
struct KeyRequest {
    key: String,
}

#[derive(Deserialize)]
struct SetRequest {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct QueryRequest {
    prefix: String,
}

async fn health() -> impl IntoResponse {
    json_response(r#"{ "status" : "ok" }"#.to_owned())
}

async fn get_key(State(state): State<AppState>, Json(req): Json<KeyRequest>) -> Response {
    match state.db.get(req.key.as_bytes()).await {
        Ok(Some(value)) => {
            let value = String::from_utf8_lossy(&value);
            json_response(key_value_body(&req.key, &value))
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(e),
    }
}

async fn set_key(State(state): State<AppState>, Json(req): Json<SetRequest>) -> Response {
    match state.db.set(req.key.as_bytes(), req.value.into_bytes()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_key(State(state): State<AppState>, Json(req): Json<KeyRequest>) -> Response {
    // Delete is idempotent: a missing key still succeeds.
    match state.db.del(req.key.as_bytes()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn query_prefix(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Response {
    match state.db.query(req.prefix.as_bytes()).await {
        Ok(keys) => {
            let items: Vec<String> = keys
                .iter()
                .map(|key| {
                    format!(
                        "{{ \"key\" : {} }}",
                        json_string(&String::from_utf8_lossy(key))
                    )
                })
                .collect();
            json_response(format!("[ {} ]", items.join(", ")))
        }
        Err(e) => error_response(e),
    }
}

fn key_value_body(key: &str, value: &str) -> String {
    format!(
        "{{ \"key\" : {}, \"value\" : {} }}",
        json_string(key),
        json_string(value)
    )
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_owned()).to_string()
}

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_response(error: Error) -> Response {
    tracing::error!(%error, "request failed");
    match error {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST.into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
