//! Read-only status surface: `/health` and `/status`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mjf_storage::{OfferStore, StoreCounts};
use mjf_sync::{StatusHandle, StatusSnapshot};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "mjf-web";

#[derive(Clone)]
pub struct AppState {
    pub store: OfferStore,
    pub status: StatusHandle,
}

impl AppState {
    pub fn new(store: OfferStore, status: StatusHandle) -> Self {
        Self { store, status }
    }
}

#[derive(Debug, Serialize)]
struct StatusBody {
    #[serde(flatten)]
    scheduler: StatusSnapshot,
    counts: Option<StoreCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store_error: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// Always 200: a failing pipeline or store shows up in the body.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    let scheduler = state.status.snapshot().await;
    let (counts, store_error) = match state.store.counts().await {
        Ok(counts) => (Some(counts), None),
        Err(err) => (None, Some(err.to_string())),
    };
    Json(StatusBody {
        scheduler,
        counts,
        store_error,
    })
}
