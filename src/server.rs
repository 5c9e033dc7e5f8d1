use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{secret_matches, Config};
use crate::platform::telegram::{Update, SECRET_HEADER};
use crate::router::{CommandRouter, WebhookOutcome};
use crate::trigger;

// ── Shared state ───────────────────────────────────────────────────────────────

/// Read-only for the lifetime of the process; per-request clients are built
/// from it inside each handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/telegram", post(telegram_webhook))
        .route("/api/scan", post(scan_trigger))
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn telegram_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("telegram_webhook", %request_id);

    async move {
        let config = state.config.as_ref();

        let Some(bot_token) = config.telegram.bot_token() else {
            error!("TELEGRAM_BOT_TOKEN is not configured");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": "TELEGRAM_BOT_TOKEN is not configured" })),
            )
                .into_response();
        };

        if let Some(secret) = config.telegram.webhook_secret() {
            let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
            if !secret_matches(&secret, presented) {
                warn!("Rejected webhook delivery with bad secret header");
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "ok": false, "error": "unauthorized" })),
                )
                    .into_response();
            }
        }

        // Malformed deliveries are acknowledged too; a non-200 would only be retried.
        let update: Update = match serde_json::from_slice(&body) {
            Ok(update) => update,
            Err(e) => {
                warn!("Ignoring unparseable update: {}", e);
                return (StatusCode::OK, Json(WebhookOutcome::ignored())).into_response();
            }
        };
        debug!("Received update {:?}", update.update_id);

        let router = CommandRouter::new(config, state.http.clone(), bot_token, request_id);
        let outcome = router.route(update).await;
        (StatusCode::OK, Json(outcome)).into_response()
    }
    .instrument(span)
    .await
}

async fn scan_trigger(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("scan_trigger", %request_id);

    async move {
        match trigger::handle(&state.config, state.http.clone(), &headers, &body, request_id).await {
            Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}

// ── Tests ──────────────────────────────────────────────────────────────────────
