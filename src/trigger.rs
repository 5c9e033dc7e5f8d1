//! Direct scan trigger for non-chat callers.
//!
//! Unlike the Telegram webhook, failures here are real HTTP errors: the caller
//! is synchronous and does not retry on its own.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{secret_matches, Config};
use crate::github::{DispatchEvent, GithubClient};
use crate::products::normalize_products;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                ok: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TriggerAccepted {
    pub ok: bool,
    pub queued: bool,
    pub product_count: usize,
}

/// Exact match of `Authorization: Bearer <secret>`. No secret configured is a
/// server error, never an open door.
fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), ApiError> {
    let Some(secret) = secret else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SCAN_TRIGGER_SECRET is not configured",
        ));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if !secret_matches(secret, presented) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized"));
    }
    Ok(())
}

fn chat_id_of(body: &Value) -> Option<Value> {
    match body.get("chat_id")? {
        Value::String(s) if !s.trim().is_empty() => Some(json!(s.trim())),
        Value::Number(n) => Some(json!(n.to_string())),
        _ => None,
    }
}

pub async fn handle(
    config: &Config,
    http: reqwest::Client,
    headers: &HeaderMap,
    body: &[u8],
    request_id: Uuid,
) -> Result<TriggerAccepted, ApiError> {
    authorize(headers, config.trigger.secret().as_deref())?;

    let body: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e)))?;

    let products = normalize_products(&body);
    if products.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "no valid products (each needs a title and a positive price_eur)",
        ));
    }
    let product_count = products.len();

    let Some(conn) = config.github.connection() else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dispatch backend is not configured",
        ));
    };
    let github = GithubClient::new(http, conn)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))?;

    let mut payload = Map::new();
    payload.insert("source".into(), json!("scan_api"));
    payload.insert("command".into(), json!("scan"));
    payload.insert("request_id".into(), json!(request_id.to_string()));
    payload.insert("requested_at".into(), json!(Utc::now().to_rfc3339()));
    if let Some(chat_id) = chat_id_of(&body) {
        payload.insert("chat_id".into(), chat_id);
    }
    payload.insert("products".into(), Value::Array(products));

    let event = DispatchEvent {
        event_type: config.github.event_type.clone(),
        client_payload: Value::Object(payload),
    };
    github.dispatch(&event).await.map_err(|e| {
        warn!("Trigger dispatch failed: {:#}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    })?;

    info!("Queued scan with {} product(s) from trigger", product_count);
    Ok(TriggerAccepted {
        ok: true,
        queued: true,
        product_count,
    })
}
