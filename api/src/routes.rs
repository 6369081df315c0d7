use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use runcatcher_common::capture::{decode_data_uri, CaptureResponse, ErrorResponse, HealthResponse};
use serde_json::Value;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::store::CaptureStore;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CaptureStore>,
}

pub fn router(state: AppState, body_limit: usize, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/capture", post(capture))
        .route("/captures", get(list_captures))
        .route("/captures/:filename", get(serve_capture))
        .route("/health", get(health));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn json_error(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

fn capture_failed(details: impl std::fmt::Display) -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::with_details("Failed to capture runner", details.to_string()),
    )
}

fn no_image() -> Response {
    json_error(
        StatusCode::BAD_REQUEST,
        ErrorResponse::new("No image data provided"),
    )
}

/// POST /capture — body: `{ image, motionSpeed, timestamp }`
///
/// The body is read as loose JSON. Only `image` decides the outcome;
/// `motionSpeed` and `timestamp` are logged when they have the expected type
/// and ignored otherwise. A body that is empty, not JSON, or not declared as
/// JSON carries no image.
async fn capture(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: Value = if body.is_empty() || !is_json(&headers) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "capture body is not JSON");
                return no_image();
            }
        }
    };

    let image = match payload.get("image") {
        None | Some(Value::Null) => return no_image(),
        Some(Value::String(s)) if s.is_empty() => return no_image(),
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            error!(kind = json_kind(other), "capture image is not a string");
            return capture_failed(format!("image must be a string, got {}", json_kind(other)));
        }
    };
    let motion_speed = payload.get("motionSpeed").and_then(Value::as_f64);
    let client_timestamp = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or("-")
        .to_owned();

    let bytes = match decode_data_uri(image) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to decode capture image");
            return capture_failed(e);
        }
    };

    let received_at = Utc::now();
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || store.save(&bytes, received_at)).await;

    match result {
        Ok(Ok(filename)) => {
            info!(
                filename,
                motion_speed = ?motion_speed,
                client_timestamp,
                "runner captured"
            );
            Json(CaptureResponse {
                success: true,
                filename,
                message: "Runner captured successfully".into(),
            })
            .into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to store capture");
            capture_failed(e)
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            capture_failed(e)
        }
    }
}

/// GET /captures — every stored capture, newest first
async fn list_captures(State(state): State<AppState>) -> Response {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.list()).await {
        Ok(Ok(entries)) => Json(entries).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to list captures");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to list captures"),
            )
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to list captures"),
            )
        }
    }
}

/// GET /captures/:filename — served from the captures directory
async fn serve_capture(State(state): State<AppState>, mut request: Request) -> Response {
    // Strip the route prefix so the lookup is relative to the store root.
    let Some(relative) = request
        .uri()
        .path_and_query()
        .and_then(|pq| pq.as_str().strip_prefix("/captures"))
        .and_then(|rest| rest.parse::<Uri>().ok())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    *request.uri_mut() = relative;

    match ServeDir::new(state.store.dir()).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|essence| {
            let essence = essence.trim().to_ascii_lowercase();
            essence == "application/json" || essence.ends_with("+json")
        })
        .unwrap_or(false)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Response {
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.count()).await {
        Ok(Ok(captures_count)) => Json(HealthResponse {
            status: "OK".into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            captures_count,
        })
        .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to count captures");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_details("Internal server error", e.to_string()),
            )
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
