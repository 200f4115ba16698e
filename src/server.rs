//! HTTP surface for graph-backed question answering.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/chat/completions` | Answer a question with a chosen strategy |
//! | `GET`  | `/api/v1/message/id?id=…` | Fetch a message node by id |
//! | `GET`  | `/health` | Liveness check |
//!
//! # Error Contract
//!
//! Errors are JSON bodies of the form:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "prompt must not be empty" } }
//! ```
//!
//! Invalid input (missing prompt, unknown strategy, missing id) is a 400;
//! unknown messages are a 404; anything internal is a 500 with a sanitized
//! message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::config::Config;
use crate::infer::{InferenceEngine, Strategy};

#[derive(Clone)]
struct AppState {
    engine: Arc<InferenceEngine>,
}

/// Start the HTTP server and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: InferenceEngine) -> anyhow::Result<()> {
    let state = AppState {
        engine: Arc::new(engine),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/chat/completions", post(handle_chat_completions))
        .route("/api/v1/message/id", get(handle_message_by_id))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(serde::Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(serde::Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    #[serde(default)]
    prompt: String,
    #[serde(rename = "inferenceStrategy", default)]
    inference_strategy: Option<String>,
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }

    let strategy = match request.inference_strategy.as_deref() {
        None | Some("") => Strategy::Hybrid,
        Some(name) => Strategy::parse(name)
            .ok_or_else(|| bad_request(format!("unknown inference strategy: {}", name)))?,
    };

    let params = state.engine.params_for(strategy, &request.prompt);
    let response = state.engine.infer(&params).await.map_err(|err| {
        error!(error = %format!("{:#}", err), "inference failed");
        internal("inference failed")
    })?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct MessageByIdQuery {
    #[serde(default)]
    id: String,
}

async fn handle_message_by_id(
    State(state): State<AppState>,
    Query(query): Query<MessageByIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.id.is_empty() {
        return Err(bad_request("missing message id"));
    }

    let message = state
        .engine
        .graph()
        .get_message(&query.id)
        .await
        .map_err(|err| {
            error!(error = %format!("{:#}", err), "message lookup failed");
            internal("message lookup failed")
        })?;

    match message {
        Some(message) => Ok(Json(message)),
        None => Err(not_found("message not found")),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
