use std::sync::Arc;

use axum::Extension;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;

use crate::server::AppState;
use crate::server::relay::relay_request;
use crate::server::util::openai_error;
use crate::store::types::Token;

/// Chat Completions 入口：
/// - body 只窥视 `model` 与 `stream` 两个字段，原始字节逐字节转发
/// - 流式与一元共用同一条中继路径
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    body: Bytes,
) -> Response {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return openai_error(
                StatusCode::BAD_REQUEST,
                "Invalid JSON body",
                "invalid_request_error",
            );
        }
    };
    let Some(model) = parsed.get("model").and_then(Value::as_str).map(str::to_string) else {
        return openai_error(
            StatusCode::BAD_REQUEST,
            "model is required",
            "invalid_request_error",
        );
    };
    // 仅 stream === true 视为流式
    let streaming = parsed.get("stream").and_then(Value::as_bool).unwrap_or(false);

    relay_request(state, &token, model, "/v1/chat/completions", body, streaming).await
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    body: Bytes,
) -> Response {
    relay_unary(state, token, body, "/v1/embeddings").await
}

pub async fn images_generations(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    body: Bytes,
) -> Response {
    relay_unary(state, token, body, "/v1/images/generations").await
}

async fn relay_unary(
    state: Arc<AppState>,
    token: Token,
    body: Bytes,
    path: &str,
) -> Response {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return openai_error(
                StatusCode::BAD_REQUEST,
                "Invalid JSON body",
                "invalid_request_error",
            );
        }
    };
    let Some(model) = parsed.get("model").and_then(Value::as_str).map(str::to_string) else {
        return openai_error(
            StatusCode::BAD_REQUEST,
            "model is required",
            "invalid_request_error",
        );
    };

    relay_request(state, &token, model, path, body, false).await
}
