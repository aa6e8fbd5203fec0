use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::{AppState, auth};
use crate::store::types::now_ms;

mod channels;
mod chat;
mod keys;
mod logs;
mod models;
mod proxies;
mod settings;
mod stats;
mod tokens;

/// 管理接口统一包装：{success, data?, message?}；错误侧由 GatewayError 渲染
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        message: None,
    })
}

pub fn ok_message(message: &str) -> Json<ApiResponse<Value>> {
    Json(ApiResponse {
        success: true,
        data: None,
        message: Some(message.to_string()),
    })
}

/// PUT 载荷里区分「未提供」与「显式 null」：
/// 字段缺省 → None（保持原值），null → Some(None)（清空）
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": now_ms() }))
}

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // OpenAI 兼容面：全部经过 AuthGate
    let relay_routes = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/embeddings", post(chat::embeddings))
        .route("/v1/images/generations", post(chat::images_generations))
        .layer(middleware::from_fn_with_state(state, auth::auth_gate));

    Router::new()
        .merge(relay_routes)
        .route(
            "/api/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route(
            "/api/channels/{id}",
            get(channels::get_channel)
                .put(channels::update_channel)
                .delete(channels::delete_channel),
        )
        .route("/api/keys", get(keys::list_keys).post(keys::create_key))
        .route("/api/keys/import", post(keys::import_keys))
        .route("/api/keys/check-all", post(keys::check_all_keys))
        .route(
            "/api/keys/{id}",
            get(keys::get_key).put(keys::update_key).delete(keys::delete_key),
        )
        .route("/api/keys/{id}/check", post(keys::check_key))
        .route(
            "/api/proxies",
            get(proxies::list_proxies).post(proxies::create_proxy),
        )
        .route(
            "/api/proxies/{id}",
            get(proxies::get_proxy)
                .put(proxies::update_proxy)
                .delete(proxies::delete_proxy),
        )
        .route("/api/proxies/{id}/test", post(proxies::test_proxy))
        .route(
            "/api/tokens",
            get(tokens::list_tokens).post(tokens::create_token),
        )
        .route(
            "/api/tokens/{id}",
            axum::routing::put(tokens::update_token).delete(tokens::delete_token),
        )
        .route("/api/stats", get(stats::dashboard_stats))
        .route("/api/logs", get(logs::list_logs))
        .route(
            "/api/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route("/health", get(health))
}
