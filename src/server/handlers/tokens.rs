use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiResponse, double_option, ok, ok_message};
use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::util::mask_token;
use crate::store::database_tokens::TokenPatch;
use crate::store::types::{Token, generate_token_value, new_id, now_ms};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOut {
    pub id: String,
    pub name: String,
    pub token: String,
    pub allowed_channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    pub enabled: bool,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

impl TokenOut {
    fn masked(token: Token) -> Self {
        let masked = mask_token(&token.token);
        Self::with_value(token, masked)
    }

    /// 创建响应是唯一一次返回完整令牌值
    fn raw(token: Token) -> Self {
        let value = token.token.clone();
        Self::with_value(token, value)
    }

    fn with_value(token: Token, value: String) -> Self {
        Self {
            id: token.id,
            name: token.name,
            token: value,
            allowed_channels: token.allowed_channels,
            rate_limit: token.rate_limit,
            enabled: token.enabled,
            created_at: token.created_at,
            last_used: token.last_used,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCreatePayload {
    pub name: String,
    #[serde(default)]
    pub allowed_channels: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TokenUpdatePayload {
    pub name: Option<String>,
    pub allowed_channels: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub rate_limit: Option<Option<u32>>,
    pub enabled: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

fn validate_name(name: &str) -> Result<String, GatewayError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation("name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_rate_limit(limit: u32) -> Result<u32, GatewayError> {
    if limit == 0 {
        return Err(GatewayError::Validation(
            "rateLimit must be greater than zero".into(),
        ));
    }
    Ok(limit)
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<TokenOut>>>, GatewayError> {
    let tokens = state
        .store
        .list_tokens()
        .await?
        .into_iter()
        .map(TokenOut::masked)
        .collect();
    Ok(ok(tokens))
}

pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TokenCreatePayload>,
) -> Result<Json<ApiResponse<TokenOut>>, GatewayError> {
    let name = validate_name(&payload.name)?;
    if let Some(limit) = payload.rate_limit {
        validate_rate_limit(limit)?;
    }

    let token = Token {
        id: new_id(),
        name,
        token: generate_token_value(),
        allowed_channels: payload.allowed_channels,
        rate_limit: payload.rate_limit,
        enabled: payload.enabled,
        created_at: now_ms(),
        last_used: None,
    };
    state.store.create_token(&token).await?;
    tracing::info!(id = %token.id, name = %token.name, "Token issued");
    Ok(ok(TokenOut::raw(token)))
}

pub async fn update_token(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TokenUpdatePayload>,
) -> Result<Json<ApiResponse<TokenOut>>, GatewayError> {
    let name = payload.name.as_deref().map(validate_name).transpose()?;
    if let Some(Some(limit)) = payload.rate_limit {
        validate_rate_limit(limit)?;
    }

    let patch = TokenPatch {
        name,
        allowed_channels: payload.allowed_channels,
        rate_limit: payload.rate_limit,
        enabled: payload.enabled,
    };
    match state.store.update_token(&id, patch).await? {
        Some(token) => Ok(ok(TokenOut::masked(token))),
        None => Err(GatewayError::NotFound(format!("token not found: {}", id))),
    }
}

pub async fn delete_token(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, GatewayError> {
    if !state.store.delete_token(&id).await? {
        return Err(GatewayError::NotFound(format!("token not found: {}", id)));
    }
    Ok(ok_message("token deleted"))
}
