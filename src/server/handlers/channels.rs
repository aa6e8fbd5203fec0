use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{ApiResponse, double_option, ok, ok_message};
use crate::error::GatewayError;
use crate::server::AppState;
use crate::store::database_channels::ChannelPatch;
use crate::store::types::{Channel, ChannelType, LoadBalanceStrategy, TestMethod, new_id, now_ms};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCreatePayload {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub base_url: String,
    #[serde(default = "default_test_method")]
    pub test_method: TestMethod,
    #[serde(default)]
    pub test_model: Option<String>,
    #[serde(default)]
    pub proxy_id: Option<String>,
    #[serde(default)]
    pub load_balance_strategy: LoadBalanceStrategy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdatePayload {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub channel_type: Option<ChannelType>,
    pub base_url: Option<String>,
    pub test_method: Option<TestMethod>,
    #[serde(default, deserialize_with = "double_option")]
    pub test_model: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub proxy_id: Option<Option<String>>,
    pub load_balance_strategy: Option<LoadBalanceStrategy>,
    pub enabled: Option<bool>,
}

fn default_test_method() -> TestMethod {
    TestMethod::Models
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

fn validate_base_url(base_url: &str) -> Result<String, GatewayError> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|_| GatewayError::Validation(format!("invalid baseUrl: {}", base_url)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(GatewayError::Validation(format!(
            "baseUrl must be an absolute http(s) URL: {}",
            base_url
        )));
    }
    Ok(base_url.trim().to_string())
}

async fn validate_proxy_ref(state: &AppState, proxy_id: &str) -> Result<(), GatewayError> {
    if state.store.get_proxy(proxy_id).await?.is_none() {
        return Err(GatewayError::Validation(format!(
            "proxy not found: {}",
            proxy_id
        )));
    }
    Ok(())
}

pub async fn list_channels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Channel>>>, GatewayError> {
    Ok(ok(state.store.list_channels().await?))
}

pub async fn get_channel(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Channel>>, GatewayError> {
    match state.store.get_channel(&id).await? {
        Some(channel) => Ok(ok(channel)),
        None => Err(GatewayError::NotFound(format!("channel not found: {}", id))),
    }
}

pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChannelCreatePayload>,
) -> Result<Json<ApiResponse<Channel>>, GatewayError> {
    let name = validate_name(&payload.name)?;
    let base_url = validate_base_url(&payload.base_url)?;
    if let Some(proxy_id) = &payload.proxy_id {
        validate_proxy_ref(&state, proxy_id).await?;
    }

    let now = now_ms();
    let channel = Channel {
        id: new_id(),
        name,
        channel_type: payload.channel_type,
        base_url,
        test_method: payload.test_method,
        test_model: payload.test_model,
        proxy_id: payload.proxy_id,
        load_balance_strategy: payload.load_balance_strategy,
        enabled: payload.enabled,
        created_at: now,
        updated_at: now,
    };
    state.store.create_channel(&channel).await?;
    tracing::info!(channel = %channel.name, id = %channel.id, "Channel created");
    Ok(ok(channel))
}

pub async fn update_channel(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChannelUpdatePayload>,
) -> Result<Json<ApiResponse<Channel>>, GatewayError> {
    let name = payload.name.as_deref().map(validate_name).transpose()?;
    let base_url = payload
        .base_url
        .as_deref()
        .map(validate_base_url)
        .transpose()?;
    if let Some(Some(proxy_id)) = &payload.proxy_id {
        validate_proxy_ref(&state, proxy_id).await?;
    }

    let patch = ChannelPatch {
        name,
        channel_type: payload.channel_type,
        base_url,
        test_method: payload.test_method,
        test_model: payload.test_model,
        proxy_id: payload.proxy_id,
        load_balance_strategy: payload.load_balance_strategy,
        enabled: payload.enabled,
    };
    match state.store.update_channel(&id, patch).await? {
        Some(channel) => Ok(ok(channel)),
        None => Err(GatewayError::NotFound(format!("channel not found: {}", id))),
    }
}

pub async fn delete_channel(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, GatewayError> {
    if !state.store.delete_channel(&id).await? {
        return Err(GatewayError::NotFound(format!("channel not found: {}", id)));
    }
    tracing::info!(id = %id, "Channel deleted (keys cascaded)");
    Ok(ok_message("channel deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_validation() {
        assert!(validate_base_url("https://api.openai.com").is_ok());
        assert!(validate_base_url("http://10.0.0.5:8080/v1").is_ok());
        assert!(validate_base_url("not a url").is_err());
        assert!(validate_base_url("ftp://files.example.com").is_err());
    }

    #[test]
    fn name_must_not_be_blank() {
        assert!(validate_name("  ").is_err());
        assert_eq!(validate_name(" main ").unwrap(), "main");
    }

    #[test]
    fn update_payload_distinguishes_null_from_absent() {
        let absent: ChannelUpdatePayload = serde_json::from_str("{}").unwrap();
        assert!(absent.proxy_id.is_none());

        let cleared: ChannelUpdatePayload = serde_json::from_str(r#"{"proxyId": null}"#).unwrap();
        assert_eq!(cleared.proxy_id, Some(None));

        let set: ChannelUpdatePayload =
            serde_json::from_str(r#"{"proxyId": "p1", "testModel": null}"#).unwrap();
        assert_eq!(set.proxy_id, Some(Some("p1".to_string())));
        assert_eq!(set.test_model, Some(None));
    }

    #[test]
    fn invalid_enum_is_rejected() {
        let result: Result<ChannelCreatePayload, _> = serde_json::from_str(
            r#"{"name": "x", "type": "zhipu", "baseUrl": "https://a.example.com"}"#,
        );
        assert!(result.is_err());
    }
}
