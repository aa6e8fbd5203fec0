use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiResponse, double_option, ok, ok_message};
use crate::checker::KeyCheckResult;
use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::util::mask_key;
use crate::store::database_keys::KeyPatch;
use crate::store::types::{ApiKey, KeyStatus, new_id, now_ms};

/// 出站视图：密钥值只以打码形式离开进程
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyOut {
    pub id: String,
    pub channel_id: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub status: KeyStatus,
    pub priority: i64,
    pub weight: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    pub error_count: i64,
    pub total_requests: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<ApiKey> for KeyOut {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            channel_id: key.channel_id,
            key: mask_key(&key.key),
            alias: key.alias,
            status: key.status,
            priority: key.priority,
            weight: key.weight,
            balance: key.balance,
            last_checked: key.last_checked,
            last_used: key.last_used,
            error_count: key.error_count,
            total_requests: key.total_requests,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysQuery {
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCreatePayload {
    pub channel_id: String,
    pub key: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "default_rank")]
    pub priority: i64,
    #[serde(default = "default_rank")]
    pub weight: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeyUpdatePayload {
    pub key: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub alias: Option<Option<String>>,
    pub status: Option<KeyStatus>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyImportPayload {
    pub channel_id: String,
    pub keys: String,
    #[serde(default)]
    pub delimiter: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyImportResult {
    pub created: usize,
    pub keys: Vec<KeyOut>,
}

fn default_rank() -> i64 {
    50
}

fn validate_rank(name: &str, value: i64) -> Result<i64, GatewayError> {
    if !(1..=100).contains(&value) {
        return Err(GatewayError::Validation(format!(
            "{} must be within [1, 100]",
            name
        )));
    }
    Ok(value)
}

async fn validate_channel_ref(state: &AppState, channel_id: &str) -> Result<(), GatewayError> {
    if state.store.get_channel(channel_id).await?.is_none() {
        return Err(GatewayError::Validation(format!(
            "channel not found: {}",
            channel_id
        )));
    }
    Ok(())
}

fn fresh_key(channel_id: &str, value: String, alias: Option<String>, priority: i64, weight: i64) -> ApiKey {
    let now = now_ms();
    ApiKey {
        id: new_id(),
        channel_id: channel_id.to_string(),
        key: value,
        alias,
        status: KeyStatus::Unknown,
        priority,
        weight,
        balance: None,
        last_checked: None,
        last_used: None,
        error_count: 0,
        total_requests: 0,
        created_at: now,
        updated_at: now,
    }
}

pub async fn list_keys(
    Query(query): Query<KeysQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<KeyOut>>>, GatewayError> {
    let keys = state
        .store
        .list_keys(query.channel_id.as_deref())
        .await?
        .into_iter()
        .map(KeyOut::from)
        .collect();
    Ok(ok(keys))
}

pub async fn get_key(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<KeyOut>>, GatewayError> {
    match state.store.get_key(&id).await? {
        Some(key) => Ok(ok(key.into())),
        None => Err(GatewayError::NotFound(format!("key not found: {}", id))),
    }
}

pub async fn create_key(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<KeyCreatePayload>,
) -> Result<Json<ApiResponse<KeyOut>>, GatewayError> {
    let value = payload.key.trim().to_string();
    if value.is_empty() {
        return Err(GatewayError::Validation("key must not be empty".into()));
    }
    validate_channel_ref(&state, &payload.channel_id).await?;
    let priority = validate_rank("priority", payload.priority)?;
    let weight = validate_rank("weight", payload.weight)?;

    let key = fresh_key(&payload.channel_id, value, payload.alias, priority, weight);
    state.store.create_key(&key).await?;
    Ok(ok(key.into()))
}

/// 按分隔符（默认换行）切分、去空白、丢空行，单事务批量入库；
/// 重复导入彼此独立，允许重复密钥
pub async fn import_keys(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<KeyImportPayload>,
) -> Result<Json<ApiResponse<KeyImportResult>>, GatewayError> {
    validate_channel_ref(&state, &payload.channel_id).await?;

    let delimiter = payload.delimiter.clone().unwrap_or_else(|| "\n".to_string());
    let values: Vec<String> = payload
        .keys
        .split(delimiter.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        return Err(GatewayError::Validation("no keys to import".into()));
    }

    let keys: Vec<ApiKey> = values
        .into_iter()
        .map(|value| fresh_key(&payload.channel_id, value, None, 50, 50))
        .collect();
    state.store.create_keys(&keys).await?;
    tracing::info!(channel_id = %payload.channel_id, count = keys.len(), "Keys imported");

    Ok(ok(KeyImportResult {
        created: keys.len(),
        keys: keys.into_iter().map(KeyOut::from).collect(),
    }))
}

pub async fn update_key(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<KeyUpdatePayload>,
) -> Result<Json<ApiResponse<KeyOut>>, GatewayError> {
    if let Some(priority) = payload.priority {
        validate_rank("priority", priority)?;
    }
    if let Some(weight) = payload.weight {
        validate_rank("weight", weight)?;
    }
    if let Some(value) = &payload.key
        && value.trim().is_empty()
    {
        return Err(GatewayError::Validation("key must not be empty".into()));
    }

    let patch = KeyPatch {
        key: payload.key.map(|v| v.trim().to_string()),
        alias: payload.alias,
        status: payload.status,
        priority: payload.priority,
        weight: payload.weight,
    };
    match state.store.update_key(&id, patch).await? {
        Some(key) => Ok(ok(key.into())),
        None => Err(GatewayError::NotFound(format!("key not found: {}", id))),
    }
}

pub async fn delete_key(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, GatewayError> {
    if !state.store.delete_key(&id).await? {
        return Err(GatewayError::NotFound(format!("key not found: {}", id)));
    }
    Ok(ok_message("key deleted"))
}

/// 对单个密钥立即探测一次，返回探测结论
pub async fn check_key(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<KeyCheckResult>>, GatewayError> {
    let result = state.checker.check_one(&id).await?;
    Ok(ok(result))
}

/// 立即返回；批量探测在后台进行，调用方轮询密钥记录观察变化
pub async fn check_all_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, GatewayError> {
    let checker = state.checker.clone();
    tokio::spawn(async move {
        if let Err(e) = checker.check_all_batched().await {
            tracing::error!("Bulk key check failed: {}", e);
        }
    });
    Ok(ok_message("key check started"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_bounds() {
        assert!(validate_rank("priority", 0).is_err());
        assert!(validate_rank("priority", 101).is_err());
        assert_eq!(validate_rank("weight", 1).unwrap(), 1);
        assert_eq!(validate_rank("weight", 100).unwrap(), 100);
    }

    #[test]
    fn import_split_defaults_to_newline() {
        let payload: KeyImportPayload = serde_json::from_str(
            r#"{"channelId": "c1", "keys": " sk-a \n\nsk-b\n  \nsk-c"}"#,
        )
        .unwrap();
        let delimiter = payload.delimiter.unwrap_or_else(|| "\n".to_string());
        let values: Vec<&str> = payload
            .keys
            .split(delimiter.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(values, ["sk-a", "sk-b", "sk-c"]);
    }

    #[test]
    fn key_out_masks_secret() {
        let key = fresh_key("c1", "sk-verysecretvalue12".to_string(), None, 50, 50);
        let out = KeyOut::from(key);
        assert_eq!(out.key, "sk-v****ue12");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["totalRequests"], 0);
    }
}
