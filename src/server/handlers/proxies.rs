use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{ApiResponse, double_option, ok, ok_message};
use crate::error::GatewayError;
use crate::proxy_dialer::ProxyTestResult;
use crate::server::AppState;
use crate::store::database_proxies::ProxyPatch;
use crate::store::types::{Proxy, ProxyType, new_id, now_ms};

/// 出站视图：密码一律以 "****" 出现
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOut {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Proxy> for ProxyOut {
    fn from(proxy: Proxy) -> Self {
        Self {
            id: proxy.id,
            name: proxy.name,
            proxy_type: proxy.proxy_type,
            host: proxy.host,
            port: proxy.port,
            username: proxy.username,
            password: proxy.password.map(|_| "****".to_string()),
            enabled: proxy.enabled,
            created_at: proxy.created_at,
            updated_at: proxy.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyCreatePayload {
    pub name: String,
    #[serde(rename = "type")]
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUpdatePayload {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub proxy_type: Option<ProxyType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default, deserialize_with = "double_option")]
    pub username: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub password: Option<Option<String>>,
    pub enabled: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

fn validate_non_empty(field: &str, value: &str) -> Result<String, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_port(port: u16) -> Result<u16, GatewayError> {
    if port == 0 {
        return Err(GatewayError::Validation(
            "port must be within [1, 65535]".into(),
        ));
    }
    Ok(port)
}

pub async fn list_proxies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ProxyOut>>>, GatewayError> {
    let proxies = state
        .store
        .list_proxies()
        .await?
        .into_iter()
        .map(ProxyOut::from)
        .collect();
    Ok(ok(proxies))
}

pub async fn get_proxy(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ProxyOut>>, GatewayError> {
    match state.store.get_proxy(&id).await? {
        Some(proxy) => Ok(ok(proxy.into())),
        None => Err(GatewayError::NotFound(format!("proxy not found: {}", id))),
    }
}

pub async fn create_proxy(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProxyCreatePayload>,
) -> Result<Json<ApiResponse<ProxyOut>>, GatewayError> {
    let name = validate_non_empty("name", &payload.name)?;
    let host = validate_non_empty("host", &payload.host)?;
    let port = validate_port(payload.port)?;

    let now = now_ms();
    let proxy = Proxy {
        id: new_id(),
        name,
        proxy_type: payload.proxy_type,
        host,
        port,
        username: payload.username,
        password: payload.password,
        enabled: payload.enabled,
        created_at: now,
        updated_at: now,
    };
    state.store.create_proxy(&proxy).await?;
    Ok(ok(proxy.into()))
}

pub async fn update_proxy(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProxyUpdatePayload>,
) -> Result<Json<ApiResponse<ProxyOut>>, GatewayError> {
    let name = payload
        .name
        .as_deref()
        .map(|v| validate_non_empty("name", v))
        .transpose()?;
    let host = payload
        .host
        .as_deref()
        .map(|v| validate_non_empty("host", v))
        .transpose()?;
    let port = payload.port.map(validate_port).transpose()?;

    let patch = ProxyPatch {
        name,
        proxy_type: payload.proxy_type,
        host,
        port,
        username: payload.username,
        password: payload.password,
        enabled: payload.enabled,
    };
    match state.store.update_proxy(&id, patch).await? {
        Some(proxy) => {
            // 连接池按 updatedAt 失效，这里显式丢弃旧客户端
            state.dialer.invalidate(&id);
            Ok(ok(proxy.into()))
        }
        None => Err(GatewayError::NotFound(format!("proxy not found: {}", id))),
    }
}

pub async fn delete_proxy(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Value>>, GatewayError> {
    if !state.store.delete_proxy(&id).await? {
        return Err(GatewayError::NotFound(format!("proxy not found: {}", id)));
    }
    state.dialer.invalidate(&id);
    tracing::info!(id = %id, "Proxy deleted (channel references cleared)");
    Ok(ok_message("proxy deleted"))
}

/// 经该代理探测一次出网连通性，10 秒预算
pub async fn test_proxy(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<ProxyTestResult>>, GatewayError> {
    let Some(proxy) = state.store.get_proxy(&id).await? else {
        return Err(GatewayError::NotFound(format!("proxy not found: {}", id)));
    };
    Ok(ok(state.dialer.test_proxy(&proxy).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_zero_is_rejected() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1080).unwrap(), 1080);
    }

    #[test]
    fn password_is_masked_in_output() {
        let now = now_ms();
        let proxy = Proxy {
            id: "p1".into(),
            name: "egress".into(),
            proxy_type: ProxyType::Socks5h,
            host: "127.0.0.1".into(),
            port: 1080,
            username: Some("user".into()),
            password: Some("hunter2".into()),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        let out = ProxyOut::from(proxy);
        assert_eq!(out.password.as_deref(), Some("****"));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["type"], "socks5h");
    }

    #[test]
    fn absent_password_stays_absent() {
        let now = now_ms();
        let proxy = Proxy {
            id: "p1".into(),
            name: "egress".into(),
            proxy_type: ProxyType::Http,
            host: "h".into(),
            port: 8080,
            username: None,
            password: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&ProxyOut::from(proxy)).unwrap();
        assert!(json.get("password").is_none());
    }
}
