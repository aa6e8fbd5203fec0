use axum::{Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiResponse, ok};
use crate::error::GatewayError;
use crate::server::AppState;
use crate::store::types::AppSettings;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdatePayload {
    pub check_interval: Option<i64>,
    pub max_logs_retention: Option<i64>,
}

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<AppSettings>>, GatewayError> {
    Ok(ok(state.store.get_settings().await?))
}

/// 日志保留窗口即时生效（下一次 append 即按新值回收）；
/// 检查间隔在进程重启后生效
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SettingsUpdatePayload>,
) -> Result<Json<ApiResponse<AppSettings>>, GatewayError> {
    if let Some(interval) = payload.check_interval
        && interval <= 0
    {
        return Err(GatewayError::Validation(
            "checkInterval must be positive".into(),
        ));
    }
    if let Some(retention) = payload.max_logs_retention
        && retention <= 0
    {
        return Err(GatewayError::Validation(
            "maxLogsRetention must be positive".into(),
        ));
    }

    let settings = state
        .store
        .update_settings(payload.check_interval, payload.max_logs_retention)
        .await?;
    Ok(ok(settings))
}
