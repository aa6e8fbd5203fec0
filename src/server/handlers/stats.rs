use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiResponse, ok};
use crate::error::GatewayError;
use crate::server::AppState;
use crate::store::types::{KeyStatus, now_ms};

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub channels: EntityCount,
    pub keys: KeyCounts,
    pub proxies: EntityCount,
    pub tokens: EntityCount,
    pub requests: RequestStats,
    pub tokens_used: TokenUsage,
}

#[derive(Debug, Serialize)]
pub struct EntityCount {
    pub total: usize,
    pub enabled: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCounts {
    pub total: usize,
    pub active: usize,
    pub invalid: usize,
    pub quota_exceeded: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total: u64,
    pub today: usize,
    pub success_today: usize,
    pub failed_today: usize,
    pub avg_latency_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_today: i64,
    pub output_today: i64,
}

/// 仪表盘聚合：实体计数 + 最近 24 小时的请求面
pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DashboardStats>>, GatewayError> {
    let channels = state.store.list_channels().await?;
    let keys = state.store.list_keys(None).await?;
    let proxies = state.store.list_proxies().await?;
    let tokens = state.store.list_tokens().await?;
    let recent = state.store.logs_since(now_ms() - DAY_MS).await?;
    let total_requests = state.store.count_logs().await?;

    let success_today = recent.iter().filter(|l| l.status < 400).count();
    let latency_sum: i64 = recent.iter().map(|l| l.latency).sum();
    let avg_latency_ms = if recent.is_empty() {
        0
    } else {
        latency_sum / recent.len() as i64
    };

    let stats = DashboardStats {
        channels: EntityCount {
            total: channels.len(),
            enabled: channels.iter().filter(|c| c.enabled).count(),
        },
        keys: KeyCounts {
            total: keys.len(),
            active: keys.iter().filter(|k| k.status == KeyStatus::Active).count(),
            invalid: keys.iter().filter(|k| k.status == KeyStatus::Invalid).count(),
            quota_exceeded: keys
                .iter()
                .filter(|k| k.status == KeyStatus::QuotaExceeded)
                .count(),
        },
        proxies: EntityCount {
            total: proxies.len(),
            enabled: proxies.iter().filter(|p| p.enabled).count(),
        },
        tokens: EntityCount {
            total: tokens.len(),
            enabled: tokens.iter().filter(|t| t.enabled).count(),
        },
        requests: RequestStats {
            total: total_requests,
            today: recent.len(),
            success_today,
            failed_today: recent.len() - success_today,
            avg_latency_ms,
        },
        tokens_used: TokenUsage {
            input_today: recent.iter().filter_map(|l| l.input_tokens).sum(),
            output_today: recent.iter().filter_map(|l| l.output_tokens).sum(),
        },
    };
    Ok(ok(stats))
}
