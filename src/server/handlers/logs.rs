use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiResponse, ok};
use crate::error::GatewayError;
use crate::server::AppState;
use crate::store::database_logs::LogQuery;
use crate::store::types::RequestLog;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogsQueryParams {
    pub channel_id: Option<String>,
    pub status: Option<u16>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsPage {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub data: Vec<RequestLog>,
}

/// 筛选条件 AND 组合，结果按时间降序分页
pub async fn list_logs(
    Query(params): Query<LogsQueryParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<LogsPage>>, GatewayError> {
    let query = LogQuery {
        channel_id: params.channel_id,
        status: params.status,
        start_time: params.start_time,
        end_time: params.end_time,
        offset: params.offset,
        limit: params.limit,
    };
    let (data, total) = state.store.query_logs(&query).await?;
    Ok(ok(LogsPage {
        total,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
        data,
    }))
}
