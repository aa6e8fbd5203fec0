use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::model_map::MODEL_TABLE;
use crate::store::types::{Channel, Token, now_ms};

/// 声明式模型表投影到当前配置：
/// 模型出现一次，当且仅当存在类型匹配且令牌可用的启用渠道
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
) -> Result<Json<Value>, GatewayError> {
    let eligible: Vec<Channel> = state
        .store
        .list_channels()
        .await?
        .into_iter()
        .filter(|c| c.enabled)
        .filter(|c| token.allowed_channels.is_empty() || token.allowed_channels.contains(&c.id))
        .collect();

    let created = now_ms() / 1000;
    let mut data = Vec::new();
    for (model, supported_types) in MODEL_TABLE {
        if let Some(channel) = eligible
            .iter()
            .find(|c| supported_types.contains(&c.channel_type))
        {
            data.push(json!({
                "id": model,
                "object": "model",
                "created": created,
                "owned_by": channel.channel_type,
            }));
        }
    }

    Ok(Json(json!({ "object": "list", "data": data })))
}
