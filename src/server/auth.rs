use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::server::AppState;
use crate::server::util::{bearer_token, openai_error, simple_error};
use crate::store::types::now_ms;

const WINDOW_MS: i64 = 60_000;

/// 按令牌的固定 60 秒窗口限流。进程内近似：状态不落盘，重启即清零，
/// 多实例间不协调。
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

struct Window {
    count: u32,
    reset_at: i64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 计数后判断：第 rateLimit+1 次请求被拒；窗口过期先重置
    pub fn allow(&self, token_id: &str, limit: u32) -> bool {
        let now = now_ms();
        let mut windows = self.windows.lock().expect("rate limit windows poisoned");
        let window = windows.entry(token_id.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + WINDOW_MS,
        });
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + WINDOW_MS;
        }
        window.count += 1;
        window.count <= limit
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// 所有 /v1/* 的前置关卡：解析 Bearer、校验令牌、限流，
/// 然后把 Token 挂到请求扩展上供处理器读取
pub async fn auth_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(value) = bearer_token(request.headers()) else {
        return simple_error(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        );
    };

    let token = match state.store.token_by_value(&value).await {
        Ok(Some(token)) => token,
        Ok(None) => return simple_error(StatusCode::UNAUTHORIZED, "Invalid token"),
        Err(e) => {
            tracing::error!("Token lookup failed: {}", e);
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token lookup failed",
                "server_error",
            );
        }
    };

    if !token.enabled {
        return simple_error(StatusCode::FORBIDDEN, "Token is disabled");
    }

    // lastUsed 尽力而为，不阻塞请求
    {
        let store = state.store.clone();
        let token_id = token.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_token_used(&token_id).await {
                tracing::debug!("Failed to touch token lastUsed: {}", e);
            }
        });
    }

    if let Some(limit) = token.rate_limit
        && !state.rate_limiter.allow(&token.id, limit)
    {
        return openai_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            "rate_limit_error",
        );
    }

    request.extensions_mut().insert(token);
    next.run(request).await
}
