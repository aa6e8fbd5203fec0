use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

// HTTP helpers
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

// 密钥与令牌只在出站响应边界打码，存储值保持完整
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    let (start, end) = (&key[..4], &key[key.len() - 4..]);
    format!("{}****{}", start, end)
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 10 {
        return "****".to_string();
    }
    let (start, end) = (&token[..6], &token[token.len() - 4..]);
    format!("{}****{}", start, end)
}

/// AuthGate 的平铺错误体：{"error": "..."}
pub fn simple_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

/// OpenAI 风格错误体：{"error": {"message", "type"}}
pub fn openai_error(status: StatusCode, message: &str, error_type: &str) -> Response {
    (
        status,
        axum::Json(json!({
            "error": { "message": message, "type": error_type }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_are_fully_masked() {
        assert_eq!(mask_key("sk-12345"), "****");
        assert_eq!(mask_key(""), "****");
    }

    #[test]
    fn long_keys_keep_edges() {
        assert_eq!(mask_key("sk-abcdefghijklmnop"), "sk-a****mnop");
    }

    #[test]
    fn tokens_keep_six_and_four() {
        let token = "kh-0123456789abcdef";
        assert_eq!(mask_token(token), "kh-012****cdef");
        assert_eq!(mask_token("kh-short"), "****");
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer kh-abc".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("kh-abc"));

        let mut bad = HeaderMap::new();
        bad.insert(axum::http::header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert!(bearer_token(&bad).is_none());
    }
}
