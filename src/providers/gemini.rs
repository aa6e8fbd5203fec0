use serde_json::{Value, json};

pub struct GeminiDialect;

impl GeminiDialect {
    pub const DEFAULT_PROBE_MODEL: &'static str = "gemini-pro";

    pub fn chat_url(base_url: &str, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        )
    }

    pub fn models_url(base_url: &str) -> String {
        format!("{}/v1beta/models", base_url.trim_end_matches('/'))
    }

    /// 密钥随查询串传递，不走请求头
    pub fn with_key(url: String, key: &str) -> String {
        if url.contains('?') {
            format!("{}&key={}", url, key)
        } else {
            format!("{}?key={}", url, key)
        }
    }

    pub fn probe_body() -> Value {
        json!({
            "contents": [{"parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 1},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_append_handles_existing_query() {
        let with_query = GeminiDialect::with_key("https://g.test/v1beta/models?pageSize=5".into(), "k");
        assert!(with_query.ends_with("&key=k"));
        let without = GeminiDialect::with_key(GeminiDialect::models_url("https://g.test"), "k");
        assert_eq!(without, "https://g.test/v1beta/models?key=k");
    }
}
