use reqwest::RequestBuilder;
use serde_json::{Value, json};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicDialect;

impl AnthropicDialect {
    pub const DEFAULT_PROBE_MODEL: &'static str = "claude-3-haiku-20240307";

    pub fn chat_url(base_url: &str) -> String {
        format!("{}/v1/messages", base_url.trim_end_matches('/'))
    }

    pub fn models_url(base_url: &str) -> String {
        format!("{}/v1/models", base_url.trim_end_matches('/'))
    }

    pub fn apply_auth(builder: RequestBuilder, key: &str) -> RequestBuilder {
        builder
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// 探测体与 openai 同形
    pub fn probe_body(model: &str) -> Value {
        json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        })
    }
}
