use reqwest::RequestBuilder;
use serde_json::{Value, json};

/// openai 与 openai-compatible 共用同一方言
pub struct OpenAIDialect;

impl OpenAIDialect {
    pub const DEFAULT_PROBE_MODEL: &'static str = "gpt-3.5-turbo";

    pub fn chat_url(base_url: &str) -> String {
        format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
    }

    pub fn models_url(base_url: &str) -> String {
        format!("{}/v1/models", base_url.trim_end_matches('/'))
    }

    pub fn balance_url(base_url: &str) -> String {
        format!(
            "{}/dashboard/billing/credit_grants",
            base_url.trim_end_matches('/')
        )
    }

    pub fn apply_auth(builder: RequestBuilder, key: &str) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", key))
    }

    pub fn probe_body(model: &str) -> Value {
        json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        })
    }

    /// credit_grants 响应里的 total_available
    pub fn extract_balance(body: &Value) -> Option<f64> {
        body.get("total_available").and_then(Value::as_f64)
    }
}
