use serde_json::Value;

use crate::store::Store;
use crate::store::types::RequestLog;

/// 日志写入失败不影响中继结果，只留痕
pub async fn write_log(store: &Store, log: RequestLog) {
    if let Err(e) = store.append_log(&log).await {
        tracing::error!("Failed to append request log: {}", e);
    }
}

/// 从一元响应体里尽力提取用量；三种方言的字段名各不相同
pub fn extract_usage(body: &Value) -> (Option<i64>, Option<i64>) {
    if let Some(usage) = body.get("usage") {
        // openai: prompt_tokens / completion_tokens；anthropic: input_tokens / output_tokens
        let input = usage
            .get("prompt_tokens")
            .or_else(|| usage.get("input_tokens"))
            .and_then(Value::as_i64);
        let output = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(Value::as_i64);
        if input.is_some() || output.is_some() {
            return (input, output);
        }
    }
    if let Some(meta) = body.get("usageMetadata") {
        let input = meta.get("promptTokenCount").and_then(Value::as_i64);
        let output = meta.get("candidatesTokenCount").and_then(Value::as_i64);
        return (input, output);
    }
    (None, None)
}
