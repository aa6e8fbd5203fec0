pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicDialect;
pub use gemini::GeminiDialect;
pub use openai::OpenAIDialect;

use reqwest::RequestBuilder;
use serde_json::Value;

use crate::store::types::{ChannelType, KeyStatus};

/// 上游错误摘要保留的最大字节数
const ERROR_BODY_SNIPPET: usize = 200;

/// 聊天补全端点；gemini 需要模型名参与路径
pub fn chat_endpoint(channel_type: ChannelType, base_url: &str, model: &str) -> String {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => OpenAIDialect::chat_url(base_url),
        ChannelType::Anthropic => AnthropicDialect::chat_url(base_url),
        ChannelType::Gemini => GeminiDialect::chat_url(base_url, model),
    }
}

pub fn models_endpoint(channel_type: ChannelType, base_url: &str) -> String {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => OpenAIDialect::models_url(base_url),
        ChannelType::Anthropic => AnthropicDialect::models_url(base_url),
        ChannelType::Gemini => GeminiDialect::models_url(base_url),
    }
}

/// 通用路径透传（embeddings / images 等 openai 形态端点）
pub fn passthrough_endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// 凭证注入。gemini 走 URL 参数（见 [`append_url_auth`]），此处原样返回。
pub fn authorize(channel_type: ChannelType, builder: RequestBuilder, key: &str) -> RequestBuilder {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => {
            OpenAIDialect::apply_auth(builder, key)
        }
        ChannelType::Anthropic => AnthropicDialect::apply_auth(builder, key),
        ChannelType::Gemini => builder,
    }
}

/// gemini 把密钥追加到查询串；其余方言 URL 不变
pub fn append_url_auth(channel_type: ChannelType, url: String, key: &str) -> String {
    match channel_type {
        ChannelType::Gemini => GeminiDialect::with_key(url, key),
        _ => url,
    }
}

pub fn default_probe_model(channel_type: ChannelType) -> &'static str {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => OpenAIDialect::DEFAULT_PROBE_MODEL,
        ChannelType::Anthropic => AnthropicDialect::DEFAULT_PROBE_MODEL,
        ChannelType::Gemini => GeminiDialect::DEFAULT_PROBE_MODEL,
    }
}

pub fn probe_chat_body(channel_type: ChannelType, model: &str) -> Value {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => OpenAIDialect::probe_body(model),
        ChannelType::Anthropic => AnthropicDialect::probe_body(model),
        ChannelType::Gemini => GeminiDialect::probe_body(),
    }
}

/// 余额端点仅存在于 openai 方言
pub fn balance_endpoint(channel_type: ChannelType, base_url: &str) -> Option<String> {
    match channel_type {
        ChannelType::OpenAI | ChannelType::OpenAICompatible => {
            Some(OpenAIDialect::balance_url(base_url))
        }
        ChannelType::Anthropic | ChannelType::Gemini => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub status: KeyStatus,
    pub error: Option<String>,
}

/// 上游状态码到密钥状态的映射
pub fn classify_http(status: u16, body: &[u8]) -> Classified {
    match status {
        200..=299 => Classified {
            status: KeyStatus::Active,
            error: None,
        },
        401 | 403 => Classified {
            status: KeyStatus::Invalid,
            error: None,
        },
        429 => Classified {
            status: KeyStatus::QuotaExceeded,
            error: None,
        },
        code => {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_SNIPPET)]);
            Classified {
                status: KeyStatus::Invalid,
                error: Some(format!("HTTP {}: {}", code, snippet)),
            }
        }
    }
}

pub fn classify_transport(error: &reqwest::Error) -> Classified {
    Classified {
        status: KeyStatus::Invalid,
        error: Some(error.to_string()),
    }
}
