use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// 所有持久化时间戳统一为毫秒 Unix time
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 网关签发的下游令牌："kh-" + 24 随机字节的小写十六进制
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("kh-{}", hex)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openai-compatible")]
    OpenAICompatible,
}

impl ChannelType {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenAICompatible => "openai-compatible",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Self::OpenAI),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            "openai-compatible" => Some(Self::OpenAICompatible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMethod {
    Balance,
    Chat,
    Models,
}

impl TestMethod {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Chat => "chat",
            Self::Models => "models",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "balance" => Some(Self::Balance),
            "chat" => Some(Self::Chat),
            "models" => Some(Self::Models),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadBalanceStrategy {
    #[default]
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "weighted")]
    Weighted,
    #[serde(rename = "priority")]
    Priority,
    #[serde(rename = "least-used")]
    LeastUsed,
}

impl LoadBalanceStrategy {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::Weighted => "weighted",
            Self::Priority => "priority",
            Self::LeastUsed => "least-used",
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "weighted" => Self::Weighted,
            "priority" => Self::Priority,
            "least-used" => Self::LeastUsed,
            _ => Self::RoundRobin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Invalid,
    QuotaExceeded,
    Disabled,
    Unknown,
}

impl KeyStatus {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Invalid => "invalid",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_value(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "invalid" => Self::Invalid,
            "quota_exceeded" => Self::QuotaExceeded,
            "disabled" => Self::Disabled,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Socks5,
    Socks5h,
    Http,
    Https,
}

impl ProxyType {
    pub fn as_db_value(&self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "socks5" => Some(Self::Socks5),
            "socks5h" => Some(Self::Socks5h),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

/// 上游渠道：方言 + base URL + 可选出站代理
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub base_url: String,
    pub test_method: TestMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_id: Option<String>,
    pub load_balance_strategy: LoadBalanceStrategy,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: String,
    pub channel_id: String,
    pub key: String,
    pub alias: Option<String>,
    pub status: KeyStatus,
    pub priority: i64,
    pub weight: i64,
    pub balance: Option<f64>,
    pub last_checked: Option<i64>,
    pub last_used: Option<i64>,
    pub error_count: i64,
    pub total_requests: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Proxy {
    pub id: String,
    pub name: String,
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub id: String,
    pub name: String,
    pub token: String,
    /// 空集合表示可用所有能解析到该模型的渠道
    pub allowed_channels: Vec<String>,
    pub rate_limit: Option<u32>,
    pub enabled: bool,
    pub created_at: i64,
    pub last_used: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub channel_id: String,
    pub key_id: String,
    pub model: String,
    pub path: String,
    pub method: String,
    pub status: u16,
    pub latency: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub streaming: bool,
}

pub const DEFAULT_CHECK_INTERVAL_MS: i64 = 3_600_000;
pub const DEFAULT_LOGS_RETENTION_MS: i64 = 604_800_000;

/// 全局单例设置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub check_interval: i64,
    pub max_logs_retention: i64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL_MS,
            max_logs_retention: DEFAULT_LOGS_RETENTION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_value_format() {
        let value = generate_token_value();
        assert!(value.starts_with("kh-"));
        assert_eq!(value.len(), 3 + 48);
        assert!(
            value[3..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
    }

    #[test]
    fn token_values_are_unique() {
        assert_ne!(generate_token_value(), generate_token_value());
    }

    #[test]
    fn id_is_opaque_and_long_enough() {
        let id = new_id();
        assert!(id.len() >= 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn channel_type_round_trips_through_db_value() {
        for t in [
            ChannelType::OpenAI,
            ChannelType::Anthropic,
            ChannelType::Gemini,
            ChannelType::OpenAICompatible,
        ] {
            assert_eq!(ChannelType::from_db_value(t.as_db_value()), Some(t));
        }
        assert_eq!(ChannelType::from_db_value("zhipu"), None);
    }

    #[test]
    fn unknown_key_status_degrades_to_unknown() {
        assert_eq!(KeyStatus::from_db_value("bogus"), KeyStatus::Unknown);
    }

    #[test]
    fn channel_serializes_wire_names() {
        let channel = Channel {
            id: "c1".into(),
            name: "main".into(),
            channel_type: ChannelType::OpenAICompatible,
            base_url: "https://api.example.com".into(),
            test_method: TestMethod::Models,
            test_model: None,
            proxy_id: None,
            load_balance_strategy: LoadBalanceStrategy::LeastUsed,
            enabled: true,
            created_at: 1,
            updated_at: 2,
        };
        let v = serde_json::to_value(&channel).unwrap();
        assert_eq!(v["type"], "openai-compatible");
        assert_eq!(v["loadBalanceStrategy"], "least-used");
        assert_eq!(v["baseUrl"], "https://api.example.com");
        assert!(v.get("testModel").is_none());
    }
}
