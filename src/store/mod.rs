pub mod database;
pub mod database_channels;
pub mod database_keys;
pub mod database_logs;
pub mod database_proxies;
pub mod database_tokens;
pub mod types;

pub use database::Store;
#[allow(unused_imports)]
pub use types::{
    ApiKey, AppSettings, Channel, ChannelType, KeyStatus, LoadBalanceStrategy, Proxy, ProxyType,
    RequestLog, TestMethod, Token,
};
