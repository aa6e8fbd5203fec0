use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{GatewayError, Result as AppResult};
use crate::providers::{self, Classified, OpenAIDialect};
use crate::proxy_dialer::ProxyDialer;
use crate::store::Store;
use crate::store::types::{ApiKey, Channel, KeyStatus, Proxy, TestMethod};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const BATCH_SIZE: usize = 5;
const BATCH_PAUSE: Duration = Duration::from_secs(1);
const SERIAL_PAUSE: Duration = Duration::from_millis(500);

/// 单次探测的结论。只可能是 active / invalid / quota_exceeded 之一，
/// disabled 与 unknown 不由探测产生。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCheckResult {
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Classified> for KeyCheckResult {
    fn from(classified: Classified) -> Self {
        Self {
            status: classified.status,
            balance: None,
            error: classified.error,
        }
    }
}

pub struct KeyChecker {
    store: Arc<Store>,
    dialer: Arc<ProxyDialer>,
}

impl KeyChecker {
    pub fn new(store: Arc<Store>, dialer: Arc<ProxyDialer>) -> Self {
        Self { store, dialer }
    }

    /// 执行恰好一次 HTTP 探测：渠道方言 + testMethod + 渠道代理，总超时 30 秒
    pub async fn check(&self, channel: &Channel, key: &ApiKey) -> KeyCheckResult {
        let proxy = match &channel.proxy_id {
            Some(proxy_id) => self.store.get_proxy(proxy_id).await.ok().flatten(),
            None => None,
        };

        let client = match self
            .dialer
            .client_with_timeout(proxy.as_ref(), PROBE_TIMEOUT)
        {
            Ok(client) => client,
            Err(e) => {
                return KeyCheckResult {
                    status: KeyStatus::Invalid,
                    balance: None,
                    error: Some(e.to_string()),
                };
            }
        };

        match channel.test_method {
            TestMethod::Models => self.probe_models(&client, channel, key).await,
            TestMethod::Chat => self.probe_chat(&client, channel, key).await,
            TestMethod::Balance => self.probe_balance(&client, channel, key).await,
        }
    }

    async fn probe_models(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        key: &ApiKey,
    ) -> KeyCheckResult {
        let url = providers::models_endpoint(channel.channel_type, &channel.base_url);
        let url = providers::append_url_auth(channel.channel_type, url, &key.key);
        let builder = providers::authorize(channel.channel_type, client.get(url), &key.key);
        Self::classify_response(builder.send().await).await
    }

    async fn probe_chat(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        key: &ApiKey,
    ) -> KeyCheckResult {
        let model = channel
            .test_model
            .clone()
            .unwrap_or_else(|| providers::default_probe_model(channel.channel_type).to_string());
        let url = providers::chat_endpoint(channel.channel_type, &channel.base_url, &model);
        let url = providers::append_url_auth(channel.channel_type, url, &key.key);
        let body = providers::probe_chat_body(channel.channel_type, &model);
        let builder =
            providers::authorize(channel.channel_type, client.post(url).json(&body), &key.key);
        Self::classify_response(builder.send().await).await
    }

    /// 余额端点仅 openai 方言存在；其余方言回退到模型列表探测
    async fn probe_balance(
        &self,
        client: &reqwest::Client,
        channel: &Channel,
        key: &ApiKey,
    ) -> KeyCheckResult {
        let Some(url) = providers::balance_endpoint(channel.channel_type, &channel.base_url) else {
            return self.probe_models(client, channel, key).await;
        };
        let builder = providers::authorize(channel.channel_type, client.get(url), &key.key);
        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let bytes = response.bytes().await.unwrap_or_default();
                let mut result: KeyCheckResult = providers::classify_http(status, &bytes).into();
                if result.status == KeyStatus::Active
                    && let Ok(body) = serde_json::from_slice::<Value>(&bytes)
                {
                    result.balance = OpenAIDialect::extract_balance(&body);
                }
                result
            }
            Err(e) => providers::classify_transport(&e).into(),
        }
    }

    async fn classify_response(
        sent: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> KeyCheckResult {
        match sent {
            Ok(response) => {
                let status = response.status().as_u16();
                let bytes = response.bytes().await.unwrap_or_default();
                providers::classify_http(status, &bytes).into()
            }
            Err(e) => providers::classify_transport(&e).into(),
        }
    }

    /// 探测并原子落库：status / balance / lastChecked / errorCount
    pub async fn check_and_apply(&self, channel: &Channel, key: &ApiKey) -> KeyCheckResult {
        let result = self.check(channel, key).await;
        if let Err(e) = self
            .store
            .apply_check_result(&key.id, result.status, result.balance)
            .await
        {
            tracing::error!(key_id = %key.id, "Failed to persist check result: {}", e);
        }
        if let Some(error) = &result.error {
            tracing::warn!(key_id = %key.id, channel = %channel.name, "Key check failed: {}", error);
        }
        result
    }

    /// 按需单查：解析密钥与所属渠道后执行一次探测
    pub async fn check_one(&self, key_id: &str) -> AppResult<KeyCheckResult> {
        let key = self
            .store
            .get_key(key_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("key not found: {}", key_id)))?;
        let channel = self
            .store
            .get_channel(&key.channel_id)
            .await?
            .ok_or_else(|| {
                GatewayError::NotFound(format!("channel not found: {}", key.channel_id))
            })?;
        Ok(self.check_and_apply(&channel, &key).await)
    }

    async fn checkable_channels(&self) -> AppResult<Vec<(Channel, Vec<ApiKey>)>> {
        let mut out = Vec::new();
        for channel in self.store.list_channels().await? {
            if !channel.enabled {
                continue;
            }
            let keys: Vec<ApiKey> = self
                .store
                .list_keys(Some(&channel.id))
                .await?
                .into_iter()
                .filter(|k| k.status != KeyStatus::Disabled)
                .collect();
            if !keys.is_empty() {
                out.push((channel, keys));
            }
        }
        Ok(out)
    }

    /// 管理接口触发的全量检查：每渠道 5 并发一批，批间停 1 秒
    pub async fn check_all_batched(&self) -> AppResult<usize> {
        let mut checked = 0;
        for (channel, keys) in self.checkable_channels().await? {
            let mut chunks = keys.chunks(BATCH_SIZE).peekable();
            while let Some(batch) = chunks.next() {
                let probes = batch.iter().map(|key| self.check_and_apply(&channel, key));
                checked += futures_util::future::join_all(probes).await.len();
                if chunks.peek().is_some() {
                    tokio::time::sleep(BATCH_PAUSE).await;
                }
            }
        }
        tracing::info!("Key check sweep finished: {} keys probed", checked);
        Ok(checked)
    }

    /// 调度器路径：严格串行，两次探测间停 500 毫秒；
    /// running 翻转后当前探测跑完即停，不再开始新的探测
    pub async fn check_all_paced(&self, running: &AtomicBool) -> AppResult<usize> {
        let mut checked = 0;
        for (channel, keys) in self.checkable_channels().await? {
            for key in &keys {
                if !running.load(Ordering::SeqCst) {
                    return Ok(checked);
                }
                self.check_and_apply(&channel, key).await;
                checked += 1;
                tokio::time::sleep(SERIAL_PAUSE).await;
            }
        }
        Ok(checked)
    }
}
