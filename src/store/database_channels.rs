use rusqlite::{Result, Row};

use super::database::Store;
use crate::store::types::{Channel, ChannelType, LoadBalanceStrategy, TestMethod, now_ms};

/// 部分更新；`None` 表示保持原值，嵌套 `Option` 表达可清空字段
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    pub name: Option<String>,
    pub channel_type: Option<ChannelType>,
    pub base_url: Option<String>,
    pub test_method: Option<TestMethod>,
    pub test_model: Option<Option<String>>,
    pub proxy_id: Option<Option<String>>,
    pub load_balance_strategy: Option<LoadBalanceStrategy>,
    pub enabled: Option<bool>,
}

pub(super) fn channel_from_row(row: &Row<'_>) -> Result<Channel> {
    let type_raw: String = row.get(2)?;
    let channel_type = ChannelType::from_db_value(&type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown channel type: {}", type_raw).into(),
        )
    })?;
    let method_raw: String = row.get(4)?;
    let test_method = TestMethod::from_db_value(&method_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown test method: {}", method_raw).into(),
        )
    })?;
    let strategy_raw: String = row.get(7)?;

    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type,
        base_url: row.get(3)?,
        test_method,
        test_model: row.get(5)?,
        proxy_id: row.get(6)?,
        load_balance_strategy: LoadBalanceStrategy::from_db_value(&strategy_raw),
        enabled: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const CHANNEL_COLUMNS: &str = "id, name, type, base_url, test_method, test_model, proxy_id, \
                               load_balance_strategy, enabled, created_at, updated_at";

impl Store {
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channels ORDER BY created_at",
            CHANNEL_COLUMNS
        ))?;
        let rows = stmt.query_map([], channel_from_row)?;
        rows.collect()
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channels WHERE id = ?1",
            CHANNEL_COLUMNS
        ))?;
        let mut rows = stmt.query_map([id], channel_from_row)?;
        rows.next().transpose()
    }

    pub async fn create_channel(&self, channel: &Channel) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO channels (id, name, type, base_url, test_method, test_model, proxy_id,
                                   load_balance_strategy, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            (
                &channel.id,
                &channel.name,
                channel.channel_type.as_db_value(),
                &channel.base_url,
                channel.test_method.as_db_value(),
                &channel.test_model,
                &channel.proxy_id,
                channel.load_balance_strategy.as_db_value(),
                channel.enabled as i64,
                channel.created_at,
                channel.updated_at,
            ),
        )?;
        Ok(())
    }

    /// 空 patch 仅刷新 updated_at
    pub async fn update_channel(&self, id: &str, patch: ChannelPatch) -> Result<Option<Channel>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM channels WHERE id = ?1",
            CHANNEL_COLUMNS
        ))?;
        let Some(mut channel) = stmt.query_map([id], channel_from_row)?.next().transpose()?
        else {
            return Ok(None);
        };
        drop(stmt);

        if let Some(name) = patch.name {
            channel.name = name;
        }
        if let Some(channel_type) = patch.channel_type {
            channel.channel_type = channel_type;
        }
        if let Some(base_url) = patch.base_url {
            channel.base_url = base_url;
        }
        if let Some(test_method) = patch.test_method {
            channel.test_method = test_method;
        }
        if let Some(test_model) = patch.test_model {
            channel.test_model = test_model;
        }
        if let Some(proxy_id) = patch.proxy_id {
            channel.proxy_id = proxy_id;
        }
        if let Some(strategy) = patch.load_balance_strategy {
            channel.load_balance_strategy = strategy;
        }
        if let Some(enabled) = patch.enabled {
            channel.enabled = enabled;
        }
        channel.updated_at = now_ms();

        conn.execute(
            "UPDATE channels SET name = ?2, type = ?3, base_url = ?4, test_method = ?5,
                                 test_model = ?6, proxy_id = ?7, load_balance_strategy = ?8,
                                 enabled = ?9, updated_at = ?10
             WHERE id = ?1",
            (
                &channel.id,
                &channel.name,
                channel.channel_type.as_db_value(),
                &channel.base_url,
                channel.test_method.as_db_value(),
                &channel.test_model,
                &channel.proxy_id,
                channel.load_balance_strategy.as_db_value(),
                channel.enabled as i64,
                channel.updated_at,
            ),
        )?;
        Ok(Some(channel))
    }

    /// 级联删除该渠道下的全部密钥，单事务内完成
    pub async fn delete_channel(&self, id: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM api_keys WHERE channel_id = ?1", [id])?;
        let affected = tx.execute("DELETE FROM channels WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::types::new_id;

    pub(crate) fn sample_channel(name: &str, channel_type: ChannelType) -> Channel {
        let now = now_ms();
        Channel {
            id: new_id(),
            name: name.to_string(),
            channel_type,
            base_url: "https://api.example.com".to_string(),
            test_method: TestMethod::Models,
            test_model: None,
            proxy_id: None,
            load_balance_strategy: LoadBalanceStrategy::RoundRobin,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();

        let loaded = store.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "main");
        assert_eq!(loaded.channel_type, ChannelType::OpenAI);
        assert!(loaded.enabled);
    }

    #[tokio::test]
    async fn missing_id_is_none_not_error() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.get_channel("nope").await.unwrap().is_none());
        assert!(!store.delete_channel("nope").await.unwrap());
    }

    #[tokio::test]
    async fn empty_patch_only_touches_updated_at() {
        let store = Store::open_in_memory().await.unwrap();
        let mut channel = sample_channel("main", ChannelType::Gemini);
        channel.updated_at -= 10_000;
        store.create_channel(&channel).await.unwrap();

        let updated = store
            .update_channel(&channel.id, ChannelPatch::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, channel.name);
        assert_eq!(updated.base_url, channel.base_url);
        assert!(updated.updated_at > channel.updated_at);
    }

    #[tokio::test]
    async fn patch_can_clear_proxy_reference() {
        let store = Store::open_in_memory().await.unwrap();
        let mut channel = sample_channel("proxied", ChannelType::OpenAI);
        channel.proxy_id = Some("p1".to_string());
        store.create_channel(&channel).await.unwrap();

        let patch = ChannelPatch {
            proxy_id: Some(None),
            ..Default::default()
        };
        let updated = store
            .update_channel(&channel.id, patch)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.proxy_id.is_none());
    }
}
