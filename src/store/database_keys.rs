use rusqlite::{Result, Row};

use super::database::Store;
use crate::store::types::{ApiKey, KeyStatus, now_ms};

#[derive(Debug, Clone, Default)]
pub struct KeyPatch {
    pub key: Option<String>,
    pub alias: Option<Option<String>>,
    pub status: Option<KeyStatus>,
    pub priority: Option<i64>,
    pub weight: Option<i64>,
}

pub(super) fn key_from_row(row: &Row<'_>) -> Result<ApiKey> {
    let status_raw: String = row.get(4)?;
    Ok(ApiKey {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        key: row.get(2)?,
        alias: row.get(3)?,
        status: KeyStatus::from_db_value(&status_raw),
        priority: row.get(5)?,
        weight: row.get(6)?,
        balance: row.get(7)?,
        last_checked: row.get(8)?,
        last_used: row.get(9)?,
        error_count: row.get(10)?,
        total_requests: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

const KEY_COLUMNS: &str = "id, channel_id, key_value, alias, status, priority, weight, balance, \
                           last_checked, last_used, error_count, total_requests, created_at, \
                           updated_at";

fn insert_key(conn: &rusqlite::Connection, key: &ApiKey) -> Result<()> {
    conn.execute(
        "INSERT INTO api_keys (id, channel_id, key_value, alias, status, priority, weight,
                               balance, last_checked, last_used, error_count,
                               total_requests, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        (
            &key.id,
            &key.channel_id,
            &key.key,
            &key.alias,
            key.status.as_db_value(),
            key.priority,
            key.weight,
            key.balance,
            key.last_checked,
            key.last_used,
            key.error_count,
            key.total_requests,
            key.created_at,
            key.updated_at,
        ),
    )?;
    Ok(())
}

impl Store {
    pub async fn list_keys(&self, channel_id: Option<&str>) -> Result<Vec<ApiKey>> {
        let conn = self.connection.lock().await;
        match channel_id {
            Some(channel_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM api_keys WHERE channel_id = ?1 ORDER BY created_at",
                    KEY_COLUMNS
                ))?;
                let rows = stmt.query_map([channel_id], key_from_row)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM api_keys ORDER BY created_at",
                    KEY_COLUMNS
                ))?;
                let rows = stmt.query_map([], key_from_row)?;
                rows.collect()
            }
        }
    }

    pub async fn get_key(&self, id: &str) -> Result<Option<ApiKey>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_keys WHERE id = ?1",
            KEY_COLUMNS
        ))?;
        let mut rows = stmt.query_map([id], key_from_row)?;
        rows.next().transpose()
    }

    /// 仅 status=active；负载均衡的输入
    pub async fn active_keys_for(&self, channel_id: &str) -> Result<Vec<ApiKey>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_keys WHERE channel_id = ?1 AND status = 'active'
             ORDER BY created_at",
            KEY_COLUMNS
        ))?;
        let rows = stmt.query_map([channel_id], key_from_row)?;
        rows.collect()
    }

    pub async fn create_key(&self, key: &ApiKey) -> Result<()> {
        let conn = self.connection.lock().await;
        insert_key(&conn, key)
    }

    /// 批量导入：单事务追加，要么全部写入要么全部失败
    pub async fn create_keys(&self, keys: &[ApiKey]) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute(
                "INSERT INTO api_keys (id, channel_id, key_value, alias, status, priority, weight,
                                       balance, last_checked, last_used, error_count,
                                       total_requests, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                (
                    &key.id,
                    &key.channel_id,
                    &key.key,
                    &key.alias,
                    key.status.as_db_value(),
                    key.priority,
                    key.weight,
                    key.balance,
                    key.last_checked,
                    key.last_used,
                    key.error_count,
                    key.total_requests,
                    key.created_at,
                    key.updated_at,
                ),
            )?;
        }
        tx.commit()
    }

    pub async fn update_key(&self, id: &str, patch: KeyPatch) -> Result<Option<ApiKey>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM api_keys WHERE id = ?1",
            KEY_COLUMNS
        ))?;
        let Some(mut key) = stmt.query_map([id], key_from_row)?.next().transpose()? else {
            return Ok(None);
        };
        drop(stmt);

        if let Some(value) = patch.key {
            key.key = value;
        }
        if let Some(alias) = patch.alias {
            key.alias = alias;
        }
        if let Some(status) = patch.status {
            key.status = status;
        }
        if let Some(priority) = patch.priority {
            key.priority = priority;
        }
        if let Some(weight) = patch.weight {
            key.weight = weight;
        }
        key.updated_at = now_ms();

        conn.execute(
            "UPDATE api_keys SET key_value = ?2, alias = ?3, status = ?4, priority = ?5,
                                 weight = ?6, updated_at = ?7
             WHERE id = ?1",
            (
                &key.id,
                &key.key,
                &key.alias,
                key.status.as_db_value(),
                key.priority,
                key.weight,
                key.updated_at,
            ),
        )?;
        Ok(Some(key))
    }

    pub async fn delete_key(&self, id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let affected = conn.execute("DELETE FROM api_keys WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// 中继记账：lastUsed/totalRequests/errorCount 一条语句内更新。
    /// 传输层失败时只递增 errorCount（ok=false, counted=false）。
    pub async fn record_key_outcome(&self, id: &str, ok: bool, counted: bool) -> Result<()> {
        let conn = self.connection.lock().await;
        let now = now_ms();
        if counted {
            if ok {
                conn.execute(
                    "UPDATE api_keys SET last_used = ?2, total_requests = total_requests + 1,
                                         error_count = 0, updated_at = ?2
                     WHERE id = ?1",
                    (id, now),
                )?;
            } else {
                conn.execute(
                    "UPDATE api_keys SET last_used = ?2, total_requests = total_requests + 1,
                                         error_count = error_count + 1, updated_at = ?2
                     WHERE id = ?1",
                    (id, now),
                )?;
            }
        } else {
            conn.execute(
                "UPDATE api_keys SET error_count = error_count + 1, updated_at = ?2
                 WHERE id = ?1",
                (id, now),
            )?;
        }
        Ok(())
    }

    /// 探测结果是改写 status 的唯一入口
    pub async fn apply_check_result(
        &self,
        id: &str,
        status: KeyStatus,
        balance: Option<f64>,
    ) -> Result<()> {
        let conn = self.connection.lock().await;
        let now = now_ms();
        let reset = status == KeyStatus::Active;
        if let Some(balance) = balance {
            conn.execute(
                "UPDATE api_keys SET status = ?2, balance = ?3, last_checked = ?4,
                                     error_count = CASE WHEN ?5 THEN 0 ELSE error_count + 1 END,
                                     updated_at = ?4
                 WHERE id = ?1",
                (id, status.as_db_value(), balance, now, reset),
            )?;
        } else {
            conn.execute(
                "UPDATE api_keys SET status = ?2, last_checked = ?3,
                                     error_count = CASE WHEN ?4 THEN 0 ELSE error_count + 1 END,
                                     updated_at = ?3
                 WHERE id = ?1",
                (id, status.as_db_value(), now, reset),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::database_channels::tests::sample_channel;
    use crate::store::types::{ChannelType, new_id};

    pub(crate) fn sample_key(channel_id: &str, value: &str) -> ApiKey {
        let now = now_ms();
        ApiKey {
            id: new_id(),
            channel_id: channel_id.to_string(),
            key: value.to_string(),
            alias: None,
            status: KeyStatus::Unknown,
            priority: 50,
            weight: 50,
            balance: None,
            last_checked: None,
            last_used: None,
            error_count: 0,
            total_requests: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn channel_delete_cascades_to_keys() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();
        for i in 0..5 {
            store
                .create_key(&sample_key(&channel.id, &format!("sk-{}", i)))
                .await
                .unwrap();
        }
        let other = sample_channel("other", ChannelType::Anthropic);
        store.create_channel(&other).await.unwrap();
        let keeper = sample_key(&other.id, "sk-keep");
        store.create_key(&keeper).await.unwrap();

        assert!(store.delete_channel(&channel.id).await.unwrap());

        let remaining = store.list_keys(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keeper.id);
        assert!(
            remaining
                .iter()
                .all(|k| k.channel_id != channel.id)
        );
    }

    #[tokio::test]
    async fn active_keys_filters_by_status() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();

        let mut active = sample_key(&channel.id, "sk-a");
        active.status = KeyStatus::Active;
        store.create_key(&active).await.unwrap();
        let mut dead = sample_key(&channel.id, "sk-b");
        dead.status = KeyStatus::Invalid;
        store.create_key(&dead).await.unwrap();

        let keys = store.active_keys_for(&channel.id).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].id, active.id);
    }

    #[tokio::test]
    async fn batch_create_is_atomic_append() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();

        let keys: Vec<ApiKey> = (0..3)
            .map(|i| sample_key(&channel.id, &format!("sk-{}", i)))
            .collect();
        store.create_keys(&keys).await.unwrap();
        assert_eq!(store.list_keys(Some(&channel.id)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn relay_outcome_bookkeeping() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();
        let key = sample_key(&channel.id, "sk-a");
        store.create_key(&key).await.unwrap();

        store.record_key_outcome(&key.id, false, true).await.unwrap();
        store.record_key_outcome(&key.id, false, true).await.unwrap();
        let loaded = store.get_key(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_requests, 2);
        assert_eq!(loaded.error_count, 2);
        assert!(loaded.last_used.is_some());

        // 2xx 把 errorCount 清零
        store.record_key_outcome(&key.id, true, true).await.unwrap();
        let loaded = store.get_key(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_requests, 3);
        assert_eq!(loaded.error_count, 0);

        // 传输层失败只递增 errorCount
        store.record_key_outcome(&key.id, false, false).await.unwrap();
        let loaded = store.get_key(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_requests, 3);
        assert_eq!(loaded.error_count, 1);
    }

    #[tokio::test]
    async fn check_result_rewrites_status_and_counters() {
        let store = Store::open_in_memory().await.unwrap();
        let channel = sample_channel("main", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();
        let key = sample_key(&channel.id, "sk-a");
        store.create_key(&key).await.unwrap();

        store
            .apply_check_result(&key.id, KeyStatus::Invalid, None)
            .await
            .unwrap();
        let loaded = store.get_key(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, KeyStatus::Invalid);
        assert_eq!(loaded.error_count, 1);
        assert!(loaded.last_checked.is_some());

        store
            .apply_check_result(&key.id, KeyStatus::Active, Some(12.5))
            .await
            .unwrap();
        let loaded = store.get_key(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, KeyStatus::Active);
        assert_eq!(loaded.error_count, 0);
        assert_eq!(loaded.balance, Some(12.5));
    }
}
