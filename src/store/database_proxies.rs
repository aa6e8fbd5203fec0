use rusqlite::{Result, Row};

use super::database::Store;
use crate::store::types::{Proxy, ProxyType, now_ms};

#[derive(Debug, Clone, Default)]
pub struct ProxyPatch {
    pub name: Option<String>,
    pub proxy_type: Option<ProxyType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<Option<String>>,
    pub password: Option<Option<String>>,
    pub enabled: Option<bool>,
}

pub(super) fn proxy_from_row(row: &Row<'_>) -> Result<Proxy> {
    let type_raw: String = row.get(2)?;
    let proxy_type = ProxyType::from_db_value(&type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown proxy type: {}", type_raw).into(),
        )
    })?;
    Ok(Proxy {
        id: row.get(0)?,
        name: row.get(1)?,
        proxy_type,
        host: row.get(3)?,
        port: row.get::<_, i64>(4)? as u16,
        username: row.get(5)?,
        password: row.get(6)?,
        enabled: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const PROXY_COLUMNS: &str =
    "id, name, type, host, port, username, password, enabled, created_at, updated_at";

impl Store {
    pub async fn list_proxies(&self) -> Result<Vec<Proxy>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proxies ORDER BY created_at",
            PROXY_COLUMNS
        ))?;
        let rows = stmt.query_map([], proxy_from_row)?;
        rows.collect()
    }

    pub async fn get_proxy(&self, id: &str) -> Result<Option<Proxy>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proxies WHERE id = ?1",
            PROXY_COLUMNS
        ))?;
        let mut rows = stmt.query_map([id], proxy_from_row)?;
        rows.next().transpose()
    }

    pub async fn create_proxy(&self, proxy: &Proxy) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO proxies (id, name, type, host, port, username, password, enabled,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            (
                &proxy.id,
                &proxy.name,
                proxy.proxy_type.as_db_value(),
                &proxy.host,
                proxy.port as i64,
                &proxy.username,
                &proxy.password,
                proxy.enabled as i64,
                proxy.created_at,
                proxy.updated_at,
            ),
        )?;
        Ok(())
    }

    pub async fn update_proxy(&self, id: &str, patch: ProxyPatch) -> Result<Option<Proxy>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM proxies WHERE id = ?1",
            PROXY_COLUMNS
        ))?;
        let Some(mut proxy) = stmt.query_map([id], proxy_from_row)?.next().transpose()? else {
            return Ok(None);
        };
        drop(stmt);

        if let Some(name) = patch.name {
            proxy.name = name;
        }
        if let Some(proxy_type) = patch.proxy_type {
            proxy.proxy_type = proxy_type;
        }
        if let Some(host) = patch.host {
            proxy.host = host;
        }
        if let Some(port) = patch.port {
            proxy.port = port;
        }
        if let Some(username) = patch.username {
            proxy.username = username;
        }
        if let Some(password) = patch.password {
            proxy.password = password;
        }
        if let Some(enabled) = patch.enabled {
            proxy.enabled = enabled;
        }
        proxy.updated_at = now_ms();

        conn.execute(
            "UPDATE proxies SET name = ?2, type = ?3, host = ?4, port = ?5, username = ?6,
                                password = ?7, enabled = ?8, updated_at = ?9
             WHERE id = ?1",
            (
                &proxy.id,
                &proxy.name,
                proxy.proxy_type.as_db_value(),
                &proxy.host,
                proxy.port as i64,
                &proxy.username,
                &proxy.password,
                proxy.enabled as i64,
                proxy.updated_at,
            ),
        )?;
        Ok(Some(proxy))
    }

    /// 弱引用语义：删除代理时在同一事务内清空所有渠道的 proxy_id
    pub async fn delete_proxy(&self, id: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE channels SET proxy_id = NULL, updated_at = ?2 WHERE proxy_id = ?1",
            (id, now_ms()),
        )?;
        let affected = tx.execute("DELETE FROM proxies WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::database_channels::ChannelPatch;
    use crate::store::database_channels::tests::sample_channel;
    use crate::store::types::{ChannelType, new_id};

    pub(crate) fn sample_proxy(name: &str) -> Proxy {
        let now = now_ms();
        Proxy {
            id: new_id(),
            name: name.to_string(),
            proxy_type: ProxyType::Socks5,
            host: "127.0.0.1".to_string(),
            port: 1080,
            username: None,
            password: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn delete_clears_channel_references() {
        let store = Store::open_in_memory().await.unwrap();
        let proxy = sample_proxy("egress");
        store.create_proxy(&proxy).await.unwrap();

        let mut referencing = sample_channel("a", ChannelType::OpenAI);
        referencing.proxy_id = Some(proxy.id.clone());
        store.create_channel(&referencing).await.unwrap();
        let mut also = sample_channel("b", ChannelType::Gemini);
        also.proxy_id = Some(proxy.id.clone());
        store.create_channel(&also).await.unwrap();
        let unrelated = sample_channel("c", ChannelType::Anthropic);
        store.create_channel(&unrelated).await.unwrap();

        assert!(store.delete_proxy(&proxy.id).await.unwrap());

        for channel in store.list_channels().await.unwrap() {
            assert!(channel.proxy_id.is_none());
        }
    }

    #[tokio::test]
    async fn update_round_trip_with_credentials() {
        let store = Store::open_in_memory().await.unwrap();
        let proxy = sample_proxy("egress");
        store.create_proxy(&proxy).await.unwrap();

        let patch = ProxyPatch {
            username: Some(Some("user".to_string())),
            password: Some(Some("secret".to_string())),
            port: Some(9050),
            ..Default::default()
        };
        let updated = store.update_proxy(&proxy.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.username.as_deref(), Some("user"));
        assert_eq!(updated.password.as_deref(), Some("secret"));
        assert_eq!(updated.port, 9050);
    }

    #[tokio::test]
    async fn channel_patch_can_point_at_proxy() {
        let store = Store::open_in_memory().await.unwrap();
        let proxy = sample_proxy("egress");
        store.create_proxy(&proxy).await.unwrap();
        let channel = sample_channel("a", ChannelType::OpenAI);
        store.create_channel(&channel).await.unwrap();

        let patch = ChannelPatch {
            proxy_id: Some(Some(proxy.id.clone())),
            ..Default::default()
        };
        let updated = store
            .update_channel(&channel.id, patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.proxy_id.as_deref(), Some(proxy.id.as_str()));
    }
}
