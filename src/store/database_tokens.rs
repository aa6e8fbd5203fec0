use rusqlite::{Result, Row};

use super::database::Store;
use crate::store::types::{Token, now_ms};

#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub name: Option<String>,
    pub allowed_channels: Option<Vec<String>>,
    pub rate_limit: Option<Option<u32>>,
    pub enabled: Option<bool>,
}

pub(super) fn token_from_row(row: &Row<'_>) -> Result<Token> {
    let allowed_raw: String = row.get(3)?;
    let allowed_channels: Vec<String> = serde_json::from_str(&allowed_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Token {
        id: row.get(0)?,
        name: row.get(1)?,
        token: row.get(2)?,
        allowed_channels,
        rate_limit: row.get::<_, Option<i64>>(4)?.map(|v| v as u32),
        enabled: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        last_used: row.get(7)?,
    })
}

const TOKEN_COLUMNS: &str =
    "id, name, token, allowed_channels, rate_limit, enabled, created_at, last_used";

impl Store {
    pub async fn list_tokens(&self) -> Result<Vec<Token>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tokens ORDER BY created_at",
            TOKEN_COLUMNS
        ))?;
        let rows = stmt.query_map([], token_from_row)?;
        rows.collect()
    }

    pub async fn get_token(&self, id: &str) -> Result<Option<Token>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tokens WHERE id = ?1",
            TOKEN_COLUMNS
        ))?;
        let mut rows = stmt.query_map([id], token_from_row)?;
        rows.next().transpose()
    }

    /// AuthGate 的入口查找：按密文值定位
    pub async fn token_by_value(&self, value: &str) -> Result<Option<Token>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tokens WHERE token = ?1",
            TOKEN_COLUMNS
        ))?;
        let mut rows = stmt.query_map([value], token_from_row)?;
        rows.next().transpose()
    }

    pub async fn create_token(&self, token: &Token) -> Result<()> {
        let conn = self.connection.lock().await;
        let allowed = serde_json::to_string(&token.allowed_channels).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "INSERT INTO tokens (id, name, token, allowed_channels, rate_limit, enabled,
                                 created_at, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                &token.id,
                &token.name,
                &token.token,
                allowed,
                token.rate_limit.map(|v| v as i64),
                token.enabled as i64,
                token.created_at,
                token.last_used,
            ),
        )?;
        Ok(())
    }

    pub async fn update_token(&self, id: &str, patch: TokenPatch) -> Result<Option<Token>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tokens WHERE id = ?1",
            TOKEN_COLUMNS
        ))?;
        let Some(mut token) = stmt.query_map([id], token_from_row)?.next().transpose()? else {
            return Ok(None);
        };
        drop(stmt);

        if let Some(name) = patch.name {
            token.name = name;
        }
        if let Some(allowed) = patch.allowed_channels {
            token.allowed_channels = allowed;
        }
        if let Some(rate_limit) = patch.rate_limit {
            token.rate_limit = rate_limit;
        }
        if let Some(enabled) = patch.enabled {
            token.enabled = enabled;
        }

        let allowed = serde_json::to_string(&token.allowed_channels).unwrap_or_else(|_| "[]".into());
        conn.execute(
            "UPDATE tokens SET name = ?2, allowed_channels = ?3, rate_limit = ?4, enabled = ?5
             WHERE id = ?1",
            (
                &token.id,
                &token.name,
                allowed,
                token.rate_limit.map(|v| v as i64),
                token.enabled as i64,
            ),
        )?;
        Ok(Some(token))
    }

    pub async fn delete_token(&self, id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let affected = conn.execute("DELETE FROM tokens WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// 尽力而为的 lastUsed 更新，AuthGate 异步触发
    pub async fn touch_token_used(&self, id: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(
            "UPDATE tokens SET last_used = ?2 WHERE id = ?1",
            (id, now_ms()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::types::{generate_token_value, new_id};

    pub(crate) fn sample_token(name: &str) -> Token {
        Token {
            id: new_id(),
            name: name.to_string(),
            token: generate_token_value(),
            allowed_channels: Vec::new(),
            rate_limit: None,
            enabled: true,
            created_at: now_ms(),
            last_used: None,
        }
    }

    #[tokio::test]
    async fn lookup_by_value() {
        let store = Store::open_in_memory().await.unwrap();
        let token = sample_token("ci");
        store.create_token(&token).await.unwrap();

        let found = store.token_by_value(&token.token).await.unwrap().unwrap();
        assert_eq!(found.id, token.id);
        assert!(store.token_by_value("kh-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allowed_channels_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        let mut token = sample_token("scoped");
        token.allowed_channels = vec!["c1".to_string(), "c2".to_string()];
        token.rate_limit = Some(10);
        store.create_token(&token).await.unwrap();

        let loaded = store.get_token(&token.id).await.unwrap().unwrap();
        assert_eq!(loaded.allowed_channels, vec!["c1", "c2"]);
        assert_eq!(loaded.rate_limit, Some(10));
    }

    #[tokio::test]
    async fn patch_clears_rate_limit() {
        let store = Store::open_in_memory().await.unwrap();
        let mut token = sample_token("limited");
        token.rate_limit = Some(5);
        store.create_token(&token).await.unwrap();

        let patch = TokenPatch {
            rate_limit: Some(None),
            enabled: Some(false),
            ..Default::default()
        };
        let updated = store.update_token(&token.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.rate_limit, None);
        assert!(!updated.enabled);
    }

    #[tokio::test]
    async fn touch_sets_last_used() {
        let store = Store::open_in_memory().await.unwrap();
        let token = sample_token("used");
        store.create_token(&token).await.unwrap();
        store.touch_token_used(&token.id).await.unwrap();
        let loaded = store.get_token(&token.id).await.unwrap().unwrap();
        assert!(loaded.last_used.is_some());
    }
}
