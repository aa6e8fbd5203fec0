use rusqlite::{Connection, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::types::{AppSettings, DEFAULT_CHECK_INTERVAL_MS, DEFAULT_LOGS_RETENTION_MS};

/// 所有持久化状态的唯一所有者；互斥锁串行化全部写入，
/// 多步不变式（级联删除、代理解引用、日志回收）在单个事务内完成。
#[derive(Clone)]
pub struct Store {
    pub(super) connection: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn new(database_path: &str) -> Result<Self> {
        if database_path != ":memory:"
            && let Some(parent) = std::path::Path::new(database_path).parent()
            && !parent.exists()
        {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                ));
            }
            tracing::info!("Created database directory: {}", parent.display());
        }

        let conn = Connection::open(database_path)?;
        Self::init_schema(&conn)?;
        tracing::info!("Store initialized at: {}", database_path);

        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// 测试用内存库
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                base_url TEXT NOT NULL,
                test_method TEXT NOT NULL DEFAULT 'models',
                test_model TEXT,
                proxy_id TEXT,
                load_balance_strategy TEXT NOT NULL DEFAULT 'round-robin',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                key_value TEXT NOT NULL,
                alias TEXT,
                status TEXT NOT NULL DEFAULT 'unknown',
                priority INTEGER NOT NULL DEFAULT 50,
                weight INTEGER NOT NULL DEFAULT 50,
                balance REAL,
                last_checked INTEGER,
                last_used INTEGER,
                error_count INTEGER NOT NULL DEFAULT 0,
                total_requests INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_api_keys_channel ON api_keys (channel_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS proxies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT,
                password TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tokens (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                token TEXT NOT NULL UNIQUE,
                allowed_channels TEXT NOT NULL DEFAULT '[]',
                rate_limit INTEGER,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                last_used INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS request_logs (
                id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                token_id TEXT,
                channel_id TEXT NOT NULL,
                key_id TEXT NOT NULL,
                model TEXT NOT NULL,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                status INTEGER NOT NULL,
                latency INTEGER NOT NULL,
                input_tokens INTEGER,
                output_tokens INTEGER,
                error_message TEXT,
                streaming INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs (timestamp)",
            [],
        )?;

        // 单行设置表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                check_interval INTEGER NOT NULL,
                max_logs_retention INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO settings (id, check_interval, max_logs_retention)
             VALUES (1, ?1, ?2)",
            (DEFAULT_CHECK_INTERVAL_MS, DEFAULT_LOGS_RETENTION_MS),
        )?;

        Ok(())
    }

    pub async fn get_settings(&self) -> Result<AppSettings> {
        let conn = self.connection.lock().await;
        conn.query_row(
            "SELECT check_interval, max_logs_retention FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(AppSettings {
                    check_interval: row.get(0)?,
                    max_logs_retention: row.get(1)?,
                })
            },
        )
    }

    pub async fn update_settings(
        &self,
        check_interval: Option<i64>,
        max_logs_retention: Option<i64>,
    ) -> Result<AppSettings> {
        let conn = self.connection.lock().await;
        if let Some(interval) = check_interval {
            conn.execute(
                "UPDATE settings SET check_interval = ?1 WHERE id = 1",
                [interval],
            )?;
        }
        if let Some(retention) = max_logs_retention {
            conn.execute(
                "UPDATE settings SET max_logs_retention = ?1 WHERE id = 1",
                [retention],
            )?;
        }
        conn.query_row(
            "SELECT check_interval, max_logs_retention FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(AppSettings {
                    check_interval: row.get(0)?,
                    max_logs_retention: row.get(1)?,
                })
            },
        )
    }
}
