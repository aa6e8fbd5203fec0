use rusqlite::types::Value;
use rusqlite::{Result, Row};

use super::database::Store;
use crate::store::types::{RequestLog, now_ms};

/// AND 组合的日志筛选；limit/offset 缺省为 50/0
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub channel_id: Option<String>,
    pub status: Option<u16>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

pub(super) fn log_from_row(row: &Row<'_>) -> Result<RequestLog> {
    Ok(RequestLog {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        token_id: row.get(2)?,
        channel_id: row.get(3)?,
        key_id: row.get(4)?,
        model: row.get(5)?,
        path: row.get(6)?,
        method: row.get(7)?,
        status: row.get::<_, i64>(8)? as u16,
        latency: row.get(9)?,
        input_tokens: row.get(10)?,
        output_tokens: row.get(11)?,
        error: row.get(12)?,
        streaming: row.get::<_, i64>(13)? != 0,
    })
}

const LOG_COLUMNS: &str = "id, timestamp, token_id, channel_id, key_id, model, path, method, \
                           status, latency, input_tokens, output_tokens, error_message, streaming";

fn build_where(query: &LogQuery) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(channel_id) = &query.channel_id {
        params.push(Value::Text(channel_id.clone()));
        clauses.push("channel_id = ?");
    }
    if let Some(status) = query.status {
        params.push(Value::Integer(status as i64));
        clauses.push("status = ?");
    }
    if let Some(start) = query.start_time {
        params.push(Value::Integer(start));
        clauses.push("timestamp >= ?");
    }
    if let Some(end) = query.end_time {
        params.push(Value::Integer(end));
        clauses.push("timestamp <= ?");
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        // 占位符按出现顺序编号
        let mut numbered = Vec::with_capacity(clauses.len());
        for (i, clause) in clauses.iter().enumerate() {
            numbered.push(clause.replace('?', &format!("?{}", i + 1)));
        }
        format!(" WHERE {}", numbered.join(" AND "))
    };
    (where_sql, params)
}

impl Store {
    /// 追加一条中继日志，并在同一事务内回收超过保留窗口的旧日志
    pub async fn append_log(&self, log: &RequestLog) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let retention: i64 = conn.query_row(
            "SELECT max_logs_retention FROM settings WHERE id = 1",
            [],
            |row| row.get(0),
        )?;

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM request_logs WHERE timestamp < ?1",
            [now_ms() - retention],
        )?;
        tx.execute(
            "INSERT INTO request_logs (id, timestamp, token_id, channel_id, key_id, model, path,
                                       method, status, latency, input_tokens, output_tokens,
                                       error_message, streaming)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            (
                &log.id,
                log.timestamp,
                &log.token_id,
                &log.channel_id,
                &log.key_id,
                &log.model,
                &log.path,
                &log.method,
                log.status as i64,
                log.latency,
                log.input_tokens,
                log.output_tokens,
                &log.error,
                log.streaming as i64,
            ),
        )?;
        tx.commit()
    }

    /// 返回 (分页切片, 过滤后的总数)，按 timestamp 降序
    pub async fn query_logs(&self, query: &LogQuery) -> Result<(Vec<RequestLog>, u64)> {
        let conn = self.connection.lock().await;
        let (where_sql, params) = build_where(query);

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM request_logs{}", where_sql),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get::<_, i64>(0).map(|v| v as u64),
        )?;

        let limit = query.limit.unwrap_or(50) as i64;
        let offset = query.offset.unwrap_or(0) as i64;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM request_logs{} ORDER BY timestamp DESC LIMIT {} OFFSET {}",
            LOG_COLUMNS, where_sql, limit, offset
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), log_from_row)?;
        let logs: Result<Vec<RequestLog>> = rows.collect();
        Ok((logs?, total))
    }

    /// 聚合用：timestamp >= ts 的全部日志，降序
    pub async fn logs_since(&self, ts: i64) -> Result<Vec<RequestLog>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM request_logs WHERE timestamp >= ?1 ORDER BY timestamp DESC",
            LOG_COLUMNS
        ))?;
        let rows = stmt.query_map([ts], log_from_row)?;
        rows.collect()
    }

    pub async fn count_logs(&self) -> Result<u64> {
        let conn = self.connection.lock().await;
        conn.query_row("SELECT COUNT(*) FROM request_logs", [], |row| {
            row.get::<_, i64>(0).map(|v| v as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::new_id;

    fn sample_log(channel_id: &str, status: u16, timestamp: i64) -> RequestLog {
        RequestLog {
            id: new_id(),
            timestamp,
            token_id: None,
            channel_id: channel_id.to_string(),
            key_id: "k1".to_string(),
            model: "gpt-4o".to_string(),
            path: "/v1/chat/completions".to_string(),
            method: "POST".to_string(),
            status,
            latency: 120,
            input_tokens: None,
            output_tokens: None,
            error: None,
            streaming: false,
        }
    }

    #[tokio::test]
    async fn append_garbage_collects_expired_logs() {
        let store = Store::open_in_memory().await.unwrap();
        let retention = store.get_settings().await.unwrap().max_logs_retention;

        let stale = sample_log("c1", 200, now_ms() - retention - 60_000);
        store.append_log(&stale).await.unwrap();
        // 第二次 append 触发回收
        let fresh = sample_log("c1", 200, now_ms());
        store.append_log(&fresh).await.unwrap();

        let (logs, total) = store.query_logs(&LogQuery::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].id, fresh.id);
    }

    #[tokio::test]
    async fn filters_compose_as_and() {
        let store = Store::open_in_memory().await.unwrap();
        let now = now_ms();
        store.append_log(&sample_log("c1", 200, now - 3000)).await.unwrap();
        store.append_log(&sample_log("c1", 500, now - 2000)).await.unwrap();
        store.append_log(&sample_log("c2", 200, now - 1000)).await.unwrap();

        let query = LogQuery {
            channel_id: Some("c1".to_string()),
            status: Some(200),
            ..Default::default()
        };
        let (logs, total) = store.query_logs(&query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(logs[0].channel_id, "c1");
        assert_eq!(logs[0].status, 200);
    }

    #[tokio::test]
    async fn pagination_reports_filtered_total() {
        let store = Store::open_in_memory().await.unwrap();
        let now = now_ms();
        for i in 0..10 {
            store
                .append_log(&sample_log("c1", 200, now - i * 1000))
                .await
                .unwrap();
        }

        let query = LogQuery {
            limit: Some(3),
            offset: Some(4),
            ..Default::default()
        };
        let (logs, total) = store.query_logs(&query).await.unwrap();
        assert_eq!(total, 10);
        assert_eq!(logs.len(), 3);
        // 降序：偏移 4 后的第一条比前一页旧
        assert!(logs[0].timestamp <= now - 4000);
    }

    #[tokio::test]
    async fn logs_since_is_sorted_descending() {
        let store = Store::open_in_memory().await.unwrap();
        let now = now_ms();
        store.append_log(&sample_log("c1", 200, now - 5000)).await.unwrap();
        store.append_log(&sample_log("c1", 200, now - 1000)).await.unwrap();
        store.append_log(&sample_log("c1", 200, now - 90_000)).await.unwrap();

        let logs = store.logs_since(now - 10_000).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].timestamp >= logs[1].timestamp);
    }
}
