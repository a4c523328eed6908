use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, Result};
use super::LogStore;

/// PostgreSQL 后端：单字段主键 `ts`，时间戳唯一
pub struct PgStore {
    pool: PgPool,
    table: String,
}

impl PgStore {
    /// 惰性连接：URL 解析失败属于配置错误，连接失败在首次调用时暴露
    pub fn connect(url: &str, table: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_lazy(url)
            .map_err(|e| HistoryError::Config(format!("invalid postgres url: {}", e)))?;
        Ok(Self::new(pool, table))
    }

    pub fn new(pool: PgPool, table: String) -> Self {
        Self { pool, table }
    }

    fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }
}

/// 表名经过配置校验，这里只需加双引号
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl LogStore for PgStore {
    async fn scan_all(&self) -> Result<Vec<HistoryEntry>> {
        let sql = format!("SELECT ts, content FROM {}", self.quoted_table());
        let rows: Vec<(i64, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        debug!("scan {}: {} rows", self.table, rows.len());
        Ok(rows
            .into_iter()
            .map(|(timestamp, content)| HistoryEntry { timestamp, content })
            .collect())
    }

    async fn put_one(&self, entry: &HistoryEntry) -> Result<()> {
        // 超时后的重试可能重复写同一行，主键冲突直接忽略
        let sql = format!(
            "INSERT INTO {} (ts, content) VALUES ($1, $2) ON CONFLICT (ts) DO NOTHING",
            self.quoted_table()
        );
        sqlx::query(&sql)
            .bind(entry.timestamp)
            .bind(&entry.content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (ts BIGINT PRIMARY KEY, content TEXT NOT NULL)",
            self.quoted_table()
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| HistoryError::Bootstrap(format!("create table {}: {}", self.table, e)))?;
        info!("表 {} 就绪", self.table);
        Ok(())
    }
}
