use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tracing::info;
use crate::config::{AppConfig, BackendConfig};
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, Result};

pub mod dynamodb;
pub mod memory;
pub mod postgres;

pub use dynamodb::DynamoStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// 远端日志存储：只有“扫描全部”和“写入一行”两种操作
///
/// 实现方不做重试，也不保证返回顺序；重试策略由调用方决定。
#[async_trait]
pub trait LogStore: Send + Sync {
    /// 读取全部记录，行在这里完成类型化解码
    async fn scan_all(&self) -> Result<Vec<HistoryEntry>>;

    /// 写入一行；对同一条记录重复写入必须是幂等的
    async fn put_one(&self, entry: &HistoryEntry) -> Result<()>;

    /// 启动时确保表存在
    async fn ensure_table(&self) -> Result<()>;
}

/// 给每次远端调用套上固定超时
pub struct TimedStore {
    inner: Arc<dyn LogStore>,
    scan_timeout: Duration,
    put_timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn LogStore>, scan_timeout: Duration, put_timeout: Duration) -> Self {
        Self {
            inner,
            scan_timeout,
            put_timeout,
        }
    }
}

#[async_trait]
impl LogStore for TimedStore {
    async fn scan_all(&self) -> Result<Vec<HistoryEntry>> {
        tokio::time::timeout(self.scan_timeout, self.inner.scan_all())
            .await
            .map_err(|_| HistoryError::Timeout(self.scan_timeout))?
    }

    async fn put_one(&self, entry: &HistoryEntry) -> Result<()> {
        tokio::time::timeout(self.put_timeout, self.inner.put_one(entry))
            .await
            .map_err(|_| HistoryError::Timeout(self.put_timeout))?
    }

    async fn ensure_table(&self) -> Result<()> {
        self.inner.ensure_table().await
    }
}

/// 按配置构建后端，并套上超时
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn LogStore>> {
    let backend: Arc<dyn LogStore> = match &config.backend {
        BackendConfig::Dynamodb { region, endpoint_url } => {
            info!("使用 DynamoDB 后端, 表={}", config.table_name);
            Arc::new(
                DynamoStore::connect(
                    config.table_name.clone(),
                    region.as_deref(),
                    endpoint_url.as_deref(),
                )
                .await?,
            )
        }
        BackendConfig::Postgres { url } => {
            info!("使用 PostgreSQL 后端, 表={}", config.table_name);
            Arc::new(PgStore::connect(url, config.table_name.clone())?)
        }
        BackendConfig::Memory => {
            info!("使用内存后端，记录不会持久化");
            Arc::new(MemoryStore::new())
        }
    };

    Ok(Arc::new(TimedStore::new(
        backend,
        config.scan_timeout(),
        config.put_timeout(),
    )))
}
