use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::cache::ContentCache;
use crate::config::AppConfig;
use crate::content::ContentAssembler;
use crate::error::Result;
use crate::fs::HistoryFile;
use crate::fuse::HistoryFs;
use crate::persister::{Persister, PersisterHandle, PersisterStats, WriteQueue};
use crate::storage::{build_store, LogStore};

/// 启动时构建一次的应用上下文，持有存储、缓存、写队列和虚拟文件
pub struct AppContext {
    config: AppConfig,
    store: Arc<dyn LogStore>,
    cache: Arc<ContentCache>,
    queue: WriteQueue,
    file: Arc<HistoryFile>,
    persister: PersisterHandle,
}

impl AppContext {
    /// 校验配置、连接存储、确保表存在，然后启动 persister
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = build_store(&config).await?;
        store.ensure_table().await?;
        Ok(Self::with_store(config, store))
    }

    /// 必须在 tokio 运行时内调用
    pub fn with_store(config: AppConfig, store: Arc<dyn LogStore>) -> Self {
        let cache = Arc::new(ContentCache::new(
            ContentAssembler::new(store.clone()),
            config.cache_freshness_window(),
        ));
        let (queue, persister) = Persister::spawn(
            store.clone(),
            config.queue_capacity,
            config.put_retry_delay(),
            CancellationToken::new(),
        );
        let file = Arc::new(HistoryFile::new(cache.clone(), queue.clone()));
        info!(
            "应用上下文就绪: 文件={}, 队列容量={}, 新鲜度窗口={:?}",
            config.file_name,
            config.queue_capacity,
            config.cache_freshness_window()
        );
        Self {
            config,
            store,
            cache,
            queue,
            file,
            persister,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn LogStore> {
        self.store.clone()
    }

    pub fn cache(&self) -> Arc<ContentCache> {
        self.cache.clone()
    }

    pub fn queue(&self) -> WriteQueue {
        self.queue.clone()
    }

    pub fn file(&self) -> Arc<HistoryFile> {
        self.file.clone()
    }

    pub fn persister_stats(&self) -> Arc<PersisterStats> {
        self.persister.stats()
    }

    /// 构建 FUSE 适配器；`runtime` 用于在 FUSE 线程上驱动异步调用
    pub fn filesystem(&self, runtime: Handle) -> HistoryFs {
        HistoryFs::new(
            self.file.clone(),
            runtime,
            self.config.file_name.clone(),
            self.config.file_mode,
        )
    }

    /// 停止 persister，返回丢失的记录数
    pub async fn shutdown(self) -> u64 {
        let lost = self.persister.shutdown().await;
        if lost > 0 {
            warn!("{} 条历史记录尚未写入远端，将会丢失", lost);
        } else {
            info!("所有历史记录已写入远端");
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::BackendConfig;
    use crate::entry::HistoryEntry;
    use crate::storage::MemoryStore;

    fn test_config() -> AppConfig {
        AppConfig {
            put_retry_delay_ms: 50,
            backend: BackendConfig::Memory,
            ..AppConfig::default()
        }
    }

    async fn drain(ctx: &AppContext) {
        while ctx.persister_stats().pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_bootstrap_memory_backend() {
        let ctx = AppContext::bootstrap(test_config()).await.unwrap();
        assert_eq!(ctx.file().size().await, 1);
        assert_eq!(ctx.shutdown().await, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let config = AppConfig {
            queue_capacity: 0,
            ..test_config()
        };
        assert!(AppContext::bootstrap(config).await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_share_history() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "uptime")]));
        let first = AppContext::with_store(test_config(), store.clone());
        let second = AppContext::with_store(test_config(), store.clone());

        let file = first.file();
        let offset = file.size().await;
        file.write(offset, b"whoami").await.unwrap();
        drain(&first).await;

        assert_eq!(second.file().read(0, 1024).await, b"uptime\nwhoami\n");
        assert_eq!(first.shutdown().await, 0);
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_outage_keeps_local_view_and_retries() {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::with_store(test_config(), store.clone());
        let file = ctx.file();

        store.set_unavailable(true);
        let offset = file.size().await;
        file.write(offset, b"make test\n").await.unwrap();
        assert_eq!(file.read(offset, 10).await, b"make test\n");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.rows().is_empty());
        assert!(ctx.persister_stats().failed_attempts() > 0);

        store.set_unavailable(false);
        drain(&ctx).await;
        assert_eq!(store.rows().len(), 1);
        ctx.shutdown().await;
    }
}
