use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use crate::content::ContentAssembler;

/// 缓存状态
#[derive(Debug)]
struct CacheState {
    content: String,
    /// 最近一次成功刷新时间，None 表示还没有成功过
    last_refreshed: Option<Instant>,
}

/// 组装结果的缓存
///
/// 新鲜度窗口内直接返回缓存，不访问远端；刷新失败时继续返回上一次的内容。
/// 在第一次成功之前返回空字符串。
pub struct ContentCache {
    assembler: ContentAssembler,
    freshness_window: Duration,
    state: Mutex<CacheState>,
}

impl ContentCache {
    pub fn new(assembler: ContentAssembler, freshness_window: Duration) -> Self {
        Self {
            assembler,
            freshness_window,
            state: Mutex::new(CacheState {
                content: String::new(),
                last_refreshed: None,
            }),
        }
    }

    /// 获取内容，从不返回错误
    pub async fn get(&self) -> String {
        // 刷新期间持有锁，并发调用者等待同一次刷新的结果
        let mut state = self.state.lock().await;

        if let Some(refreshed) = state.last_refreshed {
            let age = refreshed.elapsed();
            if age < self.freshness_window {
                debug!("缓存命中, age={:?}", age);
                return state.content.clone();
            }
        }

        match self.assembler.get().await {
            Ok(content) => {
                debug!("缓存刷新成功, {} bytes", content.len());
                state.content = content;
                state.last_refreshed = Some(Instant::now());
            }
            Err(e) => {
                warn!("缓存刷新失败，返回旧内容 ({} bytes): {}", state.content.len(), e);
            }
        }
        state.content.clone()
    }

    /// 是否已经成功刷新过
    pub async fn is_warm(&self) -> bool {
        self.state.lock().await.last_refreshed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::entry::HistoryEntry;
    use crate::storage::MemoryStore;

    fn cache_over(store: Arc<MemoryStore>, window: Duration) -> ContentCache {
        ContentCache::new(ContentAssembler::new(store), window)
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_window_scans_once() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        let cache = cache_over(store.clone(), Duration::from_secs(1));

        let first = cache.get().await;
        store.push_row(HistoryEntry::new(2, "pwd"));
        let second = cache.get().await;

        assert_eq!(first, "ls\n");
        assert_eq!(first, second);
        assert_eq!(store.scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_window() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        let cache = cache_over(store.clone(), Duration::from_secs(1));

        assert_eq!(cache.get().await, "ls\n");
        store.push_row(HistoryEntry::new(2, "pwd"));
        tokio::time::advance(Duration::from_secs(1)).await;

        assert_eq!(cache.get().await, "ls\npwd\n");
        assert_eq!(store.scan_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        let cache = cache_over(store.clone(), Duration::from_secs(1));
        assert_eq!(cache.get().await, "ls\n");

        store.push_row(HistoryEntry::new(2, "pwd"));
        store.set_unavailable(true);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get().await, "ls\n");

        // 失败不会更新刷新时间，下一次调用会再次尝试
        store.set_unavailable(false);
        assert_eq!(cache.get().await, "ls\npwd\n");
        assert_eq!(store.scan_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_before_first_success() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        store.set_unavailable(true);
        let cache = cache_over(store.clone(), Duration::from_secs(1));

        assert_eq!(cache.get().await, "");
        assert!(!cache.is_warm().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_refresh() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        store.set_latency(Duration::from_millis(50));
        let cache = Arc::new(cache_over(store.clone(), Duration::from_secs(1)));

        let results = futures::future::join_all((0..8).map(|_| {
            let cache = cache.clone();
            async move { cache.get().await }
        }))
        .await;

        assert!(results.iter().all(|c| c == "ls\n"));
        assert_eq!(store.scan_count(), 1);
    }
}
