use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use tracing::debug;
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, Result};
use super::LogStore;

/// 进程内日志存储
///
/// 支持注入失败和延迟，并统计扫描/写入次数。
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<HistoryEntry>>,
    latency: Mutex<Duration>,
    unavailable: AtomicBool,
    failing_scans: AtomicUsize,
    failing_puts: AtomicUsize,
    scans: AtomicUsize,
    put_attempts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置记录，扫描时按插入顺序返回
    pub fn with_rows(rows: Vec<HistoryEntry>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<HistoryEntry> {
        self.rows.lock().unwrap().clone()
    }

    pub fn push_row(&self, entry: HistoryEntry) {
        self.rows.lock().unwrap().push(entry);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// 整体不可用：所有扫描和写入都失败
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 接下来的 n 次扫描失败
    pub fn fail_next_scans(&self, n: usize) {
        self.failing_scans.store(n, Ordering::SeqCst);
    }

    /// 接下来的 n 次写入失败
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn scan_all(&self) -> Result<Vec<HistoryEntry>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.unavailable.load(Ordering::SeqCst) || Self::take_failure(&self.failing_scans) {
            return Err(HistoryError::Store("memory store: injected scan failure".into()));
        }
        let rows = self.rows();
        debug!("memory scan: {} rows", rows.len());
        Ok(rows)
    }

    async fn put_one(&self, entry: &HistoryEntry) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.unavailable.load(Ordering::SeqCst) || Self::take_failure(&self.failing_puts) {
            return Err(HistoryError::Store("memory store: injected put failure".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        // 同一时间戳覆盖写，与 DynamoDB 的 PutItem 一致
        match rows.iter_mut().find(|row| row.timestamp == entry.timestamp) {
            Some(row) => *row = entry.clone(),
            None => rows.push(entry.clone()),
        }
        Ok(())
    }

    async fn ensure_table(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_puts(2);

        let entry = HistoryEntry::new(1, "echo hi");
        assert!(store.put_one(&entry).await.is_err());
        assert!(store.put_one(&entry).await.is_err());
        assert!(store.put_one(&entry).await.is_ok());
        assert_eq!(store.put_attempts(), 3);
        assert_eq!(store.rows(), vec![entry]);
    }

    #[tokio::test]
    async fn test_put_same_timestamp_overwrites() {
        let store = MemoryStore::new();
        store.put_one(&HistoryEntry::new(5, "a")).await.unwrap();
        store.put_one(&HistoryEntry::new(5, "a")).await.unwrap();
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_scans() {
        let store = MemoryStore::with_rows(vec![HistoryEntry::new(1, "x")]);
        store.set_unavailable(true);
        assert!(store.scan_all().await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.scan_all().await.unwrap().len(), 1);
        assert_eq!(store.scan_count(), 2);
    }
}
