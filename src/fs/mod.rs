//! 虚拟文件状态：唯一一个历史文件的内存缓冲区。
//!
//! 缓冲区在第一次 getattr/read/write 时从内容缓存加载一次，之后只被写调用按偏移打补丁。
//! 写调用同时把原始内容交给写队列异步持久化。持久化的是写入的原始字节而不是差量，
//! 这假设写入都是追加式的（shell 刷历史就是这样）；任意偏移的写仍然会在本地生效，
//! 但远端顺序反映的是提交时间而不是文件位置。

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error};
use crate::cache::ContentCache;
use crate::entry::{HistoryEntry, TimestampSource};
use crate::error::{HistoryError, Result};
use crate::persister::WriteQueue;

#[derive(Debug, Default)]
struct FileBuffer {
    data: Vec<u8>,
    loaded: bool,
}

pub struct HistoryFile {
    cache: Arc<ContentCache>,
    queue: WriteQueue,
    clock: TimestampSource,
    buffer: Mutex<FileBuffer>,
    /// 串行化“取时间戳 + 入队”，使时间戳顺序与入队顺序一致
    submit: Mutex<()>,
}

impl HistoryFile {
    pub fn new(cache: Arc<ContentCache>, queue: WriteQueue) -> Self {
        Self {
            cache,
            queue,
            clock: TimestampSource::new(),
            buffer: Mutex::new(FileBuffer::default()),
            submit: Mutex::new(()),
        }
    }

    /// 返回已加载的缓冲区；并发的首次调用只会加载一次
    async fn loaded(&self) -> MutexGuard<'_, FileBuffer> {
        let mut buffer = self.buffer.lock().await;
        if !buffer.loaded {
            let content = self.cache.get().await;
            debug!("history file loaded, {} bytes", content.len());
            buffer.data = content.into_bytes();
            buffer.loaded = true;
        }
        buffer
    }

    pub async fn is_loaded(&self) -> bool {
        self.buffer.lock().await.loaded
    }

    pub async fn size(&self) -> u64 {
        self.loaded().await.data.len() as u64
    }

    /// 读取 `[offset, offset + size)`，超出文件末尾的部分被截掉
    pub async fn read(&self, offset: u64, size: usize) -> Vec<u8> {
        let buffer = self.loaded().await;
        let len = buffer.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size).min(len);
        buffer.data[start..end].to_vec()
    }

    /// 在本地打补丁并提交持久化；返回值总是 `data.len()`
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| HistoryError::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| HistoryError::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

        {
            let mut buffer = self.loaded().await;
            if end > buffer.data.len() {
                buffer.data.resize(end, 0);
            }
            buffer.data[start..end].copy_from_slice(data);
        }

        let _order = self.submit.lock().await;
        let entry = HistoryEntry::new(
            self.clock.next(),
            String::from_utf8_lossy(data).into_owned(),
        );
        debug!("write offset={} len={} ts={}", offset, data.len(), entry.timestamp);
        if let Err(e) = self.queue.enqueue(entry).await {
            error!("history entry dropped, write queue unavailable: {}", e);
        }
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use crate::content::ContentAssembler;
    use crate::persister::{Persister, PersisterHandle};
    use crate::storage::MemoryStore;

    fn history_file(store: Arc<MemoryStore>) -> (HistoryFile, PersisterHandle) {
        let cache = Arc::new(ContentCache::new(
            ContentAssembler::new(store.clone()),
            Duration::from_secs(1),
        ));
        let (queue, handle) = Persister::spawn(
            store,
            16,
            Duration::from_millis(100),
            CancellationToken::new(),
        );
        (HistoryFile::new(cache, queue), handle)
    }

    #[tokio::test]
    async fn test_read_is_clipped() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "hello")]));
        let (file, _handle) = history_file(store);

        assert_eq!(file.size().await, 6);
        assert_eq!(file.read(0, 100).await, b"hello\n");
        assert_eq!(file.read(3, 2).await, b"lo");
        assert_eq!(file.read(6, 10).await, b"");
        assert_eq!(file.read(1000, 10).await, b"");
    }

    #[tokio::test]
    async fn test_write_then_read_without_remote() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let (file, _handle) = history_file(store.clone());

        let written = file.write(0, b"git push\n").await.unwrap();
        assert_eq!(written, 9);
        assert_eq!(file.read(0, 9).await, b"git push\n");
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_write_past_end_extends() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ab")]));
        let (file, _handle) = history_file(store);

        file.write(5, b"xyz").await.unwrap();
        let content = file.read(0, 100).await;
        assert_eq!(content.len(), 8);
        assert_eq!(&content[..3], b"ab\n");
        assert_eq!(&content[5..], b"xyz");
    }

    #[tokio::test]
    async fn test_write_inside_buffer_patches() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "abcdef")]));
        let (file, _handle) = history_file(store);

        file.write(1, b"XY").await.unwrap();
        assert_eq!(file.read(0, 100).await, b"aXYdef\n");
    }

    #[tokio::test]
    async fn test_writes_are_persisted_in_order() {
        let store = Arc::new(MemoryStore::new());
        let (file, handle) = history_file(store.clone());

        let mut offset = file.size().await;
        for line in ["ls\n", "cd /tmp\n", "make\n"] {
            offset += file.write(offset, line.as_bytes()).await.unwrap() as u64;
        }
        while handle.stats().pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let rows = store.rows();
        let contents: Vec<&str> = rows.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["ls\n", "cd /tmp\n", "make\n"]);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_concurrent_first_load_happens_once() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        store.set_latency(Duration::from_millis(20));
        let (file, _handle) = history_file(store.clone());
        let file = Arc::new(file);

        let sizes = futures::future::join_all((0..8).map(|_| {
            let file = file.clone();
            async move { file.size().await }
        }))
        .await;

        assert!(sizes.iter().all(|&s| s == 3));
        assert_eq!(store.scan_count(), 1);
        assert!(file.is_loaded().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_not_reseeded_after_load() {
        let store = Arc::new(MemoryStore::with_rows(vec![HistoryEntry::new(1, "ls")]));
        let (file, _handle) = history_file(store.clone());

        assert_eq!(file.read(0, 100).await, b"ls\n");
        store.push_row(HistoryEntry::new(2, "pwd"));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(file.read(0, 100).await, b"ls\n");
    }
}
