//! 写队列与持久化 worker。
//!
//! 写调用只把记录放进有界队列就返回；唯一的 worker 按 FIFO 顺序取出记录，
//! 对每条记录无限重试直到写入成功。单消费者保证了远端的写入顺序与提交顺序一致，
//! 代价是一条卡住的记录会阻塞它后面的所有记录。队列满时提交方阻塞，不丢弃。
//! 进程退出时仍在队列中的记录会丢失。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::entry::HistoryEntry;
use crate::error::{HistoryError, Result};
use crate::storage::LogStore;

/// worker 的积压与健康状况
#[derive(Debug, Default)]
pub struct PersisterStats {
    pending: AtomicU64,
    persisted: AtomicU64,
    failed_attempts: AtomicU64,
}

impl PersisterStats {
    /// 已入队但尚未写入成功的记录数
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Display for PersisterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending={}, persisted={}, failed_attempts={}",
            self.pending(),
            self.persisted(),
            self.failed_attempts()
        )
    }
}

/// 写队列的生产者端，可以克隆给多个调用方
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<HistoryEntry>,
    stats: Arc<PersisterStats>,
}

impl WriteQueue {
    /// 入队；队列满时等待，worker 已停止时返回错误
    pub async fn enqueue(&self, entry: HistoryEntry) -> Result<()> {
        let permit = self.tx.reserve().await.map_err(|_| HistoryError::QueueClosed)?;
        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(entry);
        Ok(())
    }

    pub fn stats(&self) -> &PersisterStats {
        &self.stats
    }
}

/// 正在运行的 worker
pub struct PersisterHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
    stats: Arc<PersisterStats>,
}

impl PersisterHandle {
    pub fn stats(&self) -> Arc<PersisterStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// 停止 worker，返回未写入的记录数
    pub async fn shutdown(self) -> u64 {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("persister task ended abnormally: {}", e);
        }
        self.stats.pending()
    }
}

pub struct Persister {
    rx: mpsc::Receiver<HistoryEntry>,
    store: Arc<dyn LogStore>,
    retry_delay: Duration,
    cancel: CancellationToken,
    stats: Arc<PersisterStats>,
}

impl Persister {
    /// 创建容量为 `capacity` 的队列并启动 worker
    pub fn spawn(
        store: Arc<dyn LogStore>,
        capacity: usize,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> (WriteQueue, PersisterHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(PersisterStats::default());
        let persister = Persister {
            rx,
            store,
            retry_delay,
            cancel: cancel.clone(),
            stats: stats.clone(),
        };
        let join = tokio::spawn(persister.run());
        (
            WriteQueue { tx, stats: stats.clone() },
            PersisterHandle { join, cancel, stats },
        )
    }

    async fn run(mut self) {
        info!("persister started, retry_delay={:?}", self.retry_delay);
        loop {
            let entry = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(entry) => entry,
                    None => break,
                },
            };
            if !self.persist(&entry).await {
                break;
            }
        }
        info!("persister stopped: {}", self.stats);
    }

    /// 无限重试直到成功；只有取消才会返回 false
    async fn persist(&self, entry: &HistoryEntry) -> bool {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.store.put_one(entry).await {
                Ok(()) => {
                    self.stats.persisted.fetch_add(1, Ordering::SeqCst);
                    self.stats.pending.fetch_sub(1, Ordering::SeqCst);
                    debug!("persisted ts={} after {} attempt(s)", entry.timestamp, attempt);
                    return true;
                }
                Err(e) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        "unable to persist ts={} (attempt {}), retrying in {:?}: {}",
                        entry.timestamp, attempt, self.retry_delay, e
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}
