use std::sync::atomic::{AtomicI64, Ordering};
use chrono::Utc;

/// 一条历史记录：一次写调用的原始内容，按纳秒时间戳排序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(timestamp: i64, content: impl Into<String>) -> Self {
        Self {
            timestamp,
            content: content.into(),
        }
    }
}

/// 进程内单调递增的纳秒时间戳
///
/// 同一纳秒内的两次写会得到不同的时间戳；跨进程的碰撞无法在这里避免。
#[derive(Debug, Default)]
pub struct TimestampSource {
    last: AtomicI64,
}

impl TimestampSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX);
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if now > last { now } else { last + 1 };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
