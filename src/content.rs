use std::sync::Arc;
use tracing::debug;
use crate::entry::HistoryEntry;
use crate::error::Result;
use crate::storage::LogStore;

/// 把远端无序日志组装成一份有序文本
pub struct ContentAssembler {
    store: Arc<dyn LogStore>,
}

impl ContentAssembler {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// 扫描全部记录并重新组装；任何扫描或解码错误都直接返回，不产生部分结果
    pub async fn get(&self) -> Result<String> {
        let entries = self.store.scan_all().await?;
        debug!("assembling {} entries", entries.len());
        Ok(assemble(entries))
    }
}

/// 按时间戳（整数比较）升序，用 "\n" 连接并追加一个结尾换行
pub fn assemble(mut entries: Vec<HistoryEntry>) -> String {
    entries.sort_by_key(|entry| entry.timestamp);
    let capacity = entries.iter().map(|e| e.content.len() + 1).sum::<usize>().max(1);
    let mut content = String::with_capacity(capacity);
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            content.push('\n');
        }
        content.push_str(&entry.content);
    }
    content.push('\n');
    content
}
