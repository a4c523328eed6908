use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{HistoryError, Result};

pub const DEFAULT_TABLE_NAME: &str = "bash-eternal-history";
pub const DEFAULT_FILE_NAME: &str = ".bash_eternal_history";

/// 远端日志存储后端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// DynamoDB：双字段复合主键
    Dynamodb {
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint_url: Option<String>,
    },
    /// PostgreSQL：单字段主键
    Postgres { url: String },
    /// 进程内存储，仅用于本地试用
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Dynamodb {
            region: None,
            endpoint_url: None,
        }
    }
}

/// 应用配置，所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub table_name: String,
    pub file_name: String,
    /// 内容组装（全表扫描）的超时
    pub scan_timeout_ms: u64,
    /// 单次写入的超时
    pub put_timeout_ms: u64,
    /// 写入失败后的重试间隔
    pub put_retry_delay_ms: u64,
    /// 读缓存的新鲜度窗口
    pub cache_freshness_window_ms: u64,
    /// 写队列容量，满了之后写调用阻塞
    pub queue_capacity: usize,
    /// 对外宣告的文件权限位
    pub file_mode: u16,
    pub backend: BackendConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            scan_timeout_ms: 5000,
            put_timeout_ms: 5000,
            put_retry_delay_ms: 5000,
            cache_freshness_window_ms: 1000,
            queue_capacity: 100,
            file_mode: 0o444,
            backend: BackendConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从 JSON 文件加载配置，缺省字段取默认值
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HistoryError::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| HistoryError::Config(format!("invalid config {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(HistoryError::Config("queue_capacity must be positive".into()));
        }
        if self.scan_timeout_ms == 0 || self.put_timeout_ms == 0 {
            return Err(HistoryError::Config("timeouts must be positive".into()));
        }
        if self.file_name.is_empty() || self.file_name.contains('/') || self.file_name == "." || self.file_name == ".." {
            return Err(HistoryError::Config(format!("invalid file name: {:?}", self.file_name)));
        }
        let valid_table = !self.table_name.is_empty()
            && self
                .table_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid_table {
            return Err(HistoryError::Config(format!("invalid table name: {:?}", self.table_name)));
        }
        if let BackendConfig::Postgres { url } = &self.backend {
            if url.is_empty() {
                return Err(HistoryError::Config("postgres url is empty".into()));
            }
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }

    pub fn put_retry_delay(&self) -> Duration {
        Duration::from_millis(self.put_retry_delay_ms)
    }

    pub fn cache_freshness_window(&self) -> Duration {
        Duration::from_millis(self.cache_freshness_window_ms)
    }
}
