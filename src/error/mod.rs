use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Write queue closed")]
    QueueClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HistoryError {
    /// 远端存储的瞬时错误：调用方负责重试或回退
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HistoryError::Store(_) | HistoryError::Timeout(_) | HistoryError::Decode(_)
        )
    }
}

impl From<sqlx::Error> for HistoryError {
    fn from(e: sqlx::Error) -> Self {
        HistoryError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
