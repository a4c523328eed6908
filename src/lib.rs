pub mod app;
pub mod cache;
pub mod config;
pub mod content;
pub mod entry;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod persister;
pub mod storage;

pub use app::AppContext;
pub use cache::ContentCache;
pub use config::{AppConfig, BackendConfig};
pub use content::ContentAssembler;
pub use entry::HistoryEntry;
pub use error::{HistoryError, Result};
pub use fs::HistoryFile;
pub use fuse::HistoryFs;
pub use persister::{Persister, PersisterStats, WriteQueue};
pub use storage::{LogStore, TimedStore};
