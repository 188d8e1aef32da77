pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use app::{CulturedDownloader, APP_NAME};
pub use config::{LocalStorage, MemoryStorage, SettingsStore};
pub use domain::model::{QueueId, QueueSnapshot, QueueStatus, RequestArgs, RequestOutcome};
pub use domain::ports::PasswordPrompt;
pub use utils::error::{DownloaderError, Result};

pub use tokio_util::sync::CancellationToken;
