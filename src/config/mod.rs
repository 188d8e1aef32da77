#[cfg(feature = "cli")]
pub mod cli;
pub mod settings;
pub mod storage;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use settings::{AppSettings, SettingsStore};
pub use storage::{LocalStorage, MemoryStorage};
