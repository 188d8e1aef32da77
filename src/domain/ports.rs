use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Byte-level persistence used for the settings file.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// Download tunables read by the queue runner and HTTP client.
pub trait ConfigProvider: Send + Sync {
    fn download_directory(&self) -> PathBuf;
    fn max_concurrent_downloads(&self) -> usize;
    fn request_timeout(&self) -> Duration;
    fn max_retries(&self) -> u32;
    fn user_agent(&self) -> String;
}

/// Source of master password input.
#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    /// `attempt` starts at 1. `None` means the user gave up.
    async fn read_password(&self, attempt: u32, max_attempts: u32) -> Result<Option<String>>;
}
