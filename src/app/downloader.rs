use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::config::settings::SettingsStore;
use crate::config::storage::LocalStorage;
use crate::core::http::{HttpClient, DEFAULT_CONNECTIVITY_URL};
use crate::core::queue::QueueManager;
use crate::core::site::Website;
use crate::core::vault::CredentialVault;
use crate::domain::model::{QueueId, QueueSnapshot, RequestArgs};
use crate::domain::ports::{ConfigProvider, PasswordPrompt, Storage};
use crate::utils::error::{DownloaderError, Result};

pub const APP_NAME: &str = "Cultured Downloader";

/// Application facade: download queues, the credential vault and the
/// persisted preferences behind one async API.
pub struct CulturedDownloader {
    settings: Arc<SettingsStore>,
    vault: CredentialVault,
    http: HttpClient,
    queues: QueueManager,
}

impl CulturedDownloader {
    /// Open the application state stored under `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_storage(Arc::new(LocalStorage::new(data_dir))).await
    }

    pub async fn with_storage(storage: Arc<dyn Storage>) -> Result<Self> {
        let settings = Arc::new(SettingsStore::load(storage).await?);
        let http = HttpClient::new(settings.as_ref())?;
        Ok(Self::from_parts(settings, http))
    }

    /// Build from already loaded settings and a configured HTTP client.
    pub fn from_parts(settings: Arc<SettingsStore>, http: HttpClient) -> Self {
        let queues = QueueManager::new(http.clone(), settings.clone());
        Self {
            vault: CredentialVault::new(settings.clone()),
            settings,
            http,
            queues,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn get_name(&self) -> String {
        APP_NAME.to_string()
    }

    pub fn greet(&self, name: &str) -> String {
        format!("Hello {}, It's show time!", name)
    }

    pub fn get_dark_mode(&self) -> bool {
        self.settings.read(|s| s.ui.dark_mode)
    }

    pub async fn set_dark_mode(&self, enabled: bool) -> Result<()> {
        self.settings
            .update(|s| {
                s.ui.dark_mode = enabled;
                Ok(())
            })
            .await?;
        tracing::debug!("Dark mode set to {}", enabled);
        Ok(())
    }

    pub fn download_directory(&self) -> PathBuf {
        self.settings.download_directory()
    }

    /// Change the default download directory. It must already exist.
    /// Returns `false` when it was already set to `path`.
    pub async fn set_download_directory(&self, path: &Path) -> Result<bool> {
        if !path.is_dir() {
            return Err(DownloaderError::InvalidConfigValueError {
                field: "download_directory".to_string(),
                value: path.display().to_string(),
                reason: "Not an existing directory".to_string(),
            });
        }
        if self.download_directory() == path {
            return Ok(false);
        }

        let value = path.to_string_lossy().into_owned();
        self.settings
            .update(|s| {
                s.general.download_directory = value;
                Ok(())
            })
            .await?;
        tracing::info!("Download directory set to {}", path.display());
        Ok(true)
    }

    pub async fn check_internet_connection(&self) -> bool {
        self.http
            .check_internet_connection(DEFAULT_CONNECTIVITY_URL)
            .await
    }

    /// Validate and start downloading `requests`. Returns the queue id as
    /// soon as the queue is running in the background.
    ///
    /// While the vault is unlocked, requests to a supported site get the
    /// stored session cookie unless they already carry one.
    pub async fn new_download_queue(
        &self,
        ctx: CancellationToken,
        requests: Vec<RequestArgs>,
    ) -> Result<QueueId> {
        let requests = self.with_session_cookies(requests).await?;
        self.queues.new_download_queue(&ctx, requests)
    }

    pub async fn cancel_queue(&self, queue_id: QueueId) -> Result<()> {
        self.queues.cancel_queue(queue_id)
    }

    pub fn queue_status(&self, queue_id: QueueId) -> Result<QueueSnapshot> {
        self.queues.status(queue_id)
    }

    pub async fn wait_for_queue(&self, queue_id: QueueId) -> Result<QueueSnapshot> {
        self.queues.wait(queue_id).await
    }

    pub fn list_queues(&self) -> Vec<QueueSnapshot> {
        self.queues.list()
    }

    pub fn clear_finished_queues(&self) -> usize {
        self.queues.clear_finished()
    }

    pub fn has_master_password(&self) -> bool {
        self.vault.has_master_password()
    }

    pub async fn set_master_password(&self, new_password: &str, current: Option<&str>) -> Result<()> {
        self.vault.set_master_password(new_password, current).await
    }

    pub async fn check_master_password(&self, password: &str) -> Result<bool> {
        self.vault.check_master_password(password).await
    }

    pub async fn prompt_master_password(&self, prompt: &dyn PasswordPrompt) -> Result<bool> {
        self.vault.prompt_master_password(prompt).await
    }

    pub async fn reset_encrypted_fields(&self) -> Result<()> {
        self.vault.reset_encrypted_fields().await
    }

    pub async fn set_encrypted_field(&self, name: &str, value: &str) -> Result<()> {
        self.vault.set_field(name, value).await
    }

    pub async fn get_encrypted_field(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        self.vault.get_field(name).await
    }

    pub async fn remove_encrypted_field(&self, name: &str) -> Result<bool> {
        self.vault.remove_field(name).await
    }

    pub fn encrypted_field_names(&self) -> Vec<String> {
        self.vault.field_names()
    }

    async fn with_session_cookies(&self, mut requests: Vec<RequestArgs>) -> Result<Vec<RequestArgs>> {
        if !self.vault.is_unlocked().await {
            return Ok(requests);
        }

        let mut sessions: HashMap<Website, Option<Zeroizing<String>>> = HashMap::new();
        for request in &mut requests {
            let Some(website) = Website::from_url(&request.url) else {
                continue;
            };
            let cookie_name = website.session_cookie_name();
            if request.cookies.contains_key(cookie_name) {
                continue;
            }

            if !sessions.contains_key(&website) {
                let session = self.vault.get_field(website.session_field()).await?;
                sessions.insert(website, session);
            }
            if let Some(Some(session)) = sessions.get(&website) {
                request
                    .cookies
                    .insert(cookie_name.to_string(), session.as_str().to_string());
            }
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SETTINGS_FILE;
    use crate::config::storage::MemoryStorage;
    use crate::core::vault::{FANTIA_SESSION_FIELD, PIXIV_FANBOX_SESSION_FIELD};

    const FAST_KDF: &str = "[security.kdf]\nmemory_kib = 64\niterations = 1\nparallelism = 1\n";

    async fn downloader() -> (CulturedDownloader, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_file(SETTINGS_FILE, FAST_KDF.as_bytes())
            .await
            .unwrap();
        let app = CulturedDownloader::with_storage(storage.clone()).await.unwrap();
        (app, storage)
    }

    #[tokio::test]
    async fn test_name_and_greeting() {
        let (app, _) = downloader().await;
        assert_eq!(app.get_name(), "Cultured Downloader");
        assert_eq!(app.greet("Alice"), "Hello Alice, It's show time!");
    }

    #[tokio::test]
    async fn test_dark_mode_is_persisted() {
        let (app, storage) = downloader().await;
        assert!(!app.get_dark_mode());

        app.set_dark_mode(true).await.unwrap();
        assert!(app.get_dark_mode());

        let reopened = CulturedDownloader::with_storage(storage).await.unwrap();
        assert!(reopened.get_dark_mode());
    }

    #[tokio::test]
    async fn test_download_directory_must_exist() {
        let (app, _) = downloader().await;
        let dir = tempfile::TempDir::new().unwrap();

        assert!(app.set_download_directory(dir.path()).await.unwrap());
        assert_eq!(app.download_directory(), dir.path());
        assert!(!app.set_download_directory(dir.path()).await.unwrap());

        let missing = dir.path().join("missing");
        assert!(app.set_download_directory(&missing).await.is_err());
        assert_eq!(app.download_directory(), dir.path());
    }

    #[tokio::test]
    async fn test_session_cookies_added_only_when_unlocked() {
        let (app, _) = downloader().await;
        let requests = vec![
            RequestArgs::get("https://fantia.jp/posts/1", "out"),
            RequestArgs::get("https://creator.fanbox.cc/posts/2", "out"),
            RequestArgs::get("https://fantia.jp/posts/3", "out").with_cookie("_session_id", "mine"),
            RequestArgs::get("https://example.com/file.zip", "out"),
        ];

        let untouched = app.with_session_cookies(requests.clone()).await.unwrap();
        assert!(untouched[0].cookies.is_empty());

        app.set_master_password("hunter2", None).await.unwrap();
        app.set_encrypted_field(FANTIA_SESSION_FIELD, "fantia-cookie")
            .await
            .unwrap();

        let with_cookies = app.with_session_cookies(requests).await.unwrap();
        assert_eq!(
            with_cookies[0].cookies.get("_session_id").map(String::as_str),
            Some("fantia-cookie")
        );
        // No fanbox session stored.
        assert!(with_cookies[1].cookies.is_empty());
        assert_eq!(
            with_cookies[2].cookies.get("_session_id").map(String::as_str),
            Some("mine")
        );
        assert!(with_cookies[3].cookies.is_empty());

        app.set_encrypted_field(PIXIV_FANBOX_SESSION_FIELD, "fanbox-cookie")
            .await
            .unwrap();
        let fanbox = app
            .with_session_cookies(vec![RequestArgs::get("https://www.fanbox.cc/@a/posts/1", "out")])
            .await
            .unwrap();
        assert_eq!(
            fanbox[0].cookies.get("FANBOXSESSID").map(String::as_str),
            Some("fanbox-cookie")
        );
    }
}
