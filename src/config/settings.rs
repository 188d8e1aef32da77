use crate::domain::ports::{ConfigProvider, Storage};
use crate::utils::error::{DownloaderError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

pub const SETTINGS_FILE: &str = "config.toml";
pub const APP_DIR_NAME: &str = "cultured-downloader";
/// Overrides the application data directory.
pub const HOME_ENV: &str = "CULTURED_DOWNLOADER_HOME";

pub const DEFAULT_USER_AGENT: &str = concat!("CulturedDownloader/", env!("CARGO_PKG_VERSION"));

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Directory holding the settings file and logs.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

pub fn default_download_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Desktop")
        .join(APP_DIR_NAME)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub general: GeneralSettings,
    pub ui: UiSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub download_directory: String,
    pub max_concurrent_downloads: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            download_directory: default_download_directory().to_string_lossy().into_owned(),
            max_concurrent_downloads: 5,
            request_timeout_secs: 30,
            max_retries: 3,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub dark_mode: bool,
}

/// Master password material. All values are base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    pub kdf: KdfSettings,
    pub encrypted_fields: BTreeMap<String, String>,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Validate for GeneralSettings {
    fn validate(&self) -> Result<()> {
        validation::validate_path("general.download_directory", &self.download_directory)?;
        validation::validate_range(
            "general.max_concurrent_downloads",
            self.max_concurrent_downloads,
            1,
            32,
        )?;
        validation::validate_range("general.request_timeout_secs", self.request_timeout_secs, 1, 600)?;
        validation::validate_range("general.max_retries", self.max_retries, 0, 10)?;
        validation::validate_non_empty_string("general.user_agent", &self.user_agent)
    }
}

impl Validate for KdfSettings {
    fn validate(&self) -> Result<()> {
        validation::validate_range("security.kdf.parallelism", self.parallelism, 1, 16)?;
        validation::validate_range("security.kdf.iterations", self.iterations, 1, 16)?;
        validation::validate_range(
            "security.kdf.memory_kib",
            self.memory_kib,
            8 * self.parallelism,
            1_048_576,
        )
    }
}

impl Validate for AppSettings {
    fn validate(&self) -> Result<()> {
        self.general.validate()?;
        self.security.kdf.validate()?;
        if self.security.salt.is_some() != self.security.verifier.is_some() {
            return Err(DownloaderError::ConfigError {
                message: "security.salt and security.verifier must be set together".to_string(),
            });
        }
        Ok(())
    }
}

impl AppSettings {
    /// Parse settings, substituting `${VAR}` with environment values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);
        Ok(toml::from_str(&processed)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn has_master_password(&self) -> bool {
        self.security.verifier.is_some()
    }
}

/// Shared, persisted application settings.
pub struct SettingsStore {
    storage: Arc<dyn Storage>,
    settings: RwLock<AppSettings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load settings from storage.
    ///
    /// A missing file yields (and writes) the defaults. A file that does not
    /// parse is replaced by the defaults; one that parses but holds invalid
    /// general values gets those sections reset while the security section
    /// is kept, so stored credentials survive a bad edit.
    pub async fn load(storage: Arc<dyn Storage>) -> Result<Self> {
        let (mut settings, rewrite) = match storage.read_file(SETTINGS_FILE).await? {
            None => (AppSettings::default(), true),
            Some(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                match AppSettings::from_toml_str(&content) {
                    Ok(parsed) => match parsed.validate() {
                        Ok(()) => (parsed, false),
                        Err(e) => {
                            tracing::warn!("Invalid settings, restoring defaults: {}", e);
                            let mut security = parsed.security;
                            if security.kdf.validate().is_err() {
                                security = SecuritySettings::default();
                            }
                            (
                                AppSettings {
                                    security,
                                    ..AppSettings::default()
                                },
                                true,
                            )
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Unreadable settings file, restoring defaults: {}", e);
                        (AppSettings::default(), true)
                    }
                }
            }
        };

        if settings.validate().is_err() {
            settings.security = SecuritySettings::default();
        }

        if rewrite {
            storage
                .write_file(SETTINGS_FILE, settings.to_toml_string()?.as_bytes())
                .await?;
        }

        let download_dir = Path::new(&settings.general.download_directory);
        if !download_dir.is_dir() {
            let fallback = default_download_directory();
            tracing::debug!(
                "Download directory {} does not exist, using {}",
                download_dir.display(),
                fallback.display()
            );
            settings.general.download_directory = fallback.to_string_lossy().into_owned();
        }

        Ok(Self {
            storage,
            settings: RwLock::new(settings),
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> AppSettings {
        self.read(Clone::clone)
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppSettings) -> R) -> R {
        let guard = self.settings.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Apply `f` to a copy of the settings, validate, persist, then publish.
    /// Nothing changes if `f`, validation or the write fails.
    pub async fn update<R>(&self, f: impl FnOnce(&mut AppSettings) -> Result<R>) -> Result<R> {
        let _guard = self.write_lock.lock().await;

        let mut draft = self.snapshot();
        let result = f(&mut draft)?;
        draft.validate()?;

        self.storage
            .write_file(SETTINGS_FILE, draft.to_toml_string()?.as_bytes())
            .await?;

        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = draft;
        Ok(result)
    }
}

impl ConfigProvider for SettingsStore {
    fn download_directory(&self) -> PathBuf {
        self.read(|s| PathBuf::from(&s.general.download_directory))
    }

    fn max_concurrent_downloads(&self) -> usize {
        self.read(|s| s.general.max_concurrent_downloads.max(1))
    }

    fn request_timeout(&self) -> Duration {
        self.read(|s| Duration::from_secs(s.general.request_timeout_secs))
    }

    fn max_retries(&self) -> u32 {
        self.read(|s| s.general.max_retries)
    }

    fn user_agent(&self) -> String {
        self.read(|s| s.general.user_agent.clone())
    }
}
