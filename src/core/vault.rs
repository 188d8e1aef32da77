use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use zeroize::Zeroizing;

use crate::config::settings::{KdfSettings, SettingsStore};
use crate::core::crypto::{self, SecretKey};
use crate::domain::ports::PasswordPrompt;
use crate::utils::error::{DownloaderError, Result};
use crate::utils::validation;

pub const FANTIA_SESSION_FIELD: &str = "fantia_session";
pub const PIXIV_FANBOX_SESSION_FIELD: &str = "pixiv_fanbox_session";
pub const GDRIVE_API_KEY_FIELD: &str = "gdrive_api_key";

pub const MAX_PASSWORD_ATTEMPTS: u32 = 3;

const VERIFIER_PLAINTEXT: &[u8] = b"cultured-downloader:master-password";

/// Encrypted credential fields gated by the master password.
///
/// The derived key lives only in memory and only after a successful
/// password check. Everything persisted goes through [`SettingsStore`].
pub struct CredentialVault {
    settings: Arc<SettingsStore>,
    key: RwLock<Option<SecretKey>>,
    /// Serializes every change to the sealed fields or the key.
    write_lock: Mutex<()>,
}

impl CredentialVault {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            key: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn has_master_password(&self) -> bool {
        self.settings.read(|s| s.has_master_password())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.key.read().await.is_some()
    }

    pub async fn lock(&self) {
        *self.key.write().await = None;
    }

    /// Set or change the master password, re-encrypting stored fields.
    /// Changing an existing password requires the current one.
    pub async fn set_master_password(&self, new_password: &str, current: Option<&str>) -> Result<()> {
        validation::validate_non_empty_string("master_password", new_password)?;
        let _write = self.write_lock.lock().await;

        let mut plain_fields: BTreeMap<String, Zeroizing<String>> = BTreeMap::new();
        if self.has_master_password() {
            let current = current.ok_or(DownloaderError::IncorrectPassword)?;
            let old_key = self
                .verify(current)
                .await?
                .ok_or(DownloaderError::IncorrectPassword)?;

            let sealed_fields = self.settings.read(|s| s.security.encrypted_fields.clone());
            for (name, sealed) in sealed_fields {
                let plain = crypto::open_from_base64(&old_key, &sealed)?;
                plain_fields.insert(name, to_zeroizing_string(plain)?);
            }
        }

        // Re-seal everything under a fresh salt
        let kdf = self.settings.read(|s| s.security.kdf);
        let salt = crypto::generate_salt();
        let new_key = derive_blocking(new_password, salt.to_vec(), kdf).await?;

        let verifier = crypto::seal_to_base64(&new_key, VERIFIER_PLAINTEXT)?;
        let mut resealed = BTreeMap::new();
        for (name, plain) in &plain_fields {
            resealed.insert(name.clone(), crypto::seal_to_base64(&new_key, plain.as_bytes())?);
        }

        self.settings
            .update(|s| {
                s.security.salt = Some(crypto::encode_salt(&salt));
                s.security.verifier = Some(verifier);
                s.security.encrypted_fields = resealed;
                Ok(())
            })
            .await?;

        *self.key.write().await = Some(new_key);
        tracing::info!("Master password updated ({} fields re-encrypted)", plain_fields.len());
        Ok(())
    }

    /// Returns `true` and unlocks the fields when `password` is correct.
    /// Returns `false` when it is wrong or no master password is set.
    pub async fn check_master_password(&self, password: &str) -> Result<bool> {
        match self.verify(password).await? {
            Some(key) => {
                *self.key.write().await = Some(key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask for the master password until it is correct or the attempts run
    /// out. Succeeds immediately when no password is set or the fields are
    /// already unlocked.
    pub async fn prompt_master_password(&self, prompt: &dyn PasswordPrompt) -> Result<bool> {
        if !self.has_master_password() || self.is_unlocked().await {
            return Ok(true);
        }

        for attempt in 1..=MAX_PASSWORD_ATTEMPTS {
            let Some(password) = prompt.read_password(attempt, MAX_PASSWORD_ATTEMPTS).await? else {
                tracing::info!("Master password prompt cancelled");
                return Ok(false);
            };
            let password = Zeroizing::new(password);
            if self.check_master_password(&password).await? {
                return Ok(true);
            }
            tracing::warn!(
                "Incorrect master password (attempt {} of {})",
                attempt,
                MAX_PASSWORD_ATTEMPTS
            );
        }

        Ok(false)
    }

    /// Forget the master password and every encrypted field.
    pub async fn reset_encrypted_fields(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let removed = self
            .settings
            .update(|s| {
                let removed = s.security.encrypted_fields.len();
                s.security.salt = None;
                s.security.verifier = None;
                s.security.encrypted_fields.clear();
                Ok(removed)
            })
            .await?;
        self.lock().await;
        tracing::info!("Encrypted fields reset ({} removed)", removed);
        Ok(())
    }

    pub async fn set_field(&self, name: &str, value: &str) -> Result<()> {
        validation::validate_non_empty_string("field", name)?;
        let _write = self.write_lock.lock().await;
        let sealed = {
            let guard = self.key.read().await;
            let key = self.unlocked_key(guard.as_ref())?;
            crypto::seal_to_base64(key, value.as_bytes())?
        };

        self.settings
            .update(|s| {
                s.security.encrypted_fields.insert(name.to_string(), sealed);
                Ok(())
            })
            .await
    }

    pub async fn get_field(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        let guard = self.key.read().await;
        let key = self.unlocked_key(guard.as_ref())?;

        let Some(sealed) = self
            .settings
            .read(|s| s.security.encrypted_fields.get(name).cloned())
        else {
            return Ok(None);
        };

        let plain = crypto::open_from_base64(key, &sealed)?;
        to_zeroizing_string(plain).map(Some)
    }

    pub async fn remove_field(&self, name: &str) -> Result<bool> {
        let _write = self.write_lock.lock().await;
        {
            let guard = self.key.read().await;
            self.unlocked_key(guard.as_ref())?;
        }
        self.settings
            .update(|s| Ok(s.security.encrypted_fields.remove(name).is_some()))
            .await
    }

    pub fn field_names(&self) -> Vec<String> {
        self.settings
            .read(|s| s.security.encrypted_fields.keys().cloned().collect())
    }

    fn unlocked_key<'a>(&self, key: Option<&'a SecretKey>) -> Result<&'a SecretKey> {
        match key {
            Some(key) => Ok(key),
            None if self.has_master_password() => Err(DownloaderError::VaultLocked),
            None => Err(DownloaderError::NoMasterPassword),
        }
    }

    /// Derive the key for `password` and check it against the stored
    /// verifier. `None` means wrong password or no password set.
    async fn verify(&self, password: &str) -> Result<Option<SecretKey>> {
        let Some((salt, verifier, kdf)) = self.settings.read(|s| {
            match (&s.security.salt, &s.security.verifier) {
                (Some(salt), Some(verifier)) => Some((salt.clone(), verifier.clone(), s.security.kdf)),
                _ => None,
            }
        }) else {
            return Ok(None);
        };

        let salt = crypto::decode_salt(&salt)?;
        let key = derive_blocking(password, salt, kdf).await?;

        match crypto::open_from_base64(&key, &verifier) {
            Ok(plain) if plain.as_slice() == VERIFIER_PLAINTEXT => Ok(Some(key)),
            Ok(_) | Err(DownloaderError::DecryptionFailed) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn derive_blocking(password: &str, salt: Vec<u8>, kdf: KdfSettings) -> Result<SecretKey> {
    let password = Zeroizing::new(password.to_string());
    tokio::task::spawn_blocking(move || crypto::derive_key(&password, &salt, &kdf)).await?
}

fn to_zeroizing_string(bytes: Zeroizing<Vec<u8>>) -> Result<Zeroizing<String>> {
    String::from_utf8(bytes.to_vec())
        .map(Zeroizing::new)
        .map_err(|_| DownloaderError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SETTINGS_FILE;
    use crate::config::storage::MemoryStorage;
    use crate::domain::ports::Storage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const FAST_KDF: &str = "[security.kdf]\nmemory_kib = 64\niterations = 1\nparallelism = 1\n";

    async fn vault() -> (CredentialVault, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_file(SETTINGS_FILE, FAST_KDF.as_bytes())
            .await
            .unwrap();
        let settings = Arc::new(SettingsStore::load(storage.clone()).await.unwrap());
        (CredentialVault::new(settings), storage)
    }

    struct ScriptedPrompt {
        answers: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[Option<&str>]) -> Self {
            let mut answers: Vec<Option<String>> =
                answers.iter().map(|a| a.map(str::to_string)).collect();
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
            }
        }

        fn remaining(&self) -> usize {
            self.answers.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PasswordPrompt for ScriptedPrompt {
        async fn read_password(&self, _attempt: u32, _max: u32) -> Result<Option<String>> {
            Ok(self.answers.lock().unwrap().pop().flatten())
        }
    }

    #[tokio::test]
    async fn test_check_without_master_password_is_false() {
        let (vault, _) = vault().await;
        assert!(!vault.check_master_password("anything").await.unwrap());
        assert!(matches!(
            vault.get_field(FANTIA_SESSION_FIELD).await,
            Err(DownloaderError::NoMasterPassword)
        ));
    }

    #[tokio::test]
    async fn test_fields_are_locked_until_password_checked() {
        let (vault, storage) = vault().await;
        vault.set_master_password("correct horse", None).await.unwrap();
        vault.set_field(FANTIA_SESSION_FIELD, "abc123").await.unwrap();

        let persisted = String::from_utf8(storage.get_file(SETTINGS_FILE).await.unwrap()).unwrap();
        assert!(!persisted.contains("abc123"));

        vault.lock().await;
        assert!(matches!(
            vault.get_field(FANTIA_SESSION_FIELD).await,
            Err(DownloaderError::VaultLocked)
        ));

        assert!(!vault.check_master_password("wrong").await.unwrap());
        assert!(!vault.is_unlocked().await);

        assert!(vault.check_master_password("correct horse").await.unwrap());
        let value = vault.get_field(FANTIA_SESSION_FIELD).await.unwrap().unwrap();
        assert_eq!(value.as_str(), "abc123");
        assert!(vault.get_field("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_password_reencrypts_fields() {
        let (vault, _) = vault().await;
        vault.set_master_password("first", None).await.unwrap();
        vault.set_field(GDRIVE_API_KEY_FIELD, "key-1").await.unwrap();

        assert!(matches!(
            vault.set_master_password("second", Some("wrong")).await,
            Err(DownloaderError::IncorrectPassword)
        ));
        assert!(matches!(
            vault.set_master_password("second", None).await,
            Err(DownloaderError::IncorrectPassword)
        ));

        vault.set_master_password("second", Some("first")).await.unwrap();
        vault.lock().await;

        assert!(!vault.check_master_password("first").await.unwrap());
        assert!(vault.check_master_password("second").await.unwrap());
        let value = vault.get_field(GDRIVE_API_KEY_FIELD).await.unwrap().unwrap();
        assert_eq!(value.as_str(), "key-1");
    }

    #[tokio::test]
    async fn test_field_written_during_password_change_survives() {
        let (vault, _) = vault().await;
        vault.set_master_password("first", None).await.unwrap();
        vault.set_field(GDRIVE_API_KEY_FIELD, "key-1").await.unwrap();

        let (changed, written) = tokio::join!(
            vault.set_master_password("second", Some("first")),
            vault.set_field(FANTIA_SESSION_FIELD, "cookie"),
        );
        changed.unwrap();
        written.unwrap();

        vault.lock().await;
        assert!(vault.check_master_password("second").await.unwrap());
        let mut names = vault.field_names();
        names.sort();
        assert_eq!(names, vec![FANTIA_SESSION_FIELD, GDRIVE_API_KEY_FIELD]);
        let cookie = vault.get_field(FANTIA_SESSION_FIELD).await.unwrap().unwrap();
        assert_eq!(cookie.as_str(), "cookie");
        let key = vault.get_field(GDRIVE_API_KEY_FIELD).await.unwrap().unwrap();
        assert_eq!(key.as_str(), "key-1");
    }

    #[tokio::test]
    async fn test_reset_clears_password_and_fields() {
        let (vault, _) = vault().await;
        vault.set_master_password("pw", None).await.unwrap();
        vault.set_field(PIXIV_FANBOX_SESSION_FIELD, "sess").await.unwrap();

        vault.reset_encrypted_fields().await.unwrap();

        assert!(!vault.has_master_password());
        assert!(!vault.is_unlocked().await);
        assert!(vault.field_names().is_empty());
        assert!(!vault.check_master_password("pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_allows_three_attempts() {
        let (vault, _) = vault().await;
        vault.set_master_password("pw", None).await.unwrap();
        vault.lock().await;

        let prompt = ScriptedPrompt::new(&[Some("a"), Some("b"), Some("pw")]);
        assert!(vault.prompt_master_password(&prompt).await.unwrap());
        assert!(vault.is_unlocked().await);

        vault.lock().await;
        let prompt = ScriptedPrompt::new(&[Some("a"), Some("b"), Some("c"), Some("pw")]);
        assert!(!vault.prompt_master_password(&prompt).await.unwrap());
        assert_eq!(prompt.remaining(), 1);
    }

    #[tokio::test]
    async fn test_prompt_cancel_and_unset() {
        let (vault, _) = vault().await;
        let prompt = ScriptedPrompt::new(&[]);
        assert!(vault.prompt_master_password(&prompt).await.unwrap());

        vault.set_master_password("pw", None).await.unwrap();
        vault.lock().await;
        let prompt = ScriptedPrompt::new(&[None]);
        assert!(!vault.prompt_master_password(&prompt).await.unwrap());
    }
}
