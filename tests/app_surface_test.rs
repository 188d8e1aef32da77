use async_trait::async_trait;
use cultured_downloader::config::settings::SETTINGS_FILE;
use cultured_downloader::core::vault::FANTIA_SESSION_FIELD;
use cultured_downloader::{
    CancellationToken, CulturedDownloader, DownloaderError, PasswordPrompt, RequestArgs, Result,
};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const FAST_KDF: &str = "[security.kdf]\nmemory_kib = 64\niterations = 1\nparallelism = 1\n";

async fn open_app(dir: &TempDir) -> CulturedDownloader {
    let settings = dir.path().join(SETTINGS_FILE);
    if !settings.exists() {
        std::fs::write(&settings, FAST_KDF).unwrap();
    }
    CulturedDownloader::open(dir.path()).await.unwrap()
}

/// Answers prompts from a fixed script and counts how often it was asked.
struct ScriptedPrompt {
    answers: Mutex<Vec<Option<String>>>,
    asked: Mutex<u32>,
}

impl ScriptedPrompt {
    fn new(answers: &[Option<&str>]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().rev().map(|a| a.map(str::to_string)).collect()),
            asked: Mutex::new(0),
        }
    }

    fn asked(&self) -> u32 {
        *self.asked.lock().unwrap()
    }
}

#[async_trait]
impl PasswordPrompt for ScriptedPrompt {
    async fn read_password(&self, _attempt: u32, _max_attempts: u32) -> Result<Option<String>> {
        *self.asked.lock().unwrap() += 1;
        Ok(self.answers.lock().unwrap().pop().flatten())
    }
}

#[tokio::test]
async fn test_every_binding_call_resolves() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;

    let name: String = app.get_name();
    assert_eq!(name, "Cultured Downloader");

    let greeting: String = app.greet("World");
    assert_eq!(greeting, "Hello World, It's show time!");

    let dark: bool = app.get_dark_mode();
    assert!(!dark);
    assert_ok!(app.set_dark_mode(true).await);

    let checked: bool = assert_ok!(app.check_master_password("nothing set").await);
    assert!(!checked);

    let prompt = ScriptedPrompt::new(&[]);
    let prompted: bool = assert_ok!(app.prompt_master_password(&prompt).await);
    assert!(prompted);
    assert_eq!(prompt.asked(), 0);

    assert_ok!(app.reset_encrypted_fields().await);

    let ctx = CancellationToken::new();
    ctx.cancel();
    let queue_id: u64 = assert_ok!(
        app.new_download_queue(
            ctx,
            vec![RequestArgs::get("http://127.0.0.1:1/file.bin", dir.path())]
        )
        .await
    );
    assert_ok!(app.cancel_queue(queue_id).await);

    assert_err!(app.new_download_queue(CancellationToken::new(), vec![]).await);
    assert!(matches!(
        app.cancel_queue(queue_id + 100).await,
        Err(DownloaderError::QueueNotFound(_))
    ));
}

#[tokio::test]
async fn test_preferences_survive_restart() {
    let dir = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();

    {
        let app = open_app(&dir).await;
        app.set_dark_mode(true).await.unwrap();
        app.set_download_directory(downloads.path()).await.unwrap();
    }

    let app = open_app(&dir).await;
    assert!(app.get_dark_mode());
    assert_eq!(app.download_directory(), downloads.path());

    let written = std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
    assert!(written.contains("dark_mode = true"));
}

#[tokio::test]
async fn test_master_password_lifecycle() {
    let dir = TempDir::new().unwrap();

    {
        let app = open_app(&dir).await;
        app.set_master_password("open sesame", None).await.unwrap();
        app.set_encrypted_field(FANTIA_SESSION_FIELD, "session-value")
            .await
            .unwrap();
    }

    let raw = std::fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
    assert!(!raw.contains("session-value"));

    let app = open_app(&dir).await;
    assert!(app.has_master_password());
    assert!(matches!(
        app.get_encrypted_field(FANTIA_SESSION_FIELD).await,
        Err(DownloaderError::VaultLocked)
    ));
    assert!(!app.check_master_password("wrong").await.unwrap());

    let prompt = ScriptedPrompt::new(&[Some("nope"), Some("open sesame")]);
    assert!(app.prompt_master_password(&prompt).await.unwrap());
    assert_eq!(prompt.asked(), 2);

    let value = app
        .get_encrypted_field(FANTIA_SESSION_FIELD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.as_str(), "session-value");
    assert_eq!(app.encrypted_field_names(), vec![FANTIA_SESSION_FIELD]);

    app.reset_encrypted_fields().await.unwrap();
    assert!(!app.has_master_password());
    assert!(app.encrypted_field_names().is_empty());
    assert!(matches!(
        app.get_encrypted_field(FANTIA_SESSION_FIELD).await,
        Err(DownloaderError::NoMasterPassword)
    ));
}

#[tokio::test]
async fn test_prompt_gives_up_after_three_attempts() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;
    app.set_master_password("right", None).await.unwrap();

    let reopened = {
        drop(app);
        open_app(&dir).await
    };

    let prompt = ScriptedPrompt::new(&[Some("a"), Some("b"), Some("c"), Some("right")]);
    assert!(!reopened.prompt_master_password(&prompt).await.unwrap());
    assert_eq!(prompt.asked(), 3);

    let cancelled = ScriptedPrompt::new(&[None]);
    assert!(!reopened.prompt_master_password(&cancelled).await.unwrap());
    assert_eq!(cancelled.asked(), 1);
}

#[tokio::test]
async fn test_changing_password_requires_current_one() {
    let dir = TempDir::new().unwrap();
    let app = open_app(&dir).await;
    app.set_master_password("first", None).await.unwrap();
    app.set_encrypted_field("api_key", "k-123").await.unwrap();

    assert!(matches!(
        app.set_master_password("second", Some("wrong")).await,
        Err(DownloaderError::IncorrectPassword)
    ));
    app.set_master_password("second", Some("first")).await.unwrap();

    drop(app);
    let app = open_app(&dir).await;
    assert!(!app.check_master_password("first").await.unwrap());
    assert!(app.check_master_password("second").await.unwrap());
    assert_eq!(
        app.get_encrypted_field("api_key").await.unwrap().unwrap().as_str(),
        "k-123"
    );
}
