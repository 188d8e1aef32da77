use crate::core::site::Website;
use crate::domain::ports::PasswordPrompt;
use crate::utils::error::{DownloaderError, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cultured-downloader")]
#[command(about = "Download Fantia and Pixiv Fanbox content through cancellable queues")]
#[command(version)]
pub struct CliConfig {
    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Directory holding settings and logs (defaults to $CULTURED_DOWNLOADER_HOME or the user data dir)"
    )]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download files into the download directory
    Download {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long, short, help = "Output directory or file (defaults to the configured directory)")]
        output: Option<PathBuf>,

        #[arg(long = "header", value_parser = parse_header, help = "Extra header as NAME:VALUE")]
        headers: Vec<(String, String)>,

        #[arg(long = "cookie", value_parser = parse_cookie, help = "Cookie as NAME=VALUE")]
        cookies: Vec<(String, String)>,

        #[arg(long, help = "Replace files that already exist")]
        overwrite: bool,

        #[arg(long, help = "Print the final queue snapshot as JSON")]
        json: bool,
    },

    /// Validate post or creator URLs and expand page ranges
    Urls {
        #[arg(long, help = "fantia or pixiv_fanbox")]
        website: Website,

        #[arg(long, help = "Treat the URLs as creator pages")]
        creator: bool,

        #[arg(long, help = "Comma separated URLs")]
        urls: String,

        #[arg(long, help = "Comma separated page numbers or ranges, one per creator URL")]
        pages: Option<String>,
    },

    /// Manage the master password
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },

    /// Read or write encrypted fields
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Show or change the dark mode preference
    DarkMode {
        #[arg(value_enum)]
        state: Option<Toggle>,
    },

    /// Show or change the default download directory
    DownloadDir { path: Option<PathBuf> },

    /// Print a greeting
    Greet { name: String },

    /// Print the application name
    Name,
}

#[derive(Debug, Subcommand)]
pub enum PasswordAction {
    /// Set or change the master password
    Set,
    /// Check a master password
    Check { password: Option<String> },
    /// Ask for the master password interactively
    Prompt,
    /// Forget the master password and all encrypted fields
    Reset {
        #[arg(long, help = "Do not ask for confirmation")]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum SecretAction {
    /// Store an encrypted field
    Set { field: String, value: String },
    /// Print a decrypted field
    Get { field: String },
    /// Delete an encrypted field
    Remove { field: String },
    /// List stored field names
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid header `{}`, expected NAME:VALUE", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_cookie(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid cookie `{}`, expected NAME=VALUE", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Reads the master password from the terminal without echoing it.
/// An empty answer cancels the prompt.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl PasswordPrompt for TerminalPrompt {
    async fn read_password(&self, attempt: u32, max_attempts: u32) -> Result<Option<String>> {
        let label = if attempt > 1 {
            format!("Master password (attempt {}/{})", attempt, max_attempts)
        } else {
            "Master password".to_string()
        };

        let password = tokio::task::spawn_blocking(move || {
            dialoguer::Password::new()
                .with_prompt(label)
                .allow_empty_password(true)
                .interact()
        })
        .await?
        .map_err(prompt_error)?;

        Ok((!password.is_empty()).then_some(password))
    }
}

/// Ask twice for a new master password.
pub async fn read_new_password() -> Result<String> {
    tokio::task::spawn_blocking(|| {
        dialoguer::Password::new()
            .with_prompt("New master password")
            .with_confirmation("Confirm master password", "The passwords do not match")
            .interact()
    })
    .await?
    .map_err(prompt_error)
}

pub async fn confirm(question: &str) -> Result<bool> {
    let question = question.to_string();
    tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
    })
    .await?
    .map_err(prompt_error)
}

fn prompt_error(e: dialoguer::Error) -> DownloaderError {
    DownloaderError::IoError(std::io::Error::other(e.to_string()))
}
