use clap::Parser;
use cultured_downloader::config::cli::{self, Command, PasswordAction, SecretAction, TerminalPrompt, Toggle};
use cultured_downloader::config::settings::default_data_dir;
use cultured_downloader::core::site;
use cultured_downloader::core::vault::{
    FANTIA_SESSION_FIELD, GDRIVE_API_KEY_FIELD, PIXIV_FANBOX_SESSION_FIELD,
};
use cultured_downloader::utils::error::ErrorSeverity;
use cultured_downloader::utils::logger;
use cultured_downloader::{
    CancellationToken, CliConfig, CulturedDownloader, DownloaderError, PasswordPrompt,
    QueueStatus, RequestArgs, RequestOutcome, Result,
};
use std::path::PathBuf;

const KNOWN_FIELDS: [&str; 3] = [
    FANTIA_SESSION_FIELD,
    PIXIV_FANBOX_SESSION_FIELD,
    GDRIVE_API_KEY_FIELD,
];

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();
    let data_dir = config.data_dir.clone().unwrap_or_else(default_data_dir);
    let log_dir = data_dir.join("logs");

    // Initialize logging
    let log_file = match logger::init_cli_logger(config.verbose, Some(&log_dir)) {
        Ok(log_file) => log_file,
        Err(e) => {
            eprintln!("⚠️ Could not open the log directory {}: {}", log_dir.display(), e);
            let _ = logger::init_cli_logger(config.verbose, None);
            None
        }
    };
    if let Some(log_file) = &log_file {
        let removed = logger::cleanup_logs(&log_dir, log_file);
        if removed > 0 {
            tracing::debug!("Removed {} old log files", removed);
        }
    }
    logger::install_panic_hook(log_file.clone());

    tracing::debug!("Data directory: {}", data_dir.display());

    let exit_code = match run(config, data_dir).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(
                "❌ {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            if let Some(log_file) = &log_file {
                eprintln!("📄 {}", logger::error_log_notice(log_file));
            }

            // Determine exit code based on error severity
            match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            }
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

async fn run(config: CliConfig, data_dir: PathBuf) -> Result<i32> {
    let app = CulturedDownloader::open(&data_dir).await?;

    match config.command {
        Command::Download {
            urls,
            output,
            headers,
            cookies,
            overwrite,
            json,
        } => {
            if !app.check_internet_connection().await {
                tracing::warn!("No internet connection detected, downloads may fail");
            }
            if app.has_master_password() && !app.prompt_master_password(&TerminalPrompt).await? {
                tracing::warn!("Continuing without stored session cookies");
            }

            // Build one request per URL
            let destination = output.unwrap_or_else(|| app.download_directory());
            let requests = urls
                .into_iter()
                .map(|url| {
                    let mut args = RequestArgs::get(url, destination.clone()).overwrite(overwrite);
                    for (name, value) in &headers {
                        args = args.with_header(name, value);
                    }
                    for (name, value) in &cookies {
                        args = args.with_cookie(name, value);
                    }
                    args
                })
                .collect();

            // Ctrl-C cancels the whole queue
            let ctx = CancellationToken::new();
            let interrupt = ctx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, cancelling downloads");
                    interrupt.cancel();
                }
            });

            let id = app.new_download_queue(ctx, requests).await?;
            let snapshot = app.wait_for_queue(id).await?;

            // Report results
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                for outcome in &snapshot.outcomes {
                    match outcome {
                        RequestOutcome::Downloaded { path, bytes } => {
                            println!("✅ {} ({} bytes)", path.display(), bytes)
                        }
                        RequestOutcome::Skipped { path } => {
                            println!("⏭️ {} already exists", path.display())
                        }
                        RequestOutcome::Failed { url, error } => println!("❌ {}: {}", url, error),
                        RequestOutcome::Cancelled { url } => println!("⏹️ {} cancelled", url),
                    }
                }
                println!(
                    "Queue {} {}: {} downloaded, {} skipped, {} failed, {} cancelled",
                    snapshot.id,
                    snapshot.status,
                    snapshot.completed,
                    snapshot.skipped,
                    snapshot.failed,
                    snapshot.cancelled
                );
            }

            match snapshot.status {
                QueueStatus::Cancelled => Err(DownloaderError::Cancelled),
                QueueStatus::Failed => Ok(2),
                _ => Ok(0),
            }
        }

        Command::Urls {
            website,
            creator,
            urls,
            pages,
        } => {
            let mut urls = site::parse_user_urls(website, creator, &urls)?;
            if let Some(pages) = pages {
                if !creator {
                    return Err(DownloaderError::ValidationError {
                        message: "Page numbers only apply to creator URLs (--creator)".to_string(),
                    });
                }
                urls = site::expand_page_ranges(website, &urls, &pages)?;
            }
            for url in urls {
                println!("{}", url);
            }
            Ok(0)
        }

        Command::Password { action } => match action {
            PasswordAction::Set => {
                let current = if app.has_master_password() {
                    Some(
                        TerminalPrompt
                            .read_password(1, 1)
                            .await?
                            .ok_or(DownloaderError::Cancelled)?,
                    )
                } else {
                    None
                };
                let new_password = cli::read_new_password().await?;
                app.set_master_password(&new_password, current.as_deref())
                    .await?;
                println!("✅ Master password saved");
                Ok(0)
            }
            PasswordAction::Check { password } => {
                if !app.has_master_password() {
                    return Err(DownloaderError::NoMasterPassword);
                }
                let password = match password {
                    Some(password) => password,
                    None => TerminalPrompt
                        .read_password(1, 1)
                        .await?
                        .ok_or(DownloaderError::Cancelled)?,
                };
                if app.check_master_password(&password).await? {
                    println!("✅ Master password is correct");
                    Ok(0)
                } else {
                    Err(DownloaderError::IncorrectPassword)
                }
            }
            PasswordAction::Prompt => {
                if app.prompt_master_password(&TerminalPrompt).await? {
                    println!("✅ Unlocked");
                    Ok(0)
                } else {
                    Err(DownloaderError::IncorrectPassword)
                }
            }
            PasswordAction::Reset { yes } => {
                if !yes
                    && !cli::confirm("Delete the master password and every encrypted field?")
                        .await?
                {
                    println!("Nothing changed");
                    return Ok(0);
                }
                app.reset_encrypted_fields().await?;
                println!("✅ Encrypted fields reset");
                Ok(0)
            }
        },

        Command::Secret { action } => {
            if let SecretAction::List = action {
                let stored = app.encrypted_field_names();
                for known in KNOWN_FIELDS {
                    let state = if stored.iter().any(|name| name == known) { "set" } else { "not set" };
                    println!("{} ({})", known, state);
                }
                for name in stored.iter().filter(|name| !KNOWN_FIELDS.contains(&name.as_str())) {
                    println!("{} (set)", name);
                }
                return Ok(0);
            }

            if !app.has_master_password() {
                return Err(DownloaderError::NoMasterPassword);
            }
            if !app.prompt_master_password(&TerminalPrompt).await? {
                return Err(DownloaderError::IncorrectPassword);
            }

            match action {
                SecretAction::Set { field, value } => {
                    app.set_encrypted_field(&field, &value).await?;
                    println!("✅ {} saved", field);
                }
                SecretAction::Get { field } => match app.get_encrypted_field(&field).await? {
                    Some(value) => println!("{}", value.as_str()),
                    None => println!("{} is not set", field),
                },
                SecretAction::Remove { field } => {
                    if app.remove_encrypted_field(&field).await? {
                        println!("✅ {} removed", field);
                    } else {
                        println!("{} is not set", field);
                    }
                }
                SecretAction::List => {}
            }
            Ok(0)
        }

        Command::DarkMode { state } => {
            match state {
                Some(toggle) => app.set_dark_mode(toggle == Toggle::On).await?,
                None => println!("{}", if app.get_dark_mode() { "on" } else { "off" }),
            }
            Ok(0)
        }

        Command::DownloadDir { path } => {
            match path {
                Some(path) => {
                    if app.set_download_directory(&path).await? {
                        println!("✅ Download directory set to {}", path.display());
                    } else {
                        println!("The download directory is already set to {}", path.display());
                    }
                }
                None => println!("{}", app.download_directory().display()),
            }
            Ok(0)
        }

        Command::Greet { name } => {
            println!("{}", app.greet(&name));
            Ok(0)
        }

        Command::Name => {
            println!("{}", app.get_name());
            Ok(0)
        }
    }
}
