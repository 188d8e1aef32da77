use chrono::{Local, NaiveDate};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::utils::error::Result;

/// Log files older than this are removed by [`cleanup_logs`].
const LOG_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub fn log_file_name(date: NaiveDate) -> String {
    format!(
        "cultured-downloader_v{}_{}.log",
        env!("CARGO_PKG_VERSION"),
        date.format("%Y-%m-%d")
    )
}

/// Initialise console logging and, when `log_dir` is given, the daily
/// error log file. Returns the path of today's log file.
pub fn init_cli_logger(verbose: bool, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cultured_downloader=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cultured_downloader=info,warn"))
    };

    let (file_layer, log_path) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(log_file_name(Local::now().date_naive()));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .event_format(SeparatedFormat)
                .with_filter(LevelFilter::ERROR);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .init();

    Ok(log_path)
}

/// Message pointing the user at the error log.
pub fn error_log_notice(log_file: &Path) -> String {
    format!(
        "Please provide the developer with the error log generated at {}",
        log_file.display()
    )
}

/// Route panics through `tracing` so they land in the error log, then tell
/// the user where that log is.
pub fn install_panic_hook(log_file: Option<PathBuf>) {
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!("Uncaught panic: {}\n{}", info, backtrace);
        eprintln!("❌ An unexpected error occurred: {}", info);
        if let Some(path) = &log_file {
            eprintln!("💡 {}", error_log_notice(path));
        }
    }));
}

/// Error log entries framed by separator lines so a user can paste one
/// into a bug report.
struct SeparatedFormat;

impl<S, N> FormatEvent<S, N> for SeparatedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let separator = "-".repeat(100);
        writeln!(writer, "{}", separator)?;
        write!(
            writer,
            "{} [Cultured Downloader V{}] [{}]: ",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            env!("CARGO_PKG_VERSION"),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)?;
        writeln!(writer, "{}", separator)
    }
}

/// Delete empty log files and log files older than 30 days, except `keep`.
/// Returns how many files were removed.
pub fn cleanup_logs(log_dir: &Path, keep: &Path) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let cutoff = SystemTime::now()
        .checked_sub(LOG_RETENTION)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path == keep {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }

        let stale = metadata
            .modified()
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if metadata.len() == 0 || stale {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::debug!("Could not remove log file {}: {}", path.display(), e),
            }
        }
    }

    removed
}
