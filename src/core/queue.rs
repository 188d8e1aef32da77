use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::http::{resolve_destination, HttpClient};
use crate::domain::model::{QueueId, QueueSnapshot, QueueStatus, RequestArgs, RequestOutcome};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{DownloaderError, Result};
use crate::utils::validation::Validate;

struct QueueEntry {
    cancel: CancellationToken,
    state: watch::Receiver<QueueSnapshot>,
}

/// Runs download queues in the background and tracks them by id.
pub struct QueueManager {
    http: HttpClient,
    config: Arc<dyn ConfigProvider>,
    next_id: AtomicU64,
    queues: Mutex<HashMap<QueueId, QueueEntry>>,
}

impl QueueManager {
    pub fn new(http: HttpClient, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            http,
            config,
            next_id: AtomicU64::new(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `requests` and start downloading them in the background.
    ///
    /// The queue stops when either `ctx` or [`Self::cancel_queue`] cancels
    /// it. Must be called from within a tokio runtime.
    pub fn new_download_queue(
        &self,
        ctx: &CancellationToken,
        requests: Vec<RequestArgs>,
    ) -> Result<QueueId> {
        if requests.is_empty() {
            return Err(DownloaderError::ValidationError {
                message: "A download queue needs at least one request".to_string(),
            });
        }
        for (index, request) in requests.iter().enumerate() {
            request
                .validate()
                .map_err(|e| DownloaderError::ValidationError {
                    message: format!("request #{}: {}", index + 1, e),
                })?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = ctx.child_token();
        let (tx, rx) = watch::channel(QueueSnapshot::new(id, requests.len()));

        self.lock_queues().insert(
            id,
            QueueEntry {
                cancel: cancel.clone(),
                state: rx,
            },
        );

        let max_concurrent = self.config.max_concurrent_downloads().max(1);
        tracing::info!(
            "Starting download queue {} ({} requests, {} at a time)",
            id,
            requests.len(),
            max_concurrent
        );
        tokio::spawn(run_queue(
            self.http.clone(),
            requests,
            max_concurrent,
            cancel,
            Arc::new(tx),
        ));

        Ok(id)
    }

    /// Cancel a queue. Cancelling a finished queue does nothing.
    pub fn cancel_queue(&self, id: QueueId) -> Result<()> {
        let queues = self.lock_queues();
        let entry = queues.get(&id).ok_or(DownloaderError::QueueNotFound(id))?;
        if entry.state.borrow().status.is_terminal() {
            tracing::debug!("Queue {} already finished, nothing to cancel", id);
            return Ok(());
        }
        tracing::info!("Cancelling download queue {}", id);
        entry.cancel.cancel();
        Ok(())
    }

    pub fn status(&self, id: QueueId) -> Result<QueueSnapshot> {
        self.lock_queues()
            .get(&id)
            .map(|entry| entry.state.borrow().clone())
            .ok_or(DownloaderError::QueueNotFound(id))
    }

    pub fn list(&self) -> Vec<QueueSnapshot> {
        let mut snapshots: Vec<QueueSnapshot> = self
            .lock_queues()
            .values()
            .map(|entry| entry.state.borrow().clone())
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots
    }

    /// Resolve once the queue reaches a terminal status.
    pub async fn wait(&self, id: QueueId) -> Result<QueueSnapshot> {
        let mut rx = self
            .lock_queues()
            .get(&id)
            .map(|entry| entry.state.clone())
            .ok_or(DownloaderError::QueueNotFound(id))?;

        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.status.is_terminal() {
                    return Ok(snapshot.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Ok(rx.borrow().clone());
            }
        }
    }

    /// Forget finished queues. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut queues = self.lock_queues();
        let before = queues.len();
        queues.retain(|_, entry| !entry.state.borrow().status.is_terminal());
        before - queues.len()
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, HashMap<QueueId, QueueEntry>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_queue(
    http: HttpClient,
    requests: Vec<RequestArgs>,
    max_concurrent: usize,
    cancel: CancellationToken,
    state: Arc<watch::Sender<QueueSnapshot>>,
) {
    state.send_modify(|s| s.status = QueueStatus::Running);

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut tasks = JoinSet::new();
    let mut claimed = HashSet::new();

    for args in requests {
        // Two requests in one queue never write the same file.
        let destination = claim_destination(&mut claimed, resolve_destination(&args).await);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            state.send_modify(|s| s.record(RequestOutcome::Cancelled { url: args.url }));
            continue;
        };

        let http = http.clone();
        let cancel = cancel.clone();
        let state = state.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = if cancel.is_cancelled() {
                RequestOutcome::Cancelled { url: args.url }
            } else {
                match http.download_to(&args, destination, &cancel).await {
                    Ok(outcome) => outcome,
                    Err(DownloaderError::Cancelled) => RequestOutcome::Cancelled { url: args.url },
                    Err(e) => {
                        tracing::error!("Failed to download {}: {}", args.url, e);
                        RequestOutcome::Failed {
                            url: args.url,
                            error: e.to_string(),
                        }
                    }
                }
            };
            state.send_modify(|s| s.record(outcome));
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Download task aborted: {}", e);
            state.send_modify(|s| {
                s.record(RequestOutcome::Failed {
                    url: String::new(),
                    error: e.to_string(),
                })
            });
        }
    }

    let cancelled = cancel.is_cancelled();
    state.send_modify(|s| {
        s.status = s.final_status(cancelled);
        s.finished_at = Some(Utc::now());
    });

    let snapshot = state.borrow();
    tracing::info!(
        "Download queue {} {}: {} downloaded, {} skipped, {} failed, {} cancelled",
        snapshot.id,
        snapshot.status,
        snapshot.completed,
        snapshot.skipped,
        snapshot.failed,
        snapshot.cancelled
    );
}

/// Claim `destination` for this queue, numbering it `name (1).ext`,
/// `name (2).ext` and so on when an earlier request already took it.
fn claim_destination(claimed: &mut HashSet<PathBuf>, destination: PathBuf) -> PathBuf {
    if claimed.insert(destination.clone()) {
        return destination;
    }

    let parent = destination.parent().unwrap_or_else(|| Path::new(""));
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = destination
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{} ({}){}", stem, n, extension));
        if claimed.insert(candidate.clone()) {
            tracing::debug!(
                "{} is already used in this queue, saving as {}",
                destination.display(),
                candidate.display()
            );
            return candidate;
        }
        n += 1;
    }
}
