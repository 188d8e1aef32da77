use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};

pub type QueueId = u64;

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// One HTTP transfer in a download queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: Vec<(String, String)>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Treat non-2xx responses as errors.
    #[serde(default = "default_true")]
    pub check_status: bool,
    /// Destination file. An existing directory (or a path ending in a
    /// separator) takes the file name from the URL.
    pub file_path: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
}

impl RequestArgs {
    pub fn get(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            params: Vec::new(),
            cookies: BTreeMap::new(),
            user_agent: None,
            timeout_secs: None,
            check_status: true,
            file_path: file_path.into(),
            overwrite: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl Validate for RequestArgs {
    fn validate(&self) -> Result<()> {
        validation::validate_url("url", &self.url)?;
        validation::validate_http_method(&self.method)?;
        for (name, value) in &self.headers {
            validation::validate_header(name, value)?;
        }
        if let Some(timeout) = self.timeout_secs {
            validation::validate_range("timeout_secs", timeout, 1, u64::MAX)?;
        }
        validation::validate_path("file_path", &self.file_path.to_string_lossy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
    Failed { url: String, error: String },
    Cancelled { url: String },
}

/// Point-in-time view of a queue's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub id: QueueId,
    pub status: QueueStatus,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes_downloaded: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<RequestOutcome>,
}

impl QueueSnapshot {
    pub fn new(id: QueueId, total: usize) -> Self {
        Self {
            id,
            status: QueueStatus::Pending,
            total,
            completed: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
            bytes_downloaded: 0,
            created_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::with_capacity(total),
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.skipped + self.failed + self.cancelled
    }

    pub fn record(&mut self, outcome: RequestOutcome) {
        match &outcome {
            RequestOutcome::Downloaded { bytes, .. } => {
                self.completed += 1;
                self.bytes_downloaded += bytes;
            }
            RequestOutcome::Skipped { .. } => self.skipped += 1,
            RequestOutcome::Failed { .. } => self.failed += 1,
            RequestOutcome::Cancelled { .. } => self.cancelled += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Terminal status implied by the recorded outcomes.
    pub fn final_status(&self, cancelled: bool) -> QueueStatus {
        if cancelled || self.cancelled > 0 {
            QueueStatus::Cancelled
        } else if self.failed > 0 {
            QueueStatus::Failed
        } else {
            QueueStatus::Completed
        }
    }
}
