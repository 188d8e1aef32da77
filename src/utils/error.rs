use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloaderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Settings parse error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("Settings write error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid website: {0}")]
    InvalidWebsite(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Encryption error: {message}")]
    CryptoError { message: String },

    #[error("Decryption failed: wrong master password or corrupted data")]
    DecryptionFailed,

    #[error("Incorrect master password")]
    IncorrectPassword,

    #[error("No master password has been set")]
    NoMasterPassword,

    #[error("Encrypted fields are locked, check the master password first")]
    VaultLocked,

    #[error("Download queue {0} not found")]
    QueueNotFound(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Filesystem,
    Configuration,
    Validation,
    Security,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DownloaderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) | Self::UnexpectedStatus { .. } => ErrorCategory::Network,
            Self::IoError(_) => ErrorCategory::Filesystem,
            Self::SerializationError(_)
            | Self::TomlDeError(_)
            | Self::TomlSerError(_)
            | Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            Self::ValidationError { .. } | Self::InvalidUrl { .. } | Self::InvalidWebsite(_) => {
                ErrorCategory::Validation
            }
            Self::CryptoError { .. }
            | Self::DecryptionFailed
            | Self::IncorrectPassword
            | Self::NoMasterPassword
            | Self::VaultLocked => ErrorCategory::Security,
            Self::QueueNotFound(_) | Self::Cancelled | Self::TaskError(_) => ErrorCategory::Queue,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled => ErrorSeverity::Low,
            Self::HttpError(_) | Self::UnexpectedStatus { .. } => ErrorSeverity::Medium,
            Self::IoError(_) | Self::CryptoError { .. } | Self::TaskError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(e) => e.is_timeout() || e.is_connect(),
            Self::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check your internet connection or disable any proxy/VPN and try again"
            }
            ErrorCategory::Filesystem => {
                "Make sure the download directory exists and is writable"
            }
            ErrorCategory::Configuration => {
                "Fix or delete the settings file to restore the default values"
            }
            ErrorCategory::Validation => "Check the values you entered and try again",
            ErrorCategory::Security => match self {
                Self::NoMasterPassword => "Set a master password with `password set` first",
                Self::VaultLocked => "Unlock the encrypted fields with `password check`",
                Self::IncorrectPassword | Self::DecryptionFailed => {
                    "Re-enter the master password, or reset the encrypted fields if it is lost"
                }
                _ => "Reset the encrypted fields and enter your credentials again",
            },
            ErrorCategory::Queue => "List the active queues and retry with a valid queue id",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::HttpError(e) if e.is_timeout() => "The request timed out".to_string(),
            Self::HttpError(e) if e.is_connect() => "Could not connect to the server".to_string(),
            Self::UnexpectedStatus { status, .. } => {
                format!("The server responded with HTTP {}", status)
            }
            Self::IoError(e) => format!("File operation failed: {}", e),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let server_error = DownloaderError::UnexpectedStatus {
            url: "https://fantia.jp".to_string(),
            status: 503,
        };
        let rate_limited = DownloaderError::UnexpectedStatus {
            url: "https://fantia.jp".to_string(),
            status: 429,
        };
        let not_found = DownloaderError::UnexpectedStatus {
            url: "https://fantia.jp".to_string(),
            status: 404,
        };

        assert!(server_error.is_retryable());
        assert!(rate_limited.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!DownloaderError::Cancelled.is_retryable());
    }

    #[test]
    fn test_category_and_severity() {
        assert_eq!(DownloaderError::VaultLocked.category(), ErrorCategory::Security);
        assert_eq!(DownloaderError::QueueNotFound(7).category(), ErrorCategory::Queue);
        assert_eq!(DownloaderError::Cancelled.severity(), ErrorSeverity::Low);
        assert_eq!(
            DownloaderError::ValidationError {
                message: "empty".to_string()
            }
            .severity(),
            ErrorSeverity::High
        );
    }

    #[test]
    fn test_security_suggestions_are_specific() {
        assert!(DownloaderError::NoMasterPassword
            .recovery_suggestion()
            .contains("password set"));
        assert!(DownloaderError::VaultLocked
            .recovery_suggestion()
            .contains("password check"));
    }
}
