pub mod crypto;
pub mod http;
pub mod queue;
pub mod site;
pub mod vault;

pub use crate::domain::model::{QueueId, QueueSnapshot, QueueStatus, RequestArgs, RequestOutcome};
pub use crate::domain::ports::{ConfigProvider, PasswordPrompt, Storage};
pub use crate::utils::error::Result;
pub use http::{HttpClient, RetryPolicy};
pub use queue::QueueManager;
pub use site::Website;
pub use vault::CredentialVault;
