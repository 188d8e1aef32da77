pub mod downloader;

pub use downloader::{CulturedDownloader, APP_NAME};
