use futures_util::StreamExt;
use rand::Rng;
use reqwest::header::{HeaderMap, COOKIE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::model::{RequestArgs, RequestOutcome};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{DownloaderError, Result};
use crate::utils::validation;

pub const DEFAULT_CONNECTIVITY_URL: &str = "https://www.google.com";
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_FILE_NAME: &str = "download";

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max_delay`, plus up to 25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_cap = (capped.as_millis() / 4) as u64;
        let jitter = if jitter_cap > 0 {
            rand::thread_rng().gen_range(0..=jitter_cap)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    default_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    pub fn new(config: &dyn ConfigProvider) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy {
                max_retries: config.max_retries(),
                ..RetryPolicy::default()
            },
            default_timeout: config.request_timeout(),
            user_agent: config.user_agent(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Translate request args into a reqwest builder: method, query
    /// params, headers, user agent, cookies and timeout.
    pub fn build_request(&self, args: &RequestArgs) -> Result<RequestBuilder> {
        let method = validation::validate_http_method(&args.method)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &args.headers {
            let (header_name, header_value) = validation::validate_header(name, value)?;
            headers.insert(header_name, header_value);
        }

        if !args.cookies.is_empty() {
            let jar = args
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            let cookie = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => format!("{}; {}", existing, jar),
                _ => jar,
            };
            let (_, cookie_value) = validation::validate_header(COOKIE.as_str(), &cookie)?;
            headers.insert(COOKIE, cookie_value);
        }

        let user_agent = args.user_agent.as_deref().unwrap_or(&self.user_agent);
        let timeout = args
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut builder = self
            .client
            .request(method, &args.url)
            .header(USER_AGENT, user_agent)
            .headers(headers)
            .timeout(timeout);
        if !args.params.is_empty() {
            builder = builder.query(&args.params);
        }
        Ok(builder)
    }

    /// Send the request, retrying connection failures, timeouts, 429 and
    /// 5xx responses. With `check_status` unset any response is returned.
    pub async fn send(&self, args: &RequestArgs, cancel: &CancellationToken) -> Result<Response> {
        let mut attempt = 0;
        loop {
            let request = self.build_request(args)?;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloaderError::Cancelled),
                result = request.send() => result,
            };

            let error = match result {
                Ok(response) => {
                    let status = response.status();
                    if !args.check_status || status.is_success() {
                        return Ok(response);
                    }
                    DownloaderError::UnexpectedStatus {
                        url: args.url.clone(),
                        status: status.as_u16(),
                    }
                }
                Err(e) => DownloaderError::HttpError(e),
            };

            if !error.is_retryable() || attempt >= self.retry.max_retries {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            attempt += 1;
            tracing::warn!(
                "Request to {} failed ({}), retry {}/{} in {:?}",
                args.url,
                error,
                attempt,
                self.retry.max_retries,
                delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloaderError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Download the response body to the request's destination.
    pub async fn download(
        &self,
        args: &RequestArgs,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome> {
        let destination = resolve_destination(args).await;
        self.download_to(args, destination, cancel).await
    }

    /// Download to an already resolved destination.
    ///
    /// Existing files are skipped unless `overwrite` is set. The body goes to
    /// a uniquely named temp file next to the destination, which is moved
    /// into place once complete. A failed or cancelled transfer removes it.
    pub async fn download_to(
        &self,
        args: &RequestArgs,
        destination: PathBuf,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome> {
        if !args.overwrite && tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            tracing::debug!("Skipping {}, file already exists", destination.display());
            return Ok(RequestOutcome::Skipped { path: destination });
        }

        let response = self.send(args, cancel).await?;

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;

        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(&parent)?
            .into_parts();
        let bytes = stream_to_file(response, tokio::fs::File::from_std(file), cancel).await?;

        temp_path
            .persist(&destination)
            .map_err(|e| DownloaderError::IoError(e.error))?;
        tracing::debug!("Downloaded {} ({} bytes)", destination.display(), bytes);
        Ok(RequestOutcome::Downloaded {
            path: destination,
            bytes,
        })
    }

    /// `true` when `url` answers a HEAD request within five seconds.
    pub async fn check_internet_connection(&self, url: &str) -> bool {
        match self
            .client
            .head(url)
            .header(USER_AGENT, &self.user_agent)
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Connectivity check against {} failed: {}", url, e);
                false
            }
        }
    }
}

async fn stream_to_file(
    response: Response,
    mut file: tokio::fs::File,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloaderError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Destination file for a request. A directory (existing, or written with a
/// trailing separator) gets the file name from the URL.
pub async fn resolve_destination(args: &RequestArgs) -> PathBuf {
    let raw = args.file_path.to_string_lossy();
    let is_dir_hint = raw.ends_with(std::path::is_separator);
    let is_dir = is_dir_hint
        || tokio::fs::metadata(&args.file_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

    if is_dir {
        args.file_path.join(file_name_from_url(&args.url))
    } else {
        args.file_path.clone()
    }
}

/// Last non-empty path segment of `url`, percent-decoded and made safe to
/// use as a file name.
pub fn file_name_from_url(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
    });

    let Some(segment) = segment else {
        return FALLBACK_FILE_NAME.to_string();
    };

    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.clone());
    let sanitized: String = decoded
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('.');
    if trimmed.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
