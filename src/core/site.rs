use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use url::Url;

use crate::core::vault::{FANTIA_SESSION_FIELD, PIXIV_FANBOX_SESSION_FIELD};
use crate::utils::error::{DownloaderError, Result};

static FANTIA_POST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://fantia\.jp/posts/\d+$").expect("valid regex"));
static FANTIA_CREATOR_POSTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://fantia\.jp/fanclubs/\d+(/posts)?$").expect("valid regex")
});
static PIXIV_FANBOX_POST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(www\.fanbox\.cc/@[\w&.-]+|[\w&.-]+\.fanbox\.cc)/posts/\d+$")
        .expect("valid regex")
});
static PIXIV_FANBOX_CREATOR_POSTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(www\.fanbox\.cc/@[\w&.-]+|[\w&.-]+\.fanbox\.cc)(/posts)?$")
        .expect("valid regex")
});
static PAGE_NUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9]\d*(-[1-9]\d*)?$").expect("valid regex"));

/// Largest page range a single creator URL may expand to.
pub const MAX_PAGES_PER_URL: u32 = 1000;

/// Keeps creator pages ordered newest to oldest.
const FANTIA_PAGE_SUFFIX: &str = "&q[s]=newer&q[tag]=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Website {
    Fantia,
    PixivFanbox,
}

impl Website {
    pub fn readable_name(self) -> &'static str {
        match self {
            Self::Fantia => "Fantia",
            Self::PixivFanbox => "Pixiv Fanbox",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fantia => "fantia",
            Self::PixivFanbox => "pixiv_fanbox",
        }
    }

    /// Name of the cookie carrying the logged-in session.
    pub fn session_cookie_name(self) -> &'static str {
        match self {
            Self::Fantia => "_session_id",
            Self::PixivFanbox => "FANBOXSESSID",
        }
    }

    /// Vault field holding the session cookie value.
    pub fn session_field(self) -> &'static str {
        match self {
            Self::Fantia => FANTIA_SESSION_FIELD,
            Self::PixivFanbox => PIXIV_FANBOX_SESSION_FIELD,
        }
    }

    /// Detect the website from a URL's host.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        if host == "fantia.jp" || host.ends_with(".fantia.jp") {
            Some(Self::Fantia)
        } else if host == "fanbox.cc"
            || host.ends_with(".fanbox.cc")
            || host == "pximg.net"
            || host.ends_with(".pximg.net")
        {
            Some(Self::PixivFanbox)
        } else {
            None
        }
    }

    fn url_pattern(self, creator_page: bool) -> &'static Regex {
        match (self, creator_page) {
            (Self::Fantia, false) => &*FANTIA_POST_RE,
            (Self::Fantia, true) => &*FANTIA_CREATOR_POSTS_RE,
            (Self::PixivFanbox, false) => &*PIXIV_FANBOX_POST_RE,
            (Self::PixivFanbox, true) => &*PIXIV_FANBOX_CREATOR_POSTS_RE,
        }
    }

    pub fn url_example(self, creator_page: bool) -> &'static str {
        match (self, creator_page) {
            (Self::Fantia, false) => "https://fantia.jp/posts/1234567",
            (Self::Fantia, true) => "https://fantia.jp/fanclubs/1234/posts",
            (Self::PixivFanbox, false) => {
                "https://www.fanbox.cc/@creator_name/posts/1234567 or https://creator_name.fanbox.cc/posts/1234567"
            }
            (Self::PixivFanbox, true) => {
                "https://www.fanbox.cc/@creator_name/posts or https://creator_name.fanbox.cc/posts"
            }
        }
    }
}

impl FromStr for Website {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        [Self::Fantia, Self::PixivFanbox]
            .into_iter()
            .find(|website| website.as_str() == name)
            .ok_or(DownloaderError::InvalidWebsite(name))
    }
}

impl std::fmt::Display for Website {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.readable_name())
    }
}

/// Parse a comma separated list of post or creator URLs.
///
/// Duplicates are dropped keeping the first occurrence, trailing slashes
/// are stripped and creator URLs always end in `/posts`.
pub fn parse_user_urls(website: Website, creator_page: bool, input: &str) -> Result<Vec<String>> {
    let pattern = website.url_pattern(creator_page);
    let mut formatted: Vec<String> = Vec::new();

    for raw in input.split(',').map(str::trim).filter(|u| !u.is_empty()) {
        let url = raw.strip_suffix('/').unwrap_or(raw);
        if !pattern.is_match(url) {
            return Err(DownloaderError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("expected a URL such as {}", website.url_example(creator_page)),
            });
        }

        let url = if creator_page && !url.ends_with("/posts") {
            format!("{}/posts", url)
        } else {
            url.to_string()
        };

        if formatted.contains(&url) {
            tracing::warn!("Duplicate URL removed: {}", url);
            continue;
        }
        formatted.push(url);
    }

    if formatted.is_empty() {
        return Err(DownloaderError::ValidationError {
            message: "Please enter a URL".to_string(),
        });
    }
    Ok(formatted)
}

/// Expand one page spec (`N` or `N-M`) per creator URL into page URLs.
pub fn expand_page_ranges(website: Website, urls: &[String], pages: &str) -> Result<Vec<String>> {
    let specs: Vec<&str> = pages.split(',').map(str::trim).collect();
    if specs.len() != urls.len() {
        return Err(DownloaderError::ValidationError {
            message: format!(
                "The number of page numbers entered ({}) does not match the number of URLs entered ({})",
                specs.len(),
                urls.len()
            ),
        });
    }

    let mut expanded = Vec::new();
    for (url, spec) in urls.iter().zip(specs) {
        let (start, end) = parse_page_spec(spec)?;
        for page in start..=end {
            let mut page_url = format!("{}?page={}", url, page);
            if website == Website::Fantia {
                page_url.push_str(FANTIA_PAGE_SUFFIX);
            }
            expanded.push(page_url);
        }
    }
    Ok(expanded)
}

fn parse_page_spec(spec: &str) -> Result<(u32, u32)> {
    let invalid = || DownloaderError::ValidationError {
        message: format!(
            "The page number, {}, is invalid. Please enter in the correct format such as '1, 1-3'",
            spec
        ),
    };

    if !PAGE_NUM_RE.is_match(spec) {
        return Err(invalid());
    }

    let mut parts = spec.splitn(2, '-').map(|n| n.parse::<u32>().map_err(|_| invalid()));
    let start = parts.next().ok_or_else(invalid)??;
    let end = parts.next().transpose()?.unwrap_or(start);
    let (start, end) = (start.min(end), start.max(end));

    if end - start >= MAX_PAGES_PER_URL {
        return Err(DownloaderError::ValidationError {
            message: format!(
                "The page range, {}, covers more than {} pages",
                spec, MAX_PAGES_PER_URL
            ),
        });
    }
    Ok((start, end))
}
