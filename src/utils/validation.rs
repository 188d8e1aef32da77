use crate::utils::error::{DownloaderError, Result};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> DownloaderError {
    DownloaderError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.into(),
        reason: reason.into(),
    }
}

/// Accepts absolute `http`/`https` URLs only.
pub fn validate_url(field: &str, raw: &str) -> Result<()> {
    if raw.trim().is_empty() {
        return Err(invalid(field, raw, "URL cannot be empty"));
    }
    let url = Url::parse(raw).map_err(|e| invalid(field, raw, format!("Invalid URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            field,
            raw,
            format!("Only http and https URLs can be downloaded, got {}", url.scheme()),
        ));
    }
    Ok(())
}

pub fn validate_path(field: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field, path, "Path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field, path.replace('\0', "\\0"), "Path contains a NUL byte"));
    }
    Ok(())
}

pub fn validate_non_empty_string(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, value, "Value cannot be empty"));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field,
            value.to_string(),
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

/// Parse an HTTP method name, case-insensitively.
pub fn validate_http_method(method: &str) -> Result<Method> {
    let normalized = method.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(invalid("method", method, "Method cannot be empty"));
    }
    Method::from_bytes(normalized.as_bytes())
        .map_err(|_| invalid("method", method, "Not a valid HTTP method"))
}

/// Parse one request header.
pub fn validate_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let bad = || invalid("headers", format!("{}: {}", name, value), "Invalid header name or value");
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| bad())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| bad())?;
    Ok((header_name, header_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_schemes() {
        assert!(validate_url("url", "https://fantia.jp/posts/1").is_ok());
        assert!(validate_url("url", "http://127.0.0.1:8080/file.bin").is_ok());
        assert!(validate_url("url", " ").is_err());
        assert!(validate_url("url", "fantia.jp/posts/1").is_err());

        let err = validate_url("url", "file:///etc/passwd").unwrap_err();
        assert!(err.to_string().contains("got file"));
    }

    #[test]
    fn test_validate_path_rejects_nul() {
        assert!(validate_path("file_path", "downloads/a.png").is_ok());
        assert!(validate_path("file_path", "").is_err());
        let err = validate_path("file_path", "bad\0path").unwrap_err();
        assert!(err.to_string().contains("bad\\0path"));
    }

    #[test]
    fn test_validate_range_with_u64_bounds() {
        assert!(validate_range("general.max_retries", 3u32, 0, 10).is_ok());
        assert!(validate_range("general.max_retries", 11u32, 0, 10).is_err());
        assert!(validate_range("timeout_secs", u64::MAX, 1, u64::MAX).is_ok());
        assert!(validate_range("timeout_secs", 0u64, 1, u64::MAX).is_err());
    }

    #[test]
    fn test_validate_http_method() {
        assert_eq!(validate_http_method(" get ").unwrap(), Method::GET);
        assert_eq!(validate_http_method("head").unwrap(), Method::HEAD);
        assert!(validate_http_method("").is_err());
        assert!(validate_http_method("GE T").is_err());
    }

    #[test]
    fn test_validate_header() {
        let (name, value) = validate_header("Referer", "https://fantia.jp").unwrap();
        assert_eq!(name.as_str(), "referer");
        assert_eq!(value, "https://fantia.jp");
        assert!(validate_header("Bad Header", "x").is_err());
        assert!(validate_header("X-Test", "line\nbreak").is_err());
    }
}
