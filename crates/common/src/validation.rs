//! Input validation for the control surfaces. Keeps malformed URLs out
//! of the worker registries and external process command lines.

use anyhow::{anyhow, Result};

pub const MAX_URL_LENGTH: usize = 4096;

const ALLOWED_SCHEMES: &[&str] = &["rtmp", "rtsp", "http", "https", "file"];

pub fn validate_source_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(anyhow!("source url must not be empty"));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(anyhow!("source url exceeds {} bytes", MAX_URL_LENGTH));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(anyhow!("source url must not contain whitespace"));
    }
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| anyhow!("source url must carry a scheme"))?;
    if !ALLOWED_SCHEMES.contains(&scheme) {
        return Err(anyhow!("unsupported url scheme '{}'", scheme));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_stream_urls() {
        assert!(validate_source_url("rtmp://localhost/live/cam1").is_ok());
        assert!(validate_source_url("rtsp://10.0.0.2:554/main").is_ok());
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(validate_source_url("").is_err());
        assert!(validate_source_url("not a url").is_err());
        assert!(validate_source_url("gopher://x").is_err());
        assert!(validate_source_url("cam1").is_err());
    }
}
