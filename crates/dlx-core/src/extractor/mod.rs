//! Drives the external media-extraction tool as a subprocess and parses its
//! progress/result output.

mod cleanup;
mod parse;
mod process;

pub use cleanup::cleanup_artifacts;
pub use parse::{extract_artifact_paths, extract_final_filename, parse_progress_line};
pub use process::ProcessExtractorRunner;

use crate::error::ExtractorError;
use crate::item::ItemMeta;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;
pub type FilenameCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
pub type ArtifactsCallback = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// The three callbacks a Runner is given once at construction.
#[derive(Clone)]
pub struct Callbacks {
    pub on_progress: ProgressCallback,
    pub on_filename: FilenameCallback,
    pub on_artifacts: ArtifactsCallback,
}

/// `Download(ctx, id, url) -> error`. Blocks until the subprocess exits or
/// `ctx` is canceled.
#[async_trait]
pub trait ExtractorRunner: Send + Sync {
    async fn download(&self, ctx: CancellationToken, id: &str, url: &str)
        -> Result<(), ExtractorError>;

    async fn fetch_metadata(
        &self,
        ctx: CancellationToken,
        url: &str,
    ) -> Result<ItemMeta, ExtractorError>;
}

/// Pre-validates a URL before it is ever handed to the subprocess: scheme
/// must be http(s), host non-empty, bounded length, no shell metacharacters
/// or line breaks.
pub fn validate_url(url: &str) -> Result<(), ExtractorError> {
    if url.is_empty() {
        return Err(ExtractorError::InvalidUrl("empty url".into()));
    }
    if url.len() > 2048 {
        return Err(ExtractorError::InvalidUrl("url exceeds 2048 bytes".into()));
    }
    if url
        .chars()
        .any(|c| matches!(c, ';' | '|' | '`' | '$' | '(' | ')' | '<' | '>' | '\n' | '\r'))
    {
        return Err(ExtractorError::InvalidUrl(
            "url contains disallowed characters".into(),
        ));
    }
    let parsed = url::Url::parse(url)
        .map_err(|_| ExtractorError::InvalidUrl("url does not parse".into()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ExtractorError::InvalidUrl(
            "url scheme must be http or https".into(),
        ));
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ExtractorError::InvalidUrl("url has no host".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_urls() {
        assert!(validate_url("").is_err());
        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(validate_url(&long).is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(validate_url("https://example.com/$(whoami)").is_err());
        assert!(validate_url("https://example.com/a;rm -rf /").is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate_url("ftp://example.com/x").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn accepts_plain_https_url() {
        assert!(validate_url("https://example.com/watch?v=abc").is_ok());
    }
}
