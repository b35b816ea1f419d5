//! Crate-local error enums, one per module family.
//!
//! The core returns these from fallible operations; `anyhow::Error` is used
//! only at the outermost HTTP/CLI boundary where errors are formatted for a
//! human or a response body.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor binary not found or missing progress-template support")]
    NotFound,
    #[error("extractor reports an outdated version")]
    Outdated,
    #[error("refused to invoke extractor: {0}")]
    InvalidUrl(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("postprocessing failed: {0}")]
    Postprocessing(String),
    #[error("no media information returned")]
    NoMediaInfo,
    #[error("operation canceled")]
    Canceled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("download {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SchedulerError {
    #[error("scheduler is shutting down")]
    ShuttingDown,
    #[error("job queue is full")]
    QueueFull,
}

/// Truncates `msg` to at most `max_bytes`, on a valid UTF-8 boundary.
pub fn truncate_error_message(msg: &str, max_bytes: usize) -> String {
    if msg.len() <= max_bytes {
        return msg.to_string();
    }
    let mut take = max_bytes;
    while take > 0 && !msg.is_char_boundary(take) {
        take -= 1;
    }
    msg[..take].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_message_unchanged() {
        assert_eq!(truncate_error_message("boom", 512), "boom");
    }

    #[test]
    fn truncate_long_message_respects_utf8_boundary() {
        let msg = "é".repeat(400); // 2 bytes each => 800 bytes
        let truncated = truncate_error_message(&msg, 512);
        assert!(truncated.len() <= 512);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
