use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("access forbidden after {attempts} attempts: {url}")]
    AuthRejected { url: String, attempts: u32 },

    #[error("rate limited after {attempts} attempts: {url}")]
    RateLimited { url: String, attempts: u32 },

    #[error("connection reset after {attempts} attempts: {url}")]
    TransportReset { url: String, attempts: u32 },

    #[error("post not found: {url}")]
    NotFound { url: String },

    #[error("post has been deleted or removed: {url}")]
    Deleted { url: String },

    #[error("manifest unavailable at {url}: {reason}")]
    ManifestUnavailable { url: String, reason: String },

    #[error("malformed manifest: {reason}")]
    ManifestMalformed { reason: String },

    #[error("stream download failed for {url}: {reason}")]
    StreamDownloadFailed { url: String, reason: String },

    #[error("mux failed: {reason}")]
    MuxFailed { reason: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ScrapeError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn manifest_unavailable(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::ManifestUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn manifest_malformed(reason: impl Into<String>) -> Self {
        Self::ManifestMalformed {
            reason: reason.into(),
        }
    }

    pub fn stream_download(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::StreamDownloadFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn mux_failed(reason: impl Into<String>) -> Self {
        Self::MuxFailed {
            reason: reason.into(),
        }
    }

    /// Errors that only cost a single media item; the surrounding post is still returned.
    pub fn is_media_item_error(&self) -> bool {
        matches!(
            self,
            Self::ManifestUnavailable { .. }
                | Self::ManifestMalformed { .. }
                | Self::StreamDownloadFailed { .. }
                | Self::MuxFailed { .. }
        )
    }

    /// Errors produced by the upstream refusing to serve us after every retry.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected { .. } | Self::RateLimited { .. } | Self::TransportReset { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_item_errors_are_classified() {
        assert!(ScrapeError::mux_failed("exit 1").is_media_item_error());
        assert!(ScrapeError::manifest_malformed("no period").is_media_item_error());
        assert!(
            !ScrapeError::NotFound {
                url: "https://example.com".into()
            }
            .is_media_item_error()
        );
    }

    #[test]
    fn blocked_errors_are_classified() {
        let err = ScrapeError::AuthRejected {
            url: "https://example.com/a.json".into(),
            attempts: 5,
        };
        assert!(err.is_blocked());
        assert!(err.to_string().contains("5 attempts"));
        assert!(!ScrapeError::configuration("missing cookie").is_blocked());
    }
}
