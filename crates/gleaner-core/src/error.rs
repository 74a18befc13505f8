use thiserror::Error;

use url::Url;

/// Application-wide error types for Gleaner.
#[derive(Error, Debug)]
pub enum AppError {
    /// The resource's file extension is on the deny list.
    #[error("file extension '{0}' is denied")]
    ExtensionDenied(String),

    /// The resource's content type is on the deny list.
    #[error("content type '{0}' is denied")]
    ContentTypeDenied(String),

    /// No registered parser can handle the resource.
    #[error("no parser available for extension '{extension}' and content type '{content_type}'")]
    UnsupportedContent {
        extension: String,
        content_type: String,
    },

    /// A specific parser failed on specific bytes. Non-fatal to resolution:
    /// the registry logs this and tries the next candidate.
    #[error("parsing '{location}' failed: {reason}")]
    Parse { reason: String, location: String },

    /// Container re-dispatch exceeded the nesting bound.
    #[error("parse recursion limit exceeded at depth {depth}")]
    RecursionLimitExceeded { depth: usize },

    /// Network/transfer layer failed. Terminates the current harvest job
    /// but is not fatal to the scheduler or other jobs.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Local I/O failed (surrogate storage, temp files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL could not be parsed or rewritten.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Cooperative cancellation was observed mid-operation.
    #[error("operation interrupted")]
    Interrupted,

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Build a [`AppError::Parse`] for a location.
    pub fn parse_failure(reason: impl Into<String>, location: &Url) -> Self {
        AppError::Parse {
            reason: reason.into(),
            location: location.to_string(),
        }
    }

    /// Returns true for policy rejections that an administrator can lift.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AppError::ExtensionDenied(_) | AppError::ContentTypeDenied(_)
        )
    }

    /// Returns true if this error means "this candidate failed, try the next".
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, AppError::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denials_are_denials() {
        assert!(AppError::ExtensionDenied("exe".into()).is_denial());
        assert!(AppError::ContentTypeDenied("application/x-msdownload".into()).is_denial());
        assert!(!AppError::Fetch("timeout".into()).is_denial());
        assert!(
            !AppError::UnsupportedContent {
                extension: "xyz".into(),
                content_type: "application/octet-stream".into(),
            }
            .is_denial()
        );
    }

    #[test]
    fn parse_failures_are_recoverable() {
        let url = Url::parse("http://example.org/a.bin").unwrap();
        let err = AppError::parse_failure("bad framing", &url);
        assert!(err.is_parse_failure());
        assert!(err.to_string().contains("bad framing"));
        assert!(!AppError::RecursionLimitExceeded { depth: 9 }.is_parse_failure());
        assert!(!AppError::Interrupted.is_parse_failure());
    }
}
