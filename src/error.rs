//! Error types for the collect / fetch / merge pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure or non-success HTTP status
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Declared content type does not indicate a PDF
    #[error("{url} is not a PDF file (content type: {content_type})")]
    InvalidContentType { url: String, content_type: String },

    /// Unparseable PDF input or unwritable output
    #[error("Failed to merge {subject}: {reason}")]
    Merge { subject: String, reason: String },

    /// The source yielded no PDF links
    #[error("No PDF links found in {source_name}")]
    NoLinksFound { source_name: String },

    #[error("Invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Settings file {}: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn fetch(url: &str, reason: impl ToString) -> Self {
        Error::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn merge(subject: impl ToString, reason: impl ToString) -> Self {
        Error::Merge {
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `NoLinksFound` is reported to the user but is not a crash
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoLinksFound { .. })
    }
}
