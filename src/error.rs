//! Error types for descramble

use thiserror::Error;

/// Main error type for descramble operations
#[derive(Debug, Error)]
pub enum DescrambleError {
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("Signature apply failed: {0}")]
    SignatureApply(String),

    #[error("Stale catalog rejected by platform: {0}")]
    StaleCatalog(String),

    #[error("Player state not found in page")]
    StateNotFound,

    #[error("Missing player state field: {0}")]
    StateFieldMissing(&'static str),

    #[error("Fetch failed: {0}")]
    FetchFailed(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] std::num::ParseIntError),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl DescrambleError {
    /// Check if the error indicates the active catalog is stale and a reload
    /// plus a single retry is worth attempting
    pub fn is_stale_signal(&self) -> bool {
        matches!(self, DescrambleError::StaleCatalog(_))
    }

    /// Check if the error is fatal for a compile attempt
    pub fn is_structural(&self) -> bool {
        matches!(self, DescrambleError::StructuralMismatch(_))
    }
}
