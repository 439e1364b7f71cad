//! Typed errors for the capture engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use thiserror::Error;

/// Raised by [`CancelToken::check`](crate::cancel::CancelToken::check) when
/// the token has been canceled.
///
/// Kept distinct from [`CrawlerError`] so callers can tell cancellation
/// apart from real failures; it is always propagated, never swallowed.
#[derive(Debug, Clone, Error)]
#[error("operation canceled")]
pub struct CanceledError;

/// Errors surfaced by the browser capability.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Navigation failed or timed out
    #[error("navigation failed: {url}")]
    Navigation { url: String },

    /// Driver/protocol-level failure
    #[error("browser protocol error: {0}")]
    Protocol(String),

    /// The page or session was already closed
    #[error("browser session closed")]
    Closed,
}

/// Errors that can occur during capture, conversion, or crawl operations.
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// Navigation failed after all retry attempts; the pipeline aborts.
    #[error("failed to navigate to {url} after {attempts} attempts")]
    Navigation { url: String, attempts: u32 },

    /// Operation was canceled via a CancelToken
    #[error(transparent)]
    Canceled(#[from] CanceledError),

    /// Browser capability failure
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    /// Completion service unavailable or failed
    #[error("completion error: {0}")]
    Completion(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Search provider failure
    #[error("search error: {0}")]
    Search(String),

    /// The search provider returned no results
    #[error("no search results returned")]
    NoSearchResults,

    /// Artifact persistence failed
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding of an artifact or completion payload failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing options
    #[error("invalid options: {reason}")]
    InvalidOptions { reason: String },
}

impl CrawlerError {
    /// Wrap a completion-provider error.
    pub fn completion(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Completion(Box::new(err))
    }

    /// True when this error is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CrawlerError>;
