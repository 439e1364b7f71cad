//! Capture options and results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::media::{ActionItem, CapturedMedia};

/// Options for one `capture_page` call.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// The URL to capture
    pub url: String,

    /// Groups all artifacts of this capture; generated when not supplied
    pub set_id: Option<String>,

    /// Extra CSS injected into the page before capture, concatenated after
    /// any matching page-preset CSS
    pub css: Option<String>,

    /// Also render the full document to PDF
    pub pdf: bool,

    /// Take every screenshot first, then run the observer per image
    pub capture_all_images_before_callback: bool,

    /// Upper bound on scroll-capture iterations
    pub max_capture_count: usize,
}

impl CaptureOptions {
    /// Capture options for a URL with defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            set_id: None,
            css: None,
            pdf: false,
            capture_all_images_before_callback: false,
            max_capture_count: 100,
        }
    }

    /// Use a fixed set id instead of a generated one.
    pub fn with_set_id(mut self, set_id: impl Into<String>) -> Self {
        self.set_id = Some(set_id.into());
        self
    }

    /// Inject CSS before capture.
    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }

    /// Also capture a PDF render.
    pub fn with_pdf(mut self) -> Self {
        self.pdf = true;
        self
    }

    /// Capture all screenshots before invoking the observer.
    pub fn capture_all_before_callback(mut self) -> Self {
        self.capture_all_images_before_callback = true;
        self
    }

    /// Bound the number of scroll-capture iterations.
    pub fn with_max_captures(mut self, max_capture_count: usize) -> Self {
        self.max_capture_count = max_capture_count;
        self
    }

    /// Resolve the set id, generating one if absent. Stable for all
    /// artifacts of one capture.
    pub fn resolve_set_id(&mut self) -> String {
        self.set_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }
}

/// Instruction returned by a capture observer after each image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureInstruction {
    /// Keep scrolling and capturing
    Continue,

    /// Stop the capture loop
    Stop,

    /// Re-take the same frame without advancing the index
    Retry,

    /// Re-take the same frame in safe mode: longer settle delay and fixed
    /// elements left visible
    RetrySafe,
}

/// Everything gathered for one URL in one browser session.
///
/// Owned by the caller after return; immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCapture {
    /// The URL that was captured
    pub url: String,

    /// Captured screenshots, in capture order (retries included)
    pub images: Vec<CapturedMedia>,

    /// Full-document PDF render, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<CapturedMedia>,

    /// The set id grouping this capture's artifacts
    pub set_id: String,

    /// Interactive elements from the final viewport position
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<ActionItem>,

    /// True when the loop ran out of content (rather than being stopped)
    pub completed: bool,
}
