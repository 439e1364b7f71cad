//! Conversion options and results.

use serde::{Deserialize, Serialize};

use super::capture::{CaptureOptions, PageCapture};
use super::media::CapturedMedia;

/// Options for one `convert_page` call.
///
/// Either `capture_options` or `url` must be supplied; the page is captured
/// first and then converted.
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    /// Capture the page with these options first
    pub capture_options: Option<CaptureOptions>,

    /// Shorthand for `capture_options` with defaults
    pub url: Option<String>,
}

impl ConversionOptions {
    /// Convert a URL with default capture options.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Convert with explicit capture options.
    pub fn for_capture(options: CaptureOptions) -> Self {
        Self {
            capture_options: Some(options),
            ..Default::default()
        }
    }
}

/// Rolling conversion state exposed to hooks.
#[derive(Debug, Clone, Default)]
pub struct ConversionProgress {
    /// Markdown fragments generated so far, in capture order
    pub fragments: Vec<String>,

    /// Images captured so far
    pub images: Vec<CapturedMedia>,
}

/// A page converted to markdown with a summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConversion {
    /// The converted URL
    pub url: String,

    /// The page as one stitched markdown document
    pub markdown: String,

    /// Summary of the markdown document
    pub summary: String,

    /// The set id grouping this conversion's artifacts
    pub set_id: String,
}

/// Result of a conversion, carrying the capture it was generated from.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub conversion: PageConversion,
    pub capture: PageCapture,
}
