//! Browser capability seam.
//!
//! The orchestration logic never talks to a concrete automation backend;
//! it drives these traits so it stays portable across CDP clients,
//! WebDriver, or anything else that can navigate, screenshot, and evaluate
//! script. Implementations live outside this crate; `testing::MockBrowser`
//! exercises the seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrowserError;

/// Axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Area in square pixels.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Launches browser pages. One capture owns exactly one page for its
/// lifetime.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a new page (tab) in the browser session.
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, BrowserError>;
}

/// One open page.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Resize the viewport.
    async fn set_viewport(&self, width: u32, height: u32) -> Result<(), BrowserError>;

    /// Navigate and wait for the load + DOMContentLoaded conditions, up to
    /// `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Screenshot the current viewport as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;

    /// Render the full document to PDF bytes.
    async fn pdf(&self, timeout: Duration) -> Result<Vec<u8>, BrowserError>;

    /// Evaluate a script expression in the page's main frame and return
    /// its JSON-serialized result.
    async fn evaluate(&self, js: &str) -> Result<serde_json::Value, BrowserError>;

    /// All frames currently attached to the page, main frame first.
    fn frames(&self) -> Vec<Arc<dyn FrameHandle>>;

    /// Click at page coordinates.
    async fn click(&self, x: f64, y: f64) -> Result<(), BrowserError>;

    /// Close the page, releasing the session's resources.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// One frame within a page.
///
/// Frames detach as pages mutate; callers check [`is_detached`] before DOM
/// work and treat failures as "frame gone", never as fatal errors.
///
/// [`is_detached`]: FrameHandle::is_detached
#[async_trait]
pub trait FrameHandle: Send + Sync {
    /// True once the frame has been removed from the page.
    fn is_detached(&self) -> bool;

    /// Evaluate a script expression in this frame's context.
    async fn evaluate(&self, js: &str) -> Result<serde_json::Value, BrowserError>;

    /// Bounding box of this frame's owning element in the parent frame's
    /// coordinates. `None` for the main frame or a hidden frame element.
    async fn bounding_box(&self) -> Result<Option<Rect>, BrowserError>;

    /// Parent frame, if this is not the main frame.
    fn parent(&self) -> Option<Arc<dyn FrameHandle>>;
}
