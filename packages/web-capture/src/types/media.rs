//! Captured media and action item types.

use serde::{Deserialize, Serialize};

/// One persisted capture artifact (screenshot or PDF).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedMedia {
    /// Path relative to the output root (`{crawl_id}/{name}`)
    pub path: String,

    /// Publicly reachable URL of the artifact, used in completion prompts
    pub url: String,

    /// MIME type ("image/png" or "application/pdf")
    pub content_type: String,

    /// Interactive elements visible in this frame of the page
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<ActionItem>,
}

/// One interactive DOM element's projected screen geometry.
///
/// Coordinates are page-absolute: frame-local positions are shifted by the
/// accumulated offsets of all ancestor frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    /// Short hex id, unique within one enumeration pass
    pub id: String,

    /// Element kind (tag name, or "RichTextEditor"/"BUTTON" for
    /// content-editable and clickable divs)
    #[serde(rename = "type")]
    pub kind: String,

    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,

    /// Best-effort label: aria-label, placeholder, tooltip, title, or
    /// inner text
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility_label: Option<String>,

    /// Absolute link target, when the element carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    /// Index of the frame the element belongs to
    #[serde(default)]
    pub frame_index: usize,
}

impl ActionItem {
    /// Center point of the element, for click targeting.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Render as a markdown link line for completion prompts.
    pub fn to_md_link(&self) -> String {
        format!(
            "- [{}]({})",
            self.text.replace('\n', " "),
            self.href.as_deref().unwrap_or("#")
        )
    }
}
