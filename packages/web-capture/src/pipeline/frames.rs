//! In-page script helpers shared by the pipelines.
//!
//! Everything here degrades instead of failing: frames detach at any time
//! while a page mutates, so per-frame errors fall back to empty results or
//! zero offsets rather than aborting a capture.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::browser::{FrameHandle, PageHandle};
use crate::types::media::ActionItem;

/// Minimum edge length for a frame to count as visible.
const MIN_VISIBLE_FRAME_PX: f64 = 20.0;

/// Deepest frame-ancestor chain walked when computing offsets.
const MAX_FRAME_DEPTH: usize = 16;

/// Budget for a single frame-geometry query before degrading.
const FRAME_GEOMETRY_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempts to scroll past content that is still streaming in.
const SCROLL_RETRY_LIMIT: u32 = 10;

const SCROLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Injects a style tag with the given CSS. `__CSS__` is replaced with a JS
/// string literal.
const INJECT_CSS_JS: &str = r#"/* wc:inject-css */ (() => {
    const style = document.createElement('style');
    style.textContent = __CSS__;
    document.head.appendChild(style);
    return true;
})()"#;

/// Hides fixed and sticky elements so they do not repeat in every capture
/// frame. Marks touched elements so they can be restored.
const HIDE_FIXED_JS: &str = r#"/* wc:hide-fixed */ (() => {
    let count = 0;
    for (const el of document.body.querySelectorAll('*')) {
        const position = getComputedStyle(el).position;
        if (position === 'fixed' || position === 'sticky') {
            el.dataset.wcHiddenFixed = el.style.visibility || '__none__';
            el.style.visibility = 'hidden';
            count++;
        }
    }
    return count;
})()"#;

/// Restores elements hidden by the fixed-element pass.
const SHOW_FIXED_JS: &str = r#"/* wc:show-fixed */ (() => {
    let count = 0;
    for (const el of document.querySelectorAll('[data-wc-hidden-fixed]')) {
        const prev = el.dataset.wcHiddenFixed;
        el.style.visibility = prev === '__none__' ? '' : prev;
        delete el.dataset.wcHiddenFixed;
        count++;
    }
    return count;
})()"#;

/// Scrolls down by `__DISTANCE__` pixels and reports positions. The target
/// is the scrollable element under the viewport center (walking up from the
/// hit element), so pages whose scroll container is not the document still
/// advance; falls back to the document's scrolling element.
const SCROLL_JS: &str = r#"/* wc:scroll */ (() => {
    const distance = __DISTANCE__;
    const scrollable = (el) => {
        if (el.scrollHeight - 10 <= el.clientHeight) return false;
        const overflow = getComputedStyle(el).overflowY;
        return overflow !== 'hidden' && overflow !== 'clip';
    };
    let target = document.elementFromPoint(window.innerWidth / 2, window.innerHeight / 2);
    while (target && !scrollable(target)) target = target.parentElement;
    if (!target) target = document.scrollingElement || document.documentElement;
    const before = target.scrollTop;
    target.scrollTo({ top: before + distance, behavior: 'instant' });
    const max = Math.max(0, target.scrollHeight - target.clientHeight);
    return { before, after: target.scrollTop, max };
})()"#;

/// Enumerates interactive elements in the current document. Coordinates are
/// frame-local viewport coordinates; the caller shifts them by the frame's
/// page offset. `__VIEWPORT_ONLY__` is replaced with a boolean literal.
/// Disabled controls and elements hidden by visibility, opacity or
/// content-visibility are skipped.
const ACTION_ITEMS_JS: &str = r#"/* wc:action-items */ (() => {
    const viewportOnly = __VIEWPORT_ONLY__;
    const items = [];
    let next = 0;
    const selector = '[href],button:not([disabled]),input:not([disabled]),'
        + 'select:not([disabled]),textarea:not([disabled]),'
        + '[contenteditable]:not([contenteditable="false"]),'
        + '[tabindex]:not([disabled]),details,summary,[onclick],[role="button"]';
    for (const el of document.querySelectorAll(selector)) {
        const rect = el.getBoundingClientRect();
        if (rect.width < 1 || rect.height < 1) continue;
        if (viewportOnly && (rect.bottom < 0 || rect.top > window.innerHeight)) continue;
        if (typeof el.checkVisibility === 'function' && !el.checkVisibility({
            contentVisibilityAuto: true,
            contentVisibilityCss: true,
            opacityProperty: true,
            visibilityProperty: true,
        })) continue;
        let type = el.tagName;
        if (el.isContentEditable) type = 'RichTextEditor';
        else if (type === 'DIV') type = 'BUTTON';
        items.push({
            id: (next++).toString(16).toUpperCase(),
            type,
            x: rect.x,
            y: rect.y,
            w: rect.width,
            h: rect.height,
            text: (el.getAttribute('aria-label') || el.getAttribute('placeholder')
                || el.getAttribute('title') || el.innerText || '').trim().slice(0, 200),
            accessibility_label: el.getAttribute('aria-label') || undefined,
            href: el.href || undefined,
        });
    }
    return items;
})()"#;

/// Add a style tag with the given CSS to the page's main frame.
pub(crate) async fn inject_css(page: &dyn PageHandle, css: &str) -> Result<()> {
    let literal = serde_json::to_string(css)?;
    page.evaluate(&INJECT_CSS_JS.replace("__CSS__", &literal))
        .await?;
    Ok(())
}

/// Hide fixed/sticky elements before a scrolled screenshot.
pub(crate) async fn hide_fixed_elements(page: &dyn PageHandle) {
    if let Err(err) = page.evaluate(HIDE_FIXED_JS).await {
        warn!(error = %err, "failed to hide fixed elements");
    }
}

/// Restore elements hidden by [`hide_fixed_elements`].
pub(crate) async fn show_fixed_elements(page: &dyn PageHandle) {
    if let Err(err) = page.evaluate(SHOW_FIXED_JS).await {
        warn!(error = %err, "failed to restore fixed elements");
    }
}

/// Scroll the page down by `distance` pixels.
///
/// Returns `false` once the page cannot scroll any further. A scroll that
/// does not move while more content should exist below is retried, giving
/// lazily loaded content time to arrive.
pub(crate) async fn scroll_down(page: &dyn PageHandle, distance: u32) -> Result<bool> {
    let js = SCROLL_JS.replace("__DISTANCE__", &distance.to_string());
    for attempt in 0..SCROLL_RETRY_LIMIT {
        let value = page.evaluate(&js).await?;
        let before = value.get("before").and_then(Value::as_f64).unwrap_or(0.0);
        let after = value.get("after").and_then(Value::as_f64).unwrap_or(0.0);
        let max = value.get("max").and_then(Value::as_f64).unwrap_or(0.0);

        if after > before {
            return Ok(true);
        }
        if after >= max {
            return Ok(false);
        }
        debug!(attempt, after, max, "scroll did not advance, waiting for content");
        tokio::time::sleep(SCROLL_RETRY_DELAY).await;
    }
    Ok(false)
}

/// Frames of the page that are attached and large enough to matter. The
/// main frame is always first and always included.
pub(crate) async fn visible_frames(page: &dyn PageHandle) -> Vec<Arc<dyn FrameHandle>> {
    let mut frames = page.frames().into_iter();
    let Some(main) = frames.next() else {
        return Vec::new();
    };

    let mut visible: Vec<Arc<dyn FrameHandle>> = vec![main];
    for frame in frames {
        if frame.is_detached() {
            continue;
        }
        let boxed = tokio::time::timeout(FRAME_GEOMETRY_TIMEOUT, frame.bounding_box()).await;
        match boxed {
            Ok(Ok(Some(rect)))
                if rect.width >= MIN_VISIBLE_FRAME_PX && rect.height >= MIN_VISIBLE_FRAME_PX =>
            {
                visible.push(frame);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, "frame geometry unavailable"),
            Err(_) => debug!("frame geometry timed out"),
        }
    }
    visible
}

/// Accumulated page offset of a frame: the sum of its ancestors' bounding
/// boxes. Degrades to `(0, 0)` when geometry is unavailable in time.
pub(crate) async fn frame_offset(frame: &Arc<dyn FrameHandle>) -> (f64, f64) {
    let walk = async {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut current = Arc::clone(frame);
        for _ in 0..MAX_FRAME_DEPTH {
            if current.is_detached() {
                return None;
            }
            match current.bounding_box().await {
                Ok(Some(rect)) => {
                    x += rect.x;
                    y += rect.y;
                }
                Ok(None) => {}
                Err(_) => return None,
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some((x, y))
    };

    match tokio::time::timeout(FRAME_GEOMETRY_TIMEOUT, walk).await {
        Ok(Some(offset)) => offset,
        _ => (0.0, 0.0),
    }
}

/// Enumerate interactive elements across all visible frames, in
/// page-absolute coordinates.
///
/// `viewport_only` limits the scan to elements intersecting the current
/// viewport; link scans pass `false` to see the whole document.
pub(crate) async fn frames_action_items(
    page: &dyn PageHandle,
    viewport_only: bool,
) -> Result<Vec<ActionItem>> {
    let js = ACTION_ITEMS_JS.replace("__VIEWPORT_ONLY__", if viewport_only { "true" } else { "false" });

    let mut items = Vec::new();
    for (frame_index, frame) in visible_frames(page).await.into_iter().enumerate() {
        let value = match frame.evaluate(&js).await {
            Ok(value) => value,
            Err(err) => {
                debug!(frame_index, error = %err, "action item scan failed for frame");
                continue;
            }
        };
        let mut frame_items: Vec<ActionItem> = match serde_json::from_value(value) {
            Ok(items) => items,
            Err(err) => {
                debug!(frame_index, error = %err, "unparseable action item payload");
                continue;
            }
        };

        let (dx, dy) = if frame_index == 0 {
            (0.0, 0.0)
        } else {
            frame_offset(&frame).await
        };
        for item in &mut frame_items {
            item.x += dx;
            item.y += dy;
            item.frame_index = frame_index;
        }
        items.append(&mut frame_items);
    }
    Ok(items)
}

/// Hyperlinks among the action items, deduplicated by href.
pub(crate) fn link_items(items: &[ActionItem]) -> Vec<ActionItem> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| {
            item.href
                .as_deref()
                .is_some_and(|href| !href.is_empty() && seen.insert(href.to_lowercase()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFrame, MockPage};

    #[tokio::test]
    async fn test_visible_frames_filters_small_and_detached() {
        let page = MockPage::new();
        page.add_frame(MockFrame::new().with_box(0.0, 0.0, 400.0, 300.0));
        page.add_frame(MockFrame::new().with_box(0.0, 0.0, 10.0, 10.0));
        page.add_frame(MockFrame::new().detached());

        // Main frame plus the one large subframe.
        assert_eq!(visible_frames(&page).await.len(), 2);
    }

    #[tokio::test]
    async fn test_action_items_shift_by_frame_offset() {
        let page = MockPage::new();
        page.add_frame(
            MockFrame::new()
                .with_box(100.0, 250.0, 400.0, 300.0)
                .with_action_items(serde_json::json!([{
                    "id": "0",
                    "type": "A",
                    "x": 5.0, "y": 10.0, "w": 50.0, "h": 20.0,
                    "text": "Read more",
                    "href": "https://example.com/more"
                }])),
        );

        let items = frames_action_items(&page, false).await.unwrap();
        let shifted = items.iter().find(|i| i.frame_index == 1).unwrap();
        assert_eq!((shifted.x, shifted.y), (105.0, 260.0));
    }

    #[tokio::test]
    async fn test_scroll_down_reports_end_of_page() {
        let page = MockPage::new().with_scroll_height(3000.0);
        assert!(scroll_down(&page, 924).await.unwrap());
        assert!(scroll_down(&page, 924).await.unwrap());
        assert!(scroll_down(&page, 924).await.unwrap());
        assert!(!scroll_down(&page, 924).await.unwrap());
        assert_eq!(page.scroll_deltas(), vec![924, 924, 924, 924]);
    }

    #[test]
    fn test_action_item_script_covers_focusable_elements() {
        // The in-page scan must reach keyboard-focusable and disclosure
        // elements and must skip disabled or invisible controls.
        for needle in [
            "[tabindex]:not([disabled])",
            "details",
            "summary",
            "button:not([disabled])",
            "checkVisibility",
        ] {
            assert!(ACTION_ITEMS_JS.contains(needle), "scan misses {needle}");
        }
    }

    #[test]
    fn test_scroll_script_targets_centered_scrollable_element() {
        // Scrolling hit-tests the viewport center for a scroll container
        // and only falls back to the document's scrolling element.
        assert!(SCROLL_JS.contains("elementFromPoint"));
        assert!(SCROLL_JS.contains("scrollingElement"));
        assert!(SCROLL_JS.contains("overflowY"));
    }

    #[test]
    fn test_link_items_dedupe_by_href() {
        let make = |href: Option<&str>| ActionItem {
            id: "0".into(),
            kind: "A".into(),
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
            text: "t".into(),
            accessibility_label: None,
            href: href.map(Into::into),
            frame_index: 0,
        };
        let items = vec![
            make(Some("https://a.test")),
            make(Some("https://A.test")),
            make(None),
            make(Some("https://b.test")),
        ];
        let links = link_items(&items);
        assert_eq!(links.len(), 2);
    }
}
