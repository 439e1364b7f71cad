//! Scroll-capture pipeline.
//!
//! Captures a page as a series of overlapping viewport screenshots plus an
//! optional PDF render. An observer inspects each screenshot as it lands
//! and steers the loop: keep going, stop, or re-take the current frame
//! (optionally in safe mode, which leaves fixed elements visible and waits
//! longer for the page to settle).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::crawler::WebCrawler;
use crate::error::{CrawlerError, Result};
use crate::pipeline::frames;
use crate::traits::browser::PageHandle;
use crate::types::capture::{CaptureInstruction, CaptureOptions, PageCapture};
use crate::types::media::CapturedMedia;

/// Attempts before navigation is treated as failed.
const NAVIGATION_ATTEMPTS: u32 = 3;

/// Per-attempt navigation timeout.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for a full-document PDF render.
const PDF_TIMEOUT: Duration = Duration::from_secs(120);

/// Settle delay after style injection.
const STYLE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Settle delay before each screenshot.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Settle delay in safe mode.
const SAFE_SETTLE_DELAY: Duration = Duration::from_millis(2000);

/// Inspects each captured frame and steers the capture loop.
#[async_trait]
pub trait CaptureObserver: Send + Sync {
    /// Called after each screenshot is persisted. `index` is the frame
    /// index; retries of the same frame repeat the index.
    async fn on_image(
        &self,
        page: &dyn PageHandle,
        image: &CapturedMedia,
        index: usize,
    ) -> Result<CaptureInstruction>;
}

pub(crate) fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    if let Some(cancel) = cancel {
        cancel.check()?;
    }
    Ok(())
}

impl WebCrawler {
    /// Capture a page in a fresh browser session.
    ///
    /// The session is closed on every exit path, including errors and
    /// cancellation.
    pub async fn capture_page(
        &self,
        options: CaptureOptions,
        observer: Option<&dyn CaptureObserver>,
        cancel: Option<&CancelToken>,
    ) -> Result<PageCapture> {
        check_cancel(cancel)?;
        let page = self.browser().new_page().await?;
        let result = self.capture_page_on(page.as_ref(), options, observer, cancel).await;
        if let Err(err) = page.close().await {
            warn!(error = %err, "failed to close capture page");
        }
        result
    }

    /// Capture a page using an already-open session. The caller keeps
    /// ownership of the page.
    pub async fn capture_page_on(
        &self,
        page: &dyn PageHandle,
        mut options: CaptureOptions,
        observer: Option<&dyn CaptureObserver>,
        cancel: Option<&CancelToken>,
    ) -> Result<PageCapture> {
        let set_id = options.resolve_set_id();
        let url = options.url.clone();
        info!(%url, %set_id, "capturing page");

        page.set_viewport(self.options().frame_width, self.options().frame_height)
            .await?;
        self.navigate(page, &url, cancel).await?;

        if let Some(css) = self.merged_css(&options) {
            // A page that rejects the style tag still captures fine.
            if let Err(err) = frames::inject_css(page, &css).await {
                warn!(error = %err, "css injection failed");
            }
            tokio::time::sleep(STYLE_SETTLE_DELAY).await;
        }

        let pdf = if options.pdf {
            check_cancel(cancel)?;
            let bytes = page.pdf(PDF_TIMEOUT).await?;
            Some(self.artifacts().write_pdf(&set_id, &bytes).await?)
        } else {
            None
        };

        let mut capture = PageCapture {
            url,
            images: Vec::new(),
            pdf,
            set_id: set_id.clone(),
            action_items: Vec::new(),
            completed: false,
        };

        if options.capture_all_images_before_callback {
            self.capture_all_then_observe(page, &options, &set_id, &mut capture, observer, cancel)
                .await?;
        } else {
            self.capture_interleaved(page, &options, &set_id, &mut capture, observer, cancel)
                .await?;
        }

        capture.action_items = frames::frames_action_items(page, true).await?;
        self.record_capture(&capture);
        info!(
            images = capture.images.len(),
            completed = capture.completed,
            "capture finished"
        );
        Ok(capture)
    }

    /// Navigate with retries; stops at the first success.
    async fn navigate(
        &self,
        page: &dyn PageHandle,
        url: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        for attempt in 1..=NAVIGATION_ATTEMPTS {
            check_cancel(cancel)?;
            match page.goto(url, NAVIGATION_TIMEOUT).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt == NAVIGATION_ATTEMPTS => {
                    warn!(%url, attempt, error = %err, "navigation failed, giving up");
                    return Err(CrawlerError::Navigation {
                        url: url.to_string(),
                        attempts: NAVIGATION_ATTEMPTS,
                    });
                }
                Err(err) => warn!(%url, attempt, error = %err, "navigation failed, retrying"),
            }
        }
        unreachable!("navigation loop returns on the final attempt");
    }

    /// Preset CSS for the URL concatenated with per-capture CSS.
    fn merged_css(&self, options: &CaptureOptions) -> Option<String> {
        let preset_css = self
            .options()
            .page_preset(&options.url)
            .and_then(|preset| preset.css);
        match (preset_css, &options.css) {
            (Some(preset), Some(extra)) => Some(format!("{preset}\n{extra}")),
            (Some(preset), None) => Some(preset),
            (None, Some(extra)) => Some(extra.clone()),
            (None, None) => None,
        }
    }

    /// One frame: hide fixed elements (except on the first frame or in
    /// safe mode), settle, screenshot, persist.
    async fn capture_frame(
        &self,
        page: &dyn PageHandle,
        set_id: &str,
        index: usize,
        try_index: usize,
        safe_mode: bool,
    ) -> Result<CapturedMedia> {
        let hide_fixed = index > 0 && !safe_mode;
        if hide_fixed {
            frames::hide_fixed_elements(page).await;
        }
        tokio::time::sleep(if safe_mode { SAFE_SETTLE_DELAY } else { SETTLE_DELAY }).await;

        let png = page.screenshot().await;
        if hide_fixed {
            frames::show_fixed_elements(page).await;
        }
        let png = png?;

        let action_items = frames::frames_action_items(page, true).await?;
        self.artifacts()
            .write_image(set_id, index, try_index, &png, &action_items)
            .await
    }

    async fn capture_interleaved(
        &self,
        page: &dyn PageHandle,
        options: &CaptureOptions,
        set_id: &str,
        capture: &mut PageCapture,
        observer: Option<&dyn CaptureObserver>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let mut index = 0usize;
        let mut try_index = 0usize;
        let mut safe_mode = false;

        for _ in 0..options.max_capture_count {
            check_cancel(cancel)?;
            let image = self
                .capture_frame(page, set_id, index, try_index, safe_mode)
                .await?;
            capture.images.push(image.clone());

            let instruction = match observer {
                Some(observer) => observer.on_image(page, &image, index).await?,
                None => CaptureInstruction::Continue,
            };
            match instruction {
                CaptureInstruction::Continue => {
                    if !frames::scroll_down(page, self.options().scroll_distance()).await? {
                        capture.completed = true;
                        return Ok(());
                    }
                    index += 1;
                    try_index = 0;
                }
                CaptureInstruction::Stop => {
                    debug!(index, "capture stopped by observer");
                    return Ok(());
                }
                CaptureInstruction::Retry => {
                    debug!(index, "re-taking frame");
                    try_index += 1;
                }
                CaptureInstruction::RetrySafe => {
                    debug!(index, "re-taking frame in safe mode");
                    safe_mode = true;
                    try_index += 1;
                }
            }
        }
        warn!(
            max = options.max_capture_count,
            "capture hit the iteration bound"
        );
        Ok(())
    }

    /// Capture every frame first, then run the observer over the images.
    /// Retry instructions are meaningless after the fact and are ignored.
    async fn capture_all_then_observe(
        &self,
        page: &dyn PageHandle,
        options: &CaptureOptions,
        set_id: &str,
        capture: &mut PageCapture,
        observer: Option<&dyn CaptureObserver>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        for index in 0..options.max_capture_count {
            check_cancel(cancel)?;
            let image = self.capture_frame(page, set_id, index, 0, false).await?;
            capture.images.push(image);
            if !frames::scroll_down(page, self.options().scroll_distance()).await? {
                capture.completed = true;
                break;
            }
        }

        if let Some(observer) = observer {
            for index in 0..capture.images.len() {
                check_cancel(cancel)?;
                let image = capture.images[index].clone();
                match observer.on_image(page, &image, index).await? {
                    // Every frame is already on disk; Stop only truncates
                    // observation, `completed` stays as the scroll loop
                    // determined it.
                    CaptureInstruction::Stop => {
                        debug!(index, "observation stopped by observer");
                        break;
                    }
                    CaptureInstruction::Continue => {}
                    other => {
                        warn!(?other, "retry ignored in capture-all mode");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::testing::{engine_with, MockBrowser, MockCompletion};

    struct ScriptedObserver {
        script: Vec<CaptureInstruction>,
        calls: AtomicUsize,
        seen_indices: std::sync::Mutex<Vec<usize>>,
    }

    impl ScriptedObserver {
        fn new(script: Vec<CaptureInstruction>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
                seen_indices: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CaptureObserver for ScriptedObserver {
        async fn on_image(
            &self,
            _page: &dyn PageHandle,
            _image: &CapturedMedia,
            index: usize,
        ) -> Result<CaptureInstruction> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_indices.lock().unwrap().push(index);
            Ok(self
                .script
                .get(call)
                .copied()
                .unwrap_or(CaptureInstruction::Continue))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_page_captures_one_image_and_completes() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let crawler = engine_with(browser.clone(), Arc::new(MockCompletion::new()));

        let capture = crawler
            .capture_page(
                CaptureOptions::new("https://example.test").with_set_id("s"),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(capture.images.len(), 1);
        assert!(capture.completed);
        assert_eq!(capture.images[0].path, format!("{}/s-img-0-0.png", crawler.options().id));
        assert_eq!(browser.open_pages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_fails_after_three_attempts() {
        let browser = Arc::new(MockBrowser::new().failing_navigation());
        let crawler = engine_with(browser.clone(), Arc::new(MockCompletion::new()));

        let err = crawler
            .capture_page(CaptureOptions::new("https://down.test"), None, None)
            .await
            .unwrap_err();

        match err {
            CrawlerError::Navigation { url, attempts } => {
                assert_eq!(url, "https://down.test");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(browser.goto_calls(), 3);
        // The session is still closed on the error path.
        assert_eq!(browser.open_pages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_safe_repeats_index_with_new_try() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let crawler = engine_with(browser.clone(), Arc::new(MockCompletion::new()));
        let observer = ScriptedObserver::new(vec![
            CaptureInstruction::RetrySafe,
            CaptureInstruction::Continue,
        ]);

        let capture = crawler
            .capture_page(
                CaptureOptions::new("https://example.test").with_set_id("s"),
                Some(&observer),
                None,
            )
            .await
            .unwrap();

        assert_eq!(*observer.seen_indices.lock().unwrap(), vec![0, 0]);
        assert_eq!(capture.images.len(), 2);
        assert!(capture.images[0].path.ends_with("s-img-0-0.png"));
        assert!(capture.images[1].path.ends_with("s-img-0-1.png"));
        assert!(capture.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_stop_leaves_capture_incomplete() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(10_000.0));
        let crawler = engine_with(browser, Arc::new(MockCompletion::new()));
        let observer = ScriptedObserver::new(vec![
            CaptureInstruction::Continue,
            CaptureInstruction::Stop,
        ]);

        let capture = crawler
            .capture_page(
                CaptureOptions::new("https://example.test"),
                Some(&observer),
                None,
            )
            .await
            .unwrap();

        assert_eq!(capture.images.len(), 2);
        assert!(!capture.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_all_stop_keeps_completed_page_complete() {
        // Viewport 1024 over a 3000px document: four frames, page fully
        // scrolled. Stopping observation early must not mark the capture
        // incomplete, the frames are already on disk.
        let browser = Arc::new(MockBrowser::new().with_scroll_height(3000.0));
        let crawler = engine_with(browser, Arc::new(MockCompletion::new()));
        let observer = ScriptedObserver::new(vec![
            CaptureInstruction::Continue,
            CaptureInstruction::Stop,
        ]);

        let capture = crawler
            .capture_page(
                CaptureOptions::new("https://example.test").capture_all_before_callback(),
                Some(&observer),
                None,
            )
            .await
            .unwrap();

        assert_eq!(capture.images.len(), 4);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
        assert!(capture.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_capture() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(50_000.0));
        let crawler = engine_with(browser.clone(), Arc::new(MockCompletion::new()));
        let cancel = crate::cancel::CancelToken::new();
        cancel.cancel_now();

        let err = crawler
            .capture_page(
                CaptureOptions::new("https://example.test"),
                None,
                Some(&cancel),
            )
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(browser.open_pages(), 0);
    }
}
