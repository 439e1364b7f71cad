//! Markdown conversion pipeline.
//!
//! Runs a capture and converts each screenshot into a markdown fragment as
//! it lands. Fragments overlap the way capture frames do; each completion
//! call carries the previous fragment so the model continues exactly where
//! the overlap ends. The stitched document is then summarized.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::crawler::WebCrawler;
use crate::error::{CrawlerError, Result};
use crate::pipeline::capture::{check_cancel, CaptureObserver};
use crate::pipeline::frames;
use crate::prompts;
use crate::traits::browser::PageHandle;
use crate::types::capture::{CaptureInstruction, CaptureOptions, PageCapture};
use crate::types::conversion::{
    ConversionOptions, ConversionProgress, ConversionResult, PageConversion,
};
use crate::types::media::CapturedMedia;

/// Delay after a popup-dismissing click before the frame is retaken.
const POPUP_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Caller hooks into the conversion loop. Any hook returning `false` stops
/// the capture; fragments converted so far still produce a document.
#[async_trait]
pub trait ConversionHooks: Send + Sync {
    /// Runs before each fragment's completion call.
    async fn before_fragment(&self, _progress: &ConversionProgress) -> Result<bool> {
        Ok(true)
    }

    /// Runs concurrently with each fragment's completion call.
    async fn during_fragment(&self, _progress: &ConversionProgress) -> Result<bool> {
        Ok(true)
    }

    /// Runs after each fragment has been appended.
    async fn after_fragment(&self, _progress: &ConversionProgress) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
struct SessionState {
    fragments: Vec<String>,
    images: Vec<CapturedMedia>,

    /// Frame indices where popup-closing has been given up on.
    ignore_popups: HashSet<usize>,

    /// Frame indices already re-taken in safe mode; a second blank result
    /// is accepted as empty rather than retried forever.
    safe_retried: HashSet<usize>,
}

/// One conversion in progress; doubles as the capture observer.
struct ConversionSession<'a> {
    crawler: &'a WebCrawler,
    set_id: String,
    hooks: Option<&'a dyn ConversionHooks>,
    state: Mutex<SessionState>,
}

impl ConversionSession<'_> {
    fn progress(&self) -> ConversionProgress {
        let state = self.state.lock().unwrap();
        ConversionProgress {
            fragments: state.fragments.clone(),
            images: state.images.clone(),
        }
    }

    /// Ask the model which button closes the popup and click it. Returns
    /// `true` when a click happened.
    async fn close_popup(&self, page: &dyn PageHandle, image: &CapturedMedia) -> Result<bool> {
        let buttons = json!(image
            .action_items
            .iter()
            .map(|item| json!({"id": item.id, "text": item.text}))
            .collect::<Vec<_>>());
        let response = self
            .crawler
            .complete(prompts::popup_request(&buttons, &image.url))
            .await?;

        let Some(call) = response.function_call else {
            return Ok(false);
        };
        if call.name != prompts::CLICK_FN {
            return Ok(false);
        }
        let id = call
            .arguments
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let Some(target) = image.action_items.iter().find(|item| item.id == id) else {
            warn!(%id, "popup click target not found");
            return Ok(false);
        };

        let (x, y) = target.center();
        debug!(%id, x, y, "closing popup");
        page.click(x, y).await?;
        // Dismissal animations need to finish before the frame is retaken.
        tokio::time::sleep(POPUP_SETTLE_DELAY).await;
        Ok(true)
    }
}

#[async_trait]
impl CaptureObserver for ConversionSession<'_> {
    async fn on_image(
        &self,
        page: &dyn PageHandle,
        image: &CapturedMedia,
        index: usize,
    ) -> Result<CaptureInstruction> {
        let (previous, allow_popup_close) = {
            let mut state = self.state.lock().unwrap();
            state.images.push(image.clone());
            (
                if index == 0 {
                    None
                } else {
                    state.fragments.last().cloned()
                },
                !state.ignore_popups.contains(&index),
            )
        };

        let progress = self.progress();
        if let Some(hooks) = self.hooks {
            if !hooks.before_fragment(&progress).await? {
                return Ok(CaptureInstruction::Stop);
            }
        }

        let links = frames::link_items(&image.action_items);
        let request = prompts::conversion_request(
            &image.url,
            previous.as_deref(),
            &links,
            allow_popup_close,
        );

        let (response, during) = tokio::join!(self.crawler.complete(request), async {
            match self.hooks {
                Some(hooks) => hooks.during_fragment(&progress).await,
                None => Ok(true),
            }
        });
        let response = response?;
        if !during? {
            return Ok(CaptureInstruction::Stop);
        }

        if let Some(call) = &response.function_call {
            if call.name == prompts::CLOSE_POPUP_FN {
                return if self.close_popup(page, image).await? {
                    Ok(CaptureInstruction::Retry)
                } else {
                    self.state.lock().unwrap().ignore_popups.insert(index);
                    Ok(CaptureInstruction::Retry)
                };
            }
        }

        let text = response.text.trim().to_string();
        if text == prompts::BLANK_SENTINEL {
            let mut state = self.state.lock().unwrap();
            if state.safe_retried.insert(index) {
                debug!(index, "blank frame, re-taking in safe mode");
                return Ok(CaptureInstruction::RetrySafe);
            }
            warn!(index, "frame still blank after safe retry, skipping");
            return Ok(CaptureInstruction::Continue);
        }

        let fragment_index = {
            let mut state = self.state.lock().unwrap();
            state.fragments.push(text.clone());
            state.fragments.len() - 1
        };
        self.crawler
            .artifacts()
            .write_fragment(&self.set_id, fragment_index, &text)
            .await?;

        if let Some(hooks) = self.hooks {
            if !hooks.after_fragment(&self.progress()).await? {
                return Ok(CaptureInstruction::Stop);
            }
        }
        Ok(CaptureInstruction::Continue)
    }
}

impl WebCrawler {
    /// Capture a page and convert it to a markdown document with a summary,
    /// in a fresh browser session.
    pub async fn convert_page(
        &self,
        options: ConversionOptions,
        hooks: Option<&dyn ConversionHooks>,
        cancel: Option<&CancelToken>,
    ) -> Result<ConversionResult> {
        let capture_options = resolve_capture_options(options)?;
        let session = self.conversion_session(&capture_options, hooks);
        let capture = self
            .capture_page(capture_options, Some(&session), cancel)
            .await?;
        self.finish_conversion(session, capture, cancel).await
    }

    /// Convert using an already-open session.
    pub async fn convert_page_on(
        &self,
        page: &dyn PageHandle,
        options: ConversionOptions,
        hooks: Option<&dyn ConversionHooks>,
        cancel: Option<&CancelToken>,
    ) -> Result<ConversionResult> {
        let capture_options = resolve_capture_options(options)?;
        let session = self.conversion_session(&capture_options, hooks);
        let capture = self
            .capture_page_on(page, capture_options, Some(&session), cancel)
            .await?;
        self.finish_conversion(session, capture, cancel).await
    }

    fn conversion_session<'a>(
        &'a self,
        capture_options: &CaptureOptions,
        hooks: Option<&'a dyn ConversionHooks>,
    ) -> ConversionSession<'a> {
        ConversionSession {
            crawler: self,
            set_id: capture_options
                .set_id
                .clone()
                .unwrap_or_default(),
            hooks,
            state: Mutex::new(SessionState::default()),
        }
    }

    async fn finish_conversion(
        &self,
        session: ConversionSession<'_>,
        capture: PageCapture,
        cancel: Option<&CancelToken>,
    ) -> Result<ConversionResult> {
        // A token that fired during the last fragment stops here, before
        // the summary call.
        check_cancel(cancel)?;
        let fragments = session.state.into_inner().unwrap().fragments;
        let markdown = fragments.join("\n\n");

        let summary = if markdown.is_empty() {
            String::new()
        } else {
            self.complete(prompts::summary_request(&markdown))
                .await?
                .text
        };

        let conversion = PageConversion {
            url: capture.url.clone(),
            markdown,
            summary,
            set_id: capture.set_id.clone(),
        };

        self.artifacts()
            .write_document(&conversion.set_id, &conversion.markdown)
            .await?;
        self.artifacts()
            .write_summary(&conversion.set_id, &conversion.summary)
            .await?;
        self.artifacts()
            .write_json(&format!("{}-conversion.json", conversion.set_id), &conversion)
            .await?;

        self.record_conversion(&conversion);
        info!(
            url = %conversion.url,
            fragments = fragments.len(),
            "conversion finished"
        );
        Ok(ConversionResult { conversion, capture })
    }
}

fn resolve_capture_options(options: ConversionOptions) -> Result<CaptureOptions> {
    let mut capture_options = match (options.capture_options, options.url) {
        (Some(capture), _) => capture,
        (None, Some(url)) => CaptureOptions::new(url),
        (None, None) => {
            return Err(CrawlerError::InvalidOptions {
                reason: "conversion requires capture options or a url".to_string(),
            })
        }
    };
    capture_options.resolve_set_id();
    Ok(capture_options)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{engine_with, MockBrowser, MockCompletion, MockResponse};

    #[tokio::test(start_paused = true)]
    async fn test_fragments_stitch_in_order() {
        // Two frames: 1948px of content under a 1024px viewport.
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1948.0));
        let completion = Arc::new(MockCompletion::new().with_responses(vec![
            MockResponse::text("# Title\n\nIntro"),
            MockResponse::text("Second section"),
            MockResponse::text("A summary"),
        ]));
        let crawler = engine_with(browser, completion.clone());

        let result = crawler
            .convert_page(
                ConversionOptions::for_capture(
                    CaptureOptions::new("https://example.test").with_set_id("s"),
                ),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            result.conversion.markdown,
            "# Title\n\nIntro\n\nSecond section"
        );
        assert_eq!(result.conversion.summary, "A summary");

        // The second fragment's request carried the first fragment as
        // overlap context.
        let requests = completion.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].parts.iter().any(|part| matches!(
            part,
            crate::traits::completion::PromptPart::User(text)
                if text.contains("# Title\n\nIntro")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_frame_is_retaken_in_safe_mode() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let completion = Arc::new(MockCompletion::new().with_responses(vec![
            MockResponse::text("BLANK"),
            MockResponse::text("Actual content"),
            MockResponse::text("Summary"),
        ]));
        let crawler = engine_with(browser, completion.clone());

        let result = crawler
            .convert_page(
                ConversionOptions::for_capture(
                    CaptureOptions::new("https://example.test").with_set_id("s"),
                ),
                None,
                None,
            )
            .await
            .unwrap();

        // The blank response is not part of the document.
        assert_eq!(result.conversion.markdown, "Actual content");
        // Same frame captured twice.
        assert_eq!(result.capture.images.len(), 2);
        assert!(result.capture.images[1].path.ends_with("s-img-0-1.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_is_closed_and_frame_retaken() {
        let browser = Arc::new(
            MockBrowser::new()
                .with_scroll_height(1024.0)
                .with_viewport_action_items(serde_json::json!([{
                    "id": "A1",
                    "type": "BUTTON",
                    "x": 400.0, "y": 500.0, "w": 100.0, "h": 40.0,
                    "text": "Accept all"
                }])),
        );
        let completion = Arc::new(MockCompletion::new().with_responses(vec![
            MockResponse::call(prompts::CLOSE_POPUP_FN, serde_json::json!({})),
            MockResponse::call(prompts::CLICK_FN, serde_json::json!({"id": "A1"})),
            MockResponse::text("Content after popup"),
            MockResponse::text("Summary"),
        ]));
        let crawler = engine_with(browser.clone(), completion);

        let result = crawler
            .convert_page(
                ConversionOptions::for_url("https://example.test"),
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.conversion.markdown, "Content after popup");
        assert_eq!(browser.clicks(), vec![(450.0, 520.0)]);
    }

    struct CancelDuringCapture {
        cancel: CancelToken,
    }

    #[async_trait]
    impl ConversionHooks for CancelDuringCapture {
        async fn after_fragment(&self, _progress: &ConversionProgress) -> Result<bool> {
            self.cancel.cancel_now();
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_last_fragment_skips_summary() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let completion = Arc::new(
            MockCompletion::new().with_responses(vec![
                MockResponse::text("Fragment"),
                MockResponse::text("Summary that must never be requested"),
            ]),
        );
        let crawler = engine_with(browser, completion.clone());
        let cancel = CancelToken::new();
        let hooks = CancelDuringCapture {
            cancel: cancel.clone(),
        };

        let err = crawler
            .convert_page(
                ConversionOptions::for_url("https://example.test"),
                Some(&hooks),
                Some(&cancel),
            )
            .await
            .unwrap_err();

        assert!(err.is_canceled());
        // Only the fragment completion ran.
        assert_eq!(completion.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_accumulates_across_calls() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let completion = Arc::new(MockCompletion::new().with_responses(vec![
            MockResponse::text("Fragment").with_usage(100, 20),
            MockResponse::text("Summary").with_usage(30, 10),
        ]));
        let crawler = engine_with(browser, completion);

        crawler
            .convert_page(
                ConversionOptions::for_url("https://example.test"),
                None,
                None,
            )
            .await
            .unwrap();

        let snapshot = crawler.usage().snapshot();
        assert_eq!(snapshot.input_tokens, 130);
        assert_eq!(snapshot.output_tokens, 30);
        assert_eq!(snapshot.total_tokens, 160);
    }
}
