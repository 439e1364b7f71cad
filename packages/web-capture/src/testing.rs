//! Handwritten mocks for the browser, completion, and search seams.
//!
//! `MockPage` dispatches evaluated scripts on the marker comments the
//! pipeline scripts carry (`wc:scroll`, `wc:inject-css`, ...), models a
//! scrollable document of configurable height, and records scrolls, clicks
//! and navigations for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::crawler::WebCrawler;
use crate::error::{BrowserError, CrawlerError, Result};
use crate::traits::browser::{BrowserDriver, FrameHandle, PageHandle, Rect};
use crate::traits::completion::{
    Completion, CompletionRequest, CompletionResponse, FunctionCall,
};
use crate::traits::searcher::{SearchHit, WebSearcher};
use crate::types::config::CrawlerOptions;
use crate::types::usage::UsageDelta;

/// A frame with scripted geometry and action items.
pub struct MockFrame {
    detached: bool,
    bounding: Option<Rect>,
    action_items: Mutex<Value>,
    parent: Mutex<Option<Arc<MockFrame>>>,
}

impl MockFrame {
    pub fn new() -> Self {
        Self {
            detached: false,
            bounding: None,
            action_items: Mutex::new(json!([])),
            parent: Mutex::new(None),
        }
    }

    /// Give the frame's owning element a bounding box.
    pub fn with_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bounding = Some(Rect {
            x,
            y,
            width,
            height,
        });
        self
    }

    /// Mark the frame as detached.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Script the frame's action-item enumeration result.
    pub fn with_action_items(self, items: Value) -> Self {
        *self.action_items.lock().unwrap() = items;
        self
    }

    fn set_items(&self, items: Value) {
        *self.action_items.lock().unwrap() = items;
    }
}

impl Default for MockFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameHandle for MockFrame {
    fn is_detached(&self) -> bool {
        self.detached
    }

    async fn evaluate(&self, js: &str) -> std::result::Result<Value, BrowserError> {
        if js.contains("wc:action-items") {
            return Ok(self.action_items.lock().unwrap().clone());
        }
        Ok(Value::Null)
    }

    async fn bounding_box(&self) -> std::result::Result<Option<Rect>, BrowserError> {
        Ok(self.bounding)
    }

    fn parent(&self) -> Option<Arc<dyn FrameHandle>> {
        self.parent
            .lock()
            .unwrap()
            .clone()
            .map(|frame| frame as Arc<dyn FrameHandle>)
    }
}

/// A page over a scripted document.
pub struct MockPage {
    main: Arc<MockFrame>,
    subframes: Mutex<Vec<Arc<MockFrame>>>,
    scroll_height: f64,
    scroll_y: Mutex<f64>,
    viewport_height: Mutex<u32>,
    scroll_deltas: Mutex<Vec<u32>>,
    clicks: Arc<Mutex<Vec<(f64, f64)>>>,
    goto_calls: Arc<AtomicUsize>,
    failing_urls: Vec<String>,
    fail_all_navigation: bool,
    open_pages: Option<Arc<AtomicUsize>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            main: Arc::new(MockFrame::new()),
            subframes: Mutex::new(Vec::new()),
            scroll_height: 1024.0,
            scroll_y: Mutex::new(0.0),
            viewport_height: Mutex::new(1024),
            scroll_deltas: Mutex::new(Vec::new()),
            clicks: Arc::new(Mutex::new(Vec::new())),
            goto_calls: Arc::new(AtomicUsize::new(0)),
            failing_urls: Vec::new(),
            fail_all_navigation: false,
            open_pages: None,
        }
    }

    /// Total height of the scripted document.
    pub fn with_scroll_height(mut self, height: f64) -> Self {
        self.scroll_height = height;
        self
    }

    /// Attach a subframe; its parent becomes the main frame.
    pub fn add_frame(&self, frame: MockFrame) {
        *frame.parent.lock().unwrap() = Some(Arc::clone(&self.main));
        self.subframes.lock().unwrap().push(Arc::new(frame));
    }

    /// Scroll distances requested so far.
    pub fn scroll_deltas(&self) -> Vec<u32> {
        self.scroll_deltas.lock().unwrap().clone()
    }

    /// Click coordinates received so far.
    pub fn clicks(&self) -> Vec<(f64, f64)> {
        self.clicks.lock().unwrap().clone()
    }

    fn max_scroll(&self) -> f64 {
        (self.scroll_height - f64::from(*self.viewport_height.lock().unwrap())).max(0.0)
    }
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

fn scroll_distance_of(js: &str) -> u32 {
    js.split("const distance = ")
        .nth(1)
        .and_then(|rest| rest.split(';').next())
        .and_then(|digits| digits.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl PageHandle for MockPage {
    async fn set_viewport(&self, _width: u32, height: u32) -> std::result::Result<(), BrowserError> {
        *self.viewport_height.lock().unwrap() = height;
        Ok(())
    }

    async fn goto(&self, url: &str, _timeout: Duration) -> std::result::Result<(), BrowserError> {
        self.goto_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_navigation || self.failing_urls.iter().any(|u| u == url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
            });
        }
        Ok(())
    }

    async fn screenshot(&self) -> std::result::Result<Vec<u8>, BrowserError> {
        Ok(b"png".to_vec())
    }

    async fn pdf(&self, _timeout: Duration) -> std::result::Result<Vec<u8>, BrowserError> {
        Ok(b"%PDF".to_vec())
    }

    async fn evaluate(&self, js: &str) -> std::result::Result<Value, BrowserError> {
        if js.contains("wc:scroll") {
            let distance = scroll_distance_of(js);
            self.scroll_deltas.lock().unwrap().push(distance);

            let mut scroll_y = self.scroll_y.lock().unwrap();
            let before = *scroll_y;
            let max = self.max_scroll();
            let after = (before + f64::from(distance)).min(max);
            *scroll_y = after;
            return Ok(json!({ "before": before, "after": after, "max": max }));
        }
        if js.contains("wc:inject-css") {
            return Ok(Value::Bool(true));
        }
        if js.contains("wc:hide-fixed") || js.contains("wc:show-fixed") {
            return Ok(json!(0));
        }
        Ok(Value::Null)
    }

    fn frames(&self) -> Vec<Arc<dyn FrameHandle>> {
        let mut frames: Vec<Arc<dyn FrameHandle>> = vec![Arc::clone(&self.main) as _];
        frames.extend(
            self.subframes
                .lock()
                .unwrap()
                .iter()
                .map(|frame| Arc::clone(frame) as Arc<dyn FrameHandle>),
        );
        frames
    }

    async fn click(&self, x: f64, y: f64) -> std::result::Result<(), BrowserError> {
        self.clicks.lock().unwrap().push((x, y));
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), BrowserError> {
        if let Some(open_pages) = &self.open_pages {
            open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Browser driver that hands out [`MockPage`]s sharing the driver's
/// scripted document and recorded interactions.
pub struct MockBrowser {
    scroll_height: f64,
    fail_all_navigation: bool,
    failing_urls: Vec<String>,
    viewport_action_items: Value,
    open_pages: Arc<AtomicUsize>,
    goto_calls: Arc<AtomicUsize>,
    clicks: Arc<Mutex<Vec<(f64, f64)>>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            scroll_height: 1024.0,
            fail_all_navigation: false,
            failing_urls: Vec::new(),
            viewport_action_items: json!([]),
            open_pages: Arc::new(AtomicUsize::new(0)),
            goto_calls: Arc::new(AtomicUsize::new(0)),
            clicks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Height of the document every page of this browser serves.
    pub fn with_scroll_height(mut self, height: f64) -> Self {
        self.scroll_height = height;
        self
    }

    /// Make every navigation fail.
    pub fn failing_navigation(mut self) -> Self {
        self.fail_all_navigation = true;
        self
    }

    /// Make navigation to one URL fail.
    pub fn with_failing_url(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.push(url.into());
        self
    }

    /// Script the main frame's action items on every page.
    pub fn with_viewport_action_items(mut self, items: Value) -> Self {
        self.viewport_action_items = items;
        self
    }

    /// Pages opened and not yet closed.
    pub fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }

    /// Navigation attempts across all pages.
    pub fn goto_calls(&self) -> usize {
        self.goto_calls.load(Ordering::SeqCst)
    }

    /// Clicks across all pages.
    pub fn clicks(&self) -> Vec<(f64, f64)> {
        self.clicks.lock().unwrap().clone()
    }
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn new_page(&self) -> std::result::Result<Box<dyn PageHandle>, BrowserError> {
        self.open_pages.fetch_add(1, Ordering::SeqCst);
        let page = MockPage {
            main: Arc::new(MockFrame::new()),
            subframes: Mutex::new(Vec::new()),
            scroll_height: self.scroll_height,
            scroll_y: Mutex::new(0.0),
            viewport_height: Mutex::new(1024),
            scroll_deltas: Mutex::new(Vec::new()),
            clicks: Arc::clone(&self.clicks),
            goto_calls: Arc::clone(&self.goto_calls),
            failing_urls: self.failing_urls.clone(),
            fail_all_navigation: self.fail_all_navigation,
            open_pages: Some(Arc::clone(&self.open_pages)),
        };
        page.main.set_items(self.viewport_action_items.clone());
        Ok(Box::new(page))
    }
}

/// One scripted completion result.
#[derive(Debug, Clone)]
pub struct MockResponse {
    text: String,
    function_call: Option<FunctionCall>,
    usage: UsageDelta,
}

impl MockResponse {
    /// A plain text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_call: None,
            usage: UsageDelta::default(),
        }
    }

    /// A function-call response.
    pub fn call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            text: String::new(),
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments,
            }),
            usage: UsageDelta::default(),
        }
    }

    /// Attach a token-usage delta.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = UsageDelta {
            input_tokens,
            output_tokens,
            ..UsageDelta::default()
        };
        self
    }

    fn into_response(self) -> CompletionResponse {
        CompletionResponse {
            text: self.text,
            function_call: self.function_call,
            usage: self.usage,
        }
    }
}

/// Completion provider with scripted responses.
///
/// Responses keyed by a declared function name take priority, so calls
/// that run concurrently (classification and requirement checks) stay
/// deterministic; everything else consumes the sequential queue. The last
/// keyed response is sticky and answers repeat calls.
pub struct MockCompletion {
    queue: Mutex<VecDeque<MockResponse>>,
    by_function: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            by_function: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script the sequential response queue.
    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        self.queue.lock().unwrap().extend(responses);
        self
    }

    /// Script the response for requests declaring a function.
    pub fn with_function_response(self, name: impl Into<String>, response: MockResponse) -> Self {
        self.with_function_responses(name, vec![response])
    }

    /// Script a sequence of responses for requests declaring a function.
    pub fn with_function_responses(
        self,
        name: impl Into<String>,
        responses: Vec<MockResponse>,
    ) -> Self {
        self.by_function
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .extend(responses);
        self
    }

    /// All requests received, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_keyed(&self, request: &CompletionRequest) -> Option<MockResponse> {
        let mut by_function = self.by_function.lock().unwrap();
        for function in &request.functions {
            if let Some(responses) = by_function.get_mut(&function.name) {
                if responses.len() > 1 {
                    return responses.pop_front();
                }
                if let Some(last) = responses.front() {
                    return Some(last.clone());
                }
            }
        }
        None
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let keyed = self.next_keyed(&request);
        self.requests.lock().unwrap().push(request);
        if let Some(response) = keyed {
            return Ok(response.into_response());
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .map(MockResponse::into_response)
            .ok_or_else(|| {
                CrawlerError::Completion("no scripted completion response left".into())
            })
    }
}

/// Searcher returning a fixed list of links.
pub struct MockSearcher {
    hits: Vec<SearchHit>,
    terms: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn with_links(links: &[&str]) -> Self {
        Self {
            hits: links.iter().map(|link| SearchHit::new(*link)).collect(),
            terms: Mutex::new(Vec::new()),
        }
    }

    /// Terms searched so far.
    pub fn terms(&self) -> Vec<String> {
        self.terms.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        self.terms.lock().unwrap().push(term.to_string());
        Ok(self.hits.clone())
    }
}

/// An engine over mocks, writing artifacts to a unique temp directory.
pub fn engine_with(browser: Arc<MockBrowser>, completion: Arc<MockCompletion>) -> WebCrawler {
    WebCrawler::builder()
        .with_options(test_options())
        .with_browser(browser)
        .with_completion(completion)
        .build()
        .expect("mock engine")
}

/// An engine over mocks including a searcher.
pub fn engine_with_searcher(
    browser: Arc<MockBrowser>,
    completion: Arc<MockCompletion>,
    searcher: Arc<MockSearcher>,
) -> WebCrawler {
    WebCrawler::builder()
        .with_options(test_options())
        .with_browser(browser)
        .with_completion(completion)
        .with_searcher(searcher)
        .build()
        .expect("mock engine")
}

fn test_options() -> CrawlerOptions {
    CrawlerOptions::new().with_out_dir(
        std::env::temp_dir().join(format!("web-capture-test-{}", uuid::Uuid::new_v4())),
    )
}
