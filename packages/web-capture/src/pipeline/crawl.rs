//! Recursive crawl and search fan-out.
//!
//! A crawl walks a link tree from a root URL. Each page is classified from
//! its first screenshots; main-content pages that meet the caller's
//! requirement are converted and collected, other pages contribute links
//! for the next depth level. Browser sessions within one tree are bounded
//! by a [`Lock`]; a search fans crawls out over result links under a
//! second, outer lock.

use std::sync::{Arc, Mutex};

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::artifacts::timestamp_millis;
use crate::cancel::CancelToken;
use crate::crawler::WebCrawler;
use crate::error::{CanceledError, CrawlerError, Result};
use crate::lock::Lock;
use crate::pipeline::capture::check_cancel;
use crate::pipeline::frames;
use crate::prompts;
use crate::traits::browser::PageHandle;
use crate::types::capture::{CaptureOptions, PageCapture};
use crate::types::conversion::ConversionOptions;
use crate::types::crawl::{
    CrawlOptions, CrawlState, PageClassification, SearchOptions, SearchResultSet,
};

/// Screenshots used for classification and requirement checks.
const CLASSIFICATION_FRAMES: usize = 2;

/// Most links followed from one page.
const LINKS_PER_PAGE: usize = 5;

#[derive(Deserialize)]
struct ClassifyArgs {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RequirementArgs {
    #[serde(rename = "requirementsMet")]
    requirements_met: bool,
}

#[derive(Deserialize)]
struct NavigateArgs {
    #[serde(default)]
    urls: Vec<String>,
}

struct CrawlContext<'a> {
    crawler: &'a WebCrawler,
    options: CrawlOptions,
    state: Arc<Mutex<CrawlState>>,
    lock: Lock,
    cancel: Option<&'a CancelToken>,
}

impl CrawlContext<'_> {
    fn result_limit_reached(&self) -> bool {
        self.state.lock().unwrap().results.len() >= self.options.result_limit
    }

    /// Mark a URL visited; `false` when it was already visited.
    fn mark_crawled(&self, url: &str) -> bool {
        let key = url.to_lowercase();
        let mut state = self.state.lock().unwrap();
        if state.crawled.contains(&key) {
            return false;
        }
        state.crawled.push(key);
        true
    }

    fn crawl(&self, url: String, depth: usize) -> BoxFuture<'_, Result<()>> {
        async move {
            check_cancel(self.cancel)?;
            if self.result_limit_reached() || !self.mark_crawled(&url) {
                return Ok(());
            }

            // The permit covers the page session only; it is released
            // before recursing so child branches can make progress under a
            // concurrency bound of one.
            let links = {
                let Some(_permit) = self.lock.try_acquire_or_cancel(self.cancel).await else {
                    return Err(CanceledError.into());
                };
                match self.scan_page(&url, depth).await {
                    Ok(links) => links,
                    Err(err) if err.is_canceled() => return Err(err),
                    Err(err) => {
                        warn!(%url, error = %err, "crawl branch failed");
                        Vec::new()
                    }
                }
            };

            if links.is_empty() {
                return Ok(());
            }
            let branches = links
                .into_iter()
                .map(|link| self.crawl(link, depth + 1))
                .collect::<Vec<_>>();
            for result in join_all(branches).await {
                result?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Visit one page: classify it, convert it when it qualifies, and
    /// otherwise return links for the next depth level.
    async fn scan_page(&self, url: &str, depth: usize) -> Result<Vec<String>> {
        info!(%url, depth, "scanning page");
        let page = self.crawler.browser().new_page().await?;
        let result = self.scan_page_on(page.as_ref(), url, depth).await;
        if let Err(err) = page.close().await {
            warn!(error = %err, "failed to close crawl page");
        }
        result
    }

    async fn scan_page_on(
        &self,
        page: &dyn PageHandle,
        url: &str,
        depth: usize,
    ) -> Result<Vec<String>> {
        let capture = self
            .crawler
            .capture_page_on(
                page,
                CaptureOptions::new(url).with_max_captures(CLASSIFICATION_FRAMES),
                None,
                self.cancel,
            )
            .await?;

        let Some(first_image) = capture.images.first() else {
            return Ok(Vec::new());
        };
        let second_image = capture.images.get(1).map(|image| image.url.as_str());

        let requirement = self.options.page_requirement_prompt.as_deref();
        let (classification, requirement_met) = tokio::join!(
            self.classify(&first_image.url, second_image),
            self.requirement_met(requirement, &first_image.url, second_image),
        );
        let classification = classification?;
        let requirement_met = requirement_met?;
        debug!(%url, ?classification, requirement_met, "page classified");

        if classification == PageClassification::MainContent && requirement_met {
            if !self.result_limit_reached() {
                let result = self
                    .crawler
                    .convert_page_on(
                        page,
                        ConversionOptions::for_url(url),
                        None,
                        self.cancel,
                    )
                    .await?;
                self.state
                    .lock()
                    .unwrap()
                    .results
                    .push(result.conversion);
            }
            return Ok(Vec::new());
        }

        if depth >= self.options.max_depth {
            return Ok(Vec::new());
        }
        self.select_links(page, &capture, requirement).await
    }

    async fn classify(
        &self,
        first_image: &str,
        second_image: Option<&str>,
    ) -> Result<PageClassification> {
        let response = self
            .crawler
            .complete(prompts::classification_request(first_image, second_image))
            .await?;
        let classification = response
            .function_call
            .filter(|call| call.name == prompts::CLASSIFY_FN)
            .and_then(|call| call.parse_args::<ClassifyArgs>().ok())
            .and_then(|args| PageClassification::parse(&args.kind))
            .unwrap_or(PageClassification::Other);
        Ok(classification)
    }

    /// True when no requirement was given or the model reports it met.
    async fn requirement_met(
        &self,
        requirement: Option<&str>,
        first_image: &str,
        second_image: Option<&str>,
    ) -> Result<bool> {
        let Some(requirement) = requirement else {
            return Ok(true);
        };
        let response = self
            .crawler
            .complete(prompts::requirement_request(
                requirement,
                first_image,
                second_image,
            ))
            .await?;
        Ok(response
            .function_call
            .filter(|call| call.name == prompts::REQUIREMENTS_FN)
            .and_then(|call| call.parse_args::<RequirementArgs>().ok())
            .map(|args| args.requirements_met)
            .unwrap_or(false))
    }

    /// Scan the whole document for links and let the model pick the next
    /// URLs to visit.
    async fn select_links(
        &self,
        page: &dyn PageHandle,
        capture: &PageCapture,
        requirement: Option<&str>,
    ) -> Result<Vec<String>> {
        let items = frames::frames_action_items(page, false).await?;
        let links = frames::link_items(&items);
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let first_image = match capture.images.first() {
            Some(image) => image.url.as_str(),
            None => return Ok(Vec::new()),
        };
        let second_image = capture.images.get(1).map(|image| image.url.as_str());

        let already_crawled = self.state.lock().unwrap().crawled.clone();
        let response = self
            .crawler
            .complete(prompts::navigation_request(
                &links,
                &already_crawled,
                requirement,
                first_image,
                second_image,
            ))
            .await?;

        let urls = response
            .function_call
            .filter(|call| call.name == prompts::NAVIGATE_FN)
            .and_then(|call| call.parse_args::<NavigateArgs>().ok())
            .map(|args| args.urls)
            .unwrap_or_default();
        // Anchor links and unparseable URLs never lead anywhere new.
        Ok(urls
            .into_iter()
            .filter(|candidate| {
                url::Url::parse(candidate)
                    .is_ok_and(|parsed| parsed.fragment().is_none())
            })
            .take(LINKS_PER_PAGE)
            .collect())
    }
}

impl WebCrawler {
    /// Crawl a link tree from a root URL, collecting conversions of pages
    /// that classify as main content and meet the requirement prompt.
    pub async fn crawl_page(
        &self,
        options: CrawlOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<CrawlState> {
        let state = Arc::new(Mutex::new(CrawlState::default()));
        self.crawl_tree(options, Arc::clone(&state), cancel).await?;
        let state = Arc::try_unwrap(state)
            .map(|mutex| mutex.into_inner().unwrap())
            .unwrap_or_else(|state| state.lock().unwrap().clone());
        info!(
            crawled = state.crawled.len(),
            results = state.results.len(),
            "crawl finished"
        );
        Ok(state)
    }

    /// Run one crawl tree against shared state.
    async fn crawl_tree(
        &self,
        options: CrawlOptions,
        state: Arc<Mutex<CrawlState>>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let url = options.url.clone();
        let context = CrawlContext {
            crawler: self,
            lock: Lock::new(options.max_concurrent.max(1)),
            options,
            state,
            cancel,
        };
        context.crawl(url, 1).await
    }

    /// Search the web for a term and crawl each result link. Branch
    /// failures are logged and skipped; cancellation stops everything.
    pub async fn search_and_crawl(
        &self,
        options: SearchOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<SearchResultSet> {
        check_cancel(cancel)?;
        let hits = self.searcher()?.search(&options.term).await?;
        if hits.is_empty() {
            return Err(CrawlerError::NoSearchResults);
        }
        info!(term = %options.term, hits = hits.len(), "search complete");

        let state = Arc::new(Mutex::new(CrawlState::default()));
        let lock = Lock::new(options.max_concurrent.max(1));

        let branches = hits.iter().map(|hit| {
            let state = Arc::clone(&state);
            let lock = &lock;
            let crawl = options.crawl.for_url(&hit.link);
            async move {
                let Some(_permit) = lock.try_acquire_or_cancel(cancel).await else {
                    return Err(CanceledError.into());
                };
                match self.crawl_tree(crawl, state, cancel).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_canceled() => Err(err),
                    Err(err) => {
                        warn!(link = %hit.link, error = %err, "search branch failed");
                        Ok(())
                    }
                }
            }
        });
        for result in join_all(branches).await {
            result?;
        }

        let result_set = SearchResultSet {
            term: options.term,
            state: state.lock().unwrap().clone(),
            usage: self.usage().snapshot(),
        };
        self.artifacts()
            .write_json(&format!("search-{}.json", timestamp_millis()), &result_set)
            .await?;
        Ok(result_set)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{
        engine_with, engine_with_searcher, MockBrowser, MockCompletion, MockResponse, MockSearcher,
    };

    fn classified(kind: &str) -> MockResponse {
        MockResponse::call(prompts::CLASSIFY_FN, serde_json::json!({"type": kind}))
    }

    fn requirement(met: bool) -> MockResponse {
        MockResponse::call(
            prompts::REQUIREMENTS_FN,
            serde_json::json!({"requirementsMet": met}),
        )
    }

    fn navigate(urls: &[&str]) -> MockResponse {
        MockResponse::call(prompts::NAVIGATE_FN, serde_json::json!({"urls": urls}))
    }

    fn linked_browser(height: f64) -> MockBrowser {
        MockBrowser::new()
            .with_scroll_height(height)
            .with_viewport_action_items(serde_json::json!([{
                "id": "0",
                "type": "A",
                "x": 0.0, "y": 0.0, "w": 100.0, "h": 20.0,
                "text": "Next page",
                "href": "https://example.test/next"
            }]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_qualifying_page_is_converted_once() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let completion = Arc::new(
            MockCompletion::new()
                .with_function_response(prompts::CLASSIFY_FN, classified("main-content"))
                .with_function_response(prompts::REQUIREMENTS_FN, requirement(true))
                .with_responses(vec![
                    MockResponse::text("Converted body"),
                    MockResponse::text("Summary"),
                ]),
        );
        let crawler = engine_with(browser, completion);

        let state = crawler
            .crawl_page(
                CrawlOptions::new("https://example.test/report")
                    .with_page_requirement("contains an annual report"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].url, "https://example.test/report");
        assert_eq!(state.results[0].markdown, "Converted body");
        assert_eq!(state.crawled, vec!["https://example.test/report"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requirement_failure_blocks_conversion() {
        let browser = Arc::new(MockBrowser::new().with_scroll_height(1024.0));
        let completion = Arc::new(
            MockCompletion::new()
                .with_function_response(prompts::CLASSIFY_FN, classified("main-content"))
                .with_function_response(prompts::REQUIREMENTS_FN, requirement(false)),
        );
        let crawler = engine_with(browser, completion);

        let state = crawler
            .crawl_page(
                CrawlOptions::new("https://example.test")
                    .with_page_requirement("annual report")
                    .with_max_depth(1),
                None,
            )
            .await
            .unwrap();

        assert!(state.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_depth_bound_stops_recursion() {
        let browser = Arc::new(linked_browser(1024.0));
        let completion = Arc::new(
            MockCompletion::new()
                .with_function_response(prompts::CLASSIFY_FN, classified("reference-list"))
                .with_function_response(prompts::NAVIGATE_FN, navigate(&["https://example.test/next"])),
        );
        let crawler = engine_with(browser, completion.clone());

        let state = crawler
            .crawl_page(
                CrawlOptions::new("https://example.test").with_max_depth(1),
                None,
            )
            .await
            .unwrap();

        // Depth 1 means the root only; no link selection happens.
        assert_eq!(state.crawled, vec!["https://example.test"]);
        assert!(!completion
            .requests()
            .iter()
            .any(|r| r.functions.iter().any(|f| f.name == prompts::NAVIGATE_FN)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reference_list_recurses_to_main_content() {
        let browser = Arc::new(linked_browser(1024.0));
        let completion = Arc::new(
            MockCompletion::new()
                .with_function_responses(
                    prompts::CLASSIFY_FN,
                    vec![classified("reference-list"), classified("main-content")],
                )
                .with_function_response(
                    prompts::NAVIGATE_FN,
                    navigate(&["https://example.test/next"]),
                )
                .with_responses(vec![
                    MockResponse::text("Child body"),
                    MockResponse::text("Child summary"),
                ]),
        );
        let crawler = engine_with(browser, completion);

        let state = crawler
            .crawl_page(CrawlOptions::new("https://example.test"), None)
            .await
            .unwrap();

        assert_eq!(
            state.crawled,
            vec!["https://example.test", "https://example.test/next"]
        );
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].url, "https://example.test/next");
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_isolates_branch_failures() {
        let browser = Arc::new(
            MockBrowser::new()
                .with_scroll_height(1024.0)
                .with_failing_url("https://down.test"),
        );
        let completion = Arc::new(
            MockCompletion::new()
                .with_function_response(prompts::CLASSIFY_FN, classified("main-content"))
                .with_responses(vec![
                    MockResponse::text("Healthy body"),
                    MockResponse::text("Summary"),
                ]),
        );
        let searcher = Arc::new(MockSearcher::with_links(&[
            "https://down.test",
            "https://up.test",
        ]));
        let crawler = engine_with_searcher(browser, completion, searcher);

        let result = crawler
            .search_and_crawl(
                SearchOptions::new("financial reports")
                    .with_crawl(CrawlOptions::new("").with_max_depth(1)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.term, "financial reports");
        assert_eq!(result.state.results.len(), 1);
        assert_eq!(result.state.results[0].url, "https://up.test");
        // Both links were attempted.
        assert!(result.state.crawled.contains(&"https://down.test".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_without_results_errors() {
        let browser = Arc::new(MockBrowser::new());
        let crawler = engine_with_searcher(
            browser,
            Arc::new(MockCompletion::new()),
            Arc::new(MockSearcher::with_links(&[])),
        );

        let err = crawler
            .search_and_crawl(SearchOptions::new("nothing"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlerError::NoSearchResults));
    }
}
