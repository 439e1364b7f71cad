//! The capture engine.
//!
//! [`WebCrawler`] owns the shared configuration, the artifact store, the
//! token-usage accumulator, and the capability seams (browser, completion,
//! search). The pipeline operations are implemented as `impl WebCrawler`
//! blocks in [`crate::pipeline`].

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use crate::artifacts::ArtifactStore;
use crate::error::{CrawlerError, Result};
use crate::traits::browser::BrowserDriver;
use crate::traits::completion::{Completion, CompletionRequest, CompletionResponse};
use crate::traits::searcher::WebSearcher;
use crate::types::capture::PageCapture;
use crate::types::config::CrawlerOptions;
use crate::types::conversion::PageConversion;
use crate::types::crawl::ResearchResult;
use crate::types::usage::{TokenUsage, UsageSnapshot};

/// Everything an engine run produced, persisted as `_output.json`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CrawlerOutput {
    pub captures: Vec<PageCapture>,
    pub conversions: Vec<PageConversion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub research: Vec<ResearchResult>,
    pub usage: UsageSnapshot,
}

/// Builder for [`WebCrawler`].
#[derive(Default)]
pub struct WebCrawlerBuilder {
    options: CrawlerOptions,
    browser: Option<Arc<dyn BrowserDriver>>,
    completion: Option<Arc<dyn Completion>>,
    searcher: Option<Arc<dyn WebSearcher>>,
}

impl WebCrawlerBuilder {
    /// Set the engine options.
    pub fn with_options(mut self, options: CrawlerOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the browser capability. Required.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Set the completion capability. Required.
    pub fn with_completion(mut self, completion: Arc<dyn Completion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Set the search capability. Only required for search and research
    /// operations.
    pub fn with_searcher(mut self, searcher: Arc<dyn WebSearcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<WebCrawler> {
        let browser = self.browser.ok_or_else(|| CrawlerError::InvalidOptions {
            reason: "a browser driver is required".to_string(),
        })?;
        let completion = self.completion.ok_or_else(|| CrawlerError::InvalidOptions {
            reason: "a completion provider is required".to_string(),
        })?;

        let artifacts = ArtifactStore::new(&self.options);
        info!(crawl_id = %self.options.id, "crawler created");

        Ok(WebCrawler {
            options: self.options,
            usage: TokenUsage::shared(),
            output: Mutex::new(CrawlerOutput::default()),
            browser,
            completion,
            searcher: self.searcher,
            artifacts,
        })
    }
}

/// Web page capture, conversion, and crawl engine.
pub struct WebCrawler {
    options: CrawlerOptions,
    usage: Arc<TokenUsage>,
    output: Mutex<CrawlerOutput>,
    browser: Arc<dyn BrowserDriver>,
    completion: Arc<dyn Completion>,
    searcher: Option<Arc<dyn WebSearcher>>,
    artifacts: ArtifactStore,
}

impl WebCrawler {
    /// Start building an engine.
    pub fn builder() -> WebCrawlerBuilder {
        WebCrawlerBuilder::default()
    }

    /// The engine options.
    pub fn options(&self) -> &CrawlerOptions {
        &self.options
    }

    /// The artifact store for this run.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The shared token-usage accumulator.
    pub fn usage(&self) -> &Arc<TokenUsage> {
        &self.usage
    }

    /// The browser capability.
    pub(crate) fn browser(&self) -> &Arc<dyn BrowserDriver> {
        &self.browser
    }

    /// The search capability, or an options error when none was configured.
    pub(crate) fn searcher(&self) -> Result<&Arc<dyn WebSearcher>> {
        self.searcher.as_ref().ok_or_else(|| CrawlerError::InvalidOptions {
            reason: "no searcher configured".to_string(),
        })
    }

    /// Run one completion call and fold its token usage into the run
    /// accumulator.
    pub(crate) async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self.completion.complete(request).await?;
        self.usage.add(response.usage);
        debug!(
            input = response.usage.input_tokens,
            output = response.usage.output_tokens,
            "completion call"
        );
        Ok(response)
    }

    /// Reset the usage accumulator. Only valid between crawl trees.
    pub fn reset_usage(&self) {
        self.usage.reset();
    }

    pub(crate) fn record_capture(&self, capture: &PageCapture) {
        if self.options.discard_output {
            return;
        }
        self.output.lock().unwrap().captures.push(capture.clone());
    }

    pub(crate) fn record_conversion(&self, conversion: &PageConversion) {
        if self.options.discard_output {
            return;
        }
        self.output
            .lock()
            .unwrap()
            .conversions
            .push(conversion.clone());
    }

    pub(crate) fn record_research(&self, research: &ResearchResult) {
        if self.options.discard_output {
            return;
        }
        self.output.lock().unwrap().research.push(research.clone());
    }

    /// A copy of the in-memory output with current usage totals.
    pub fn output(&self) -> CrawlerOutput {
        let mut output = self.output.lock().unwrap().clone();
        output.usage = self.usage.snapshot();
        output
    }

    /// Persist the in-memory output record as `_output.json`.
    pub async fn write_output(&self) -> Result<std::path::PathBuf> {
        let output = self.output();
        info!(
            captures = output.captures.len(),
            conversions = output.conversions.len(),
            usage = %output.usage,
            "writing run output"
        );
        self.artifacts.write_json("_output.json", &output).await
    }
}
