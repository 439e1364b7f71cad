//! Crawl, search, and research option/result types.

use serde::{Deserialize, Serialize};

use super::conversion::PageConversion;
use super::usage::UsageSnapshot;

/// Default number of link-hops from the root URL.
pub const DEFAULT_CRAWL_MAX_DEPTH: usize = 2;

/// Default bound on concurrent browser sessions within one crawl.
pub const DEFAULT_CRAWL_MAX_CONCURRENT: usize = 1;

/// Default cap on conversions returned by one crawl.
pub const DEFAULT_CRAWL_RESULT_LIMIT: usize = 3;

/// Default bound on concurrently scanned search results.
pub const DEFAULT_SEARCH_MAX_CONCURRENT: usize = 3;

/// Options for one crawl tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    /// Root URL of the crawl
    pub url: String,

    /// Max number of link-hops from the root; the root has depth 1
    pub max_depth: usize,

    /// Max concurrently open browser sessions within this crawl
    pub max_concurrent: usize,

    /// Natural-language description of what qualifying pages look like
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_requirement_prompt: Option<String>,

    /// Max number of conversions to return
    pub result_limit: usize,
}

impl CrawlOptions {
    /// Crawl options for a URL with defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: DEFAULT_CRAWL_MAX_DEPTH,
            max_concurrent: DEFAULT_CRAWL_MAX_CONCURRENT,
            page_requirement_prompt: None,
            result_limit: DEFAULT_CRAWL_RESULT_LIMIT,
        }
    }

    /// Set the depth bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Require pages to satisfy a natural-language requirement.
    pub fn with_page_requirement(mut self, prompt: impl Into<String>) -> Self {
        self.page_requirement_prompt = Some(prompt.into());
        self
    }

    /// Set the result cap.
    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit;
        self
    }

    /// The same options pointed at a different URL.
    pub fn for_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

/// Accumulated state of one crawl tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    /// Lowercased URLs already visited (dedupe across branches)
    pub crawled: Vec<String>,

    /// Conversions of pages that passed classification and requirements
    pub results: Vec<PageConversion>,
}

/// Page classification produced from the first screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageClassification {
    /// Marketing or entry page
    LandingPage,

    /// The substantive content the crawl is after
    MainContent,

    /// A page that primarily links to other pages
    ReferenceList,

    Other,
}

impl PageClassification {
    /// Parse the wire value used by the classification function call.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "landing-page" => Some(Self::LandingPage),
            "main-content" => Some(Self::MainContent),
            "reference-list" => Some(Self::ReferenceList),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Options for one search-and-crawl fan-out.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// The term to search for
    pub term: String,

    /// Max number of search results scanned concurrently
    pub max_concurrent: usize,

    /// Crawl options applied to each result link (`url` is replaced)
    pub crawl: CrawlOptions,
}

impl SearchOptions {
    /// Search options for a term with default crawl settings.
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            max_concurrent: DEFAULT_SEARCH_MAX_CONCURRENT,
            crawl: CrawlOptions::new(""),
        }
    }

    /// Set the fan-out bound.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-link crawl options.
    pub fn with_crawl(mut self, crawl: CrawlOptions) -> Self {
        self.crawl = crawl;
        self
    }
}

/// Result of one search-and-crawl fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultSet {
    /// The search term used
    pub term: String,

    /// Crawl state accumulated across all result branches
    #[serde(flatten)]
    pub state: CrawlState,

    /// Token usage at completion time
    pub usage: UsageSnapshot,
}

/// Options for a research run over search results.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    /// Report title
    pub title: String,

    /// Subjects to summarize individually
    pub subjects: Vec<String>,

    /// What the final conclusion should be about
    pub conclusion: String,

    /// Run this search first when no results are supplied
    pub search: Option<SearchOptions>,

    /// Pre-computed search results to research over
    pub search_results: Option<SearchResultSet>,
}

/// One subject's summary within a research result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub summary: String,
}

/// Result of a research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub title: String,
    pub subjects: Vec<String>,
    pub conclusion: String,
    pub subject_summaries: Vec<SubjectSummary>,
    pub conclusion_summary: String,
    pub usage: UsageSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parse() {
        assert_eq!(
            PageClassification::parse("main-content"),
            Some(PageClassification::MainContent)
        );
        assert_eq!(PageClassification::parse("bogus"), None);
    }

    #[test]
    fn test_crawl_options_for_url_keeps_settings() {
        let options = CrawlOptions::new("https://a.com")
            .with_max_depth(4)
            .with_result_limit(7);
        let next = options.for_url("https://b.com");
        assert_eq!(next.url, "https://b.com");
        assert_eq!(next.max_depth, 4);
        assert_eq!(next.result_limit, 7);
    }
}
