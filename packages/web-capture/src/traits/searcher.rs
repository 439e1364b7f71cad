//! Search provider seam.
//!
//! One HTTP call returning a ranked list of links for a query term; the
//! crawl orchestrator fans out over them. Google Custom Search is the
//! reference implementation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CrawlerError, Result};

/// One search result link.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The result URL
    pub link: String,

    /// Title of the page, if provided by the search API
    pub title: Option<String>,

    /// Snippet/description from the search results
    pub snippet: Option<String>,
}

impl SearchHit {
    /// Create a hit from a link.
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: None,
            snippet: None,
        }
    }

    /// Add a title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add a snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// Web search seam.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Search the web for links relevant to the term.
    async fn search(&self, term: &str) -> Result<Vec<SearchHit>>;
}

/// Google Custom Search-backed searcher.
pub struct GoogleSearcher {
    api_key: String,
    cx: String,
    client: reqwest::Client,
}

impl GoogleSearcher {
    /// Create a searcher with an API key and search-engine id.
    pub fn new(api_key: impl Into<String>, cx: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            cx: cx.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebSearcher for GoogleSearcher {
    async fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            items: Vec<Item>,
        }

        #[derive(Deserialize)]
        struct Item {
            link: Option<String>,
            title: Option<String>,
            snippet: Option<String>,
        }

        let response = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", term),
            ])
            .send()
            .await
            .map_err(|e| CrawlerError::Search(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CrawlerError::Search(format!(
                "search API returned {}",
                response.status()
            )));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| CrawlerError::Search(e.to_string()))?;

        Ok(parsed
            .items
            .into_iter()
            .filter_map(|item| {
                let mut hit = SearchHit::new(item.link?);
                if let Some(title) = item.title {
                    hit = hit.with_title(title);
                }
                if let Some(snippet) = item.snippet {
                    hit = hit.with_snippet(snippet);
                }
                Some(hit)
            })
            .collect())
    }
}
