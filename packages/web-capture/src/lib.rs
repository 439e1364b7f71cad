//! Web page capture, markdown conversion, and crawl orchestration
//!
//! Captures rendered pages as series of overlapping viewport screenshots
//! (plus optional PDF renders), converts the screenshots into stitched
//! markdown documents with vision completions, and recursively crawls link
//! trees collecting pages that classify as main content. Search and
//! research passes fan crawls out over web-search results.
//!
//! The engine talks to the outside world through three seams: a
//! [`BrowserDriver`](traits::browser::BrowserDriver), a
//! [`Completion`](traits::completion::Completion) provider, and a
//! [`WebSearcher`](traits::searcher::WebSearcher). The `openai` feature
//! (on by default) ships a provider for OpenAI-compatible chat APIs;
//! browser drivers live outside this crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use web_capture::{ConversionOptions, CrawlerOptions, OpenAiCompletion, WebCrawler};
//!
//! let crawler = WebCrawler::builder()
//!     .with_options(CrawlerOptions::new().with_out_dir("./captures"))
//!     .with_browser(my_browser_driver)
//!     .with_completion(Arc::new(OpenAiCompletion::from_env()?))
//!     .build()?;
//!
//! let result = crawler
//!     .convert_page(ConversionOptions::for_url("https://example.com"), None, None)
//!     .await?;
//! println!("{}", result.conversion.markdown);
//! ```

#[cfg(feature = "openai")]
pub mod ai;
pub mod artifacts;
pub mod cancel;
pub mod crawler;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod prompts;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub use ai::OpenAiCompletion;
pub use artifacts::ArtifactStore;
pub use cancel::{CancelSubscription, CancelToken};
pub use crawler::{CrawlerOutput, WebCrawler, WebCrawlerBuilder};
pub use error::{BrowserError, CanceledError, CrawlerError, Result};
pub use lock::{Lock, LockPermit};
pub use pipeline::capture::CaptureObserver;
pub use pipeline::convert::ConversionHooks;
pub use traits::browser::{BrowserDriver, FrameHandle, PageHandle, Rect};
pub use traits::completion::{
    Completion, CompletionRequest, CompletionResponse, FunctionCall, FunctionSpec, PromptPart,
};
pub use traits::searcher::{GoogleSearcher, SearchHit, WebSearcher};
pub use types::capture::{CaptureInstruction, CaptureOptions, PageCapture};
pub use types::config::{CrawlerOptions, PagePreset};
pub use types::conversion::{
    ConversionOptions, ConversionProgress, ConversionResult, PageConversion,
};
pub use types::crawl::{
    CrawlOptions, CrawlState, PageClassification, ResearchOptions, ResearchResult,
    SearchOptions, SearchResultSet, SubjectSummary,
};
pub use types::media::{ActionItem, CapturedMedia};
pub use types::usage::{TokenUsage, UsageDelta, UsageSnapshot};
