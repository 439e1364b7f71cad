//! Pipeline operations, implemented as `impl WebCrawler` blocks.

pub mod capture;
pub mod convert;
pub mod crawl;
pub mod frames;
pub mod research;
