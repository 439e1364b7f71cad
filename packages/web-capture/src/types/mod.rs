//! Engine data types.

pub mod capture;
pub mod config;
pub mod conversion;
pub mod crawl;
pub mod media;
pub mod usage;
