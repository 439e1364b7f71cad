//! Capability trait seams consumed by the pipelines.

pub mod browser;
pub mod completion;
pub mod searcher;
