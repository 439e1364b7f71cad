//! Persisted artifact layout.
//!
//! Every artifact of one engine run lives under `out_dir/{crawl_id}/` with
//! a name that is a deterministic function of the capture's set id and
//! frame index, so re-running with the same set id overwrites prior
//! artifacts:
//!
//! - `{set_id}-img-{i}-{try}.png` / `.json` — screenshot + action items
//! - `{set_id}-img-{i}.md` — per-image markdown fragment
//! - `{set_id}-pdf.pdf` — full-document render
//! - `{set_id}-document.md` / `{set_id}-summary.md` / `{set_id}-conversion.json`
//! - `search-{ts}.json`, `research-{ts}.json`, `research-{ts}.md`, `_output.json`

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::error::Result;
use crate::types::config::CrawlerOptions;
use crate::types::media::{ActionItem, CapturedMedia};

/// Writes artifacts under `out_dir/{crawl_id}/` and derives their public
/// URLs from the configured HTTP access point.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    out_dir: PathBuf,
    crawl_id: String,
    http_access_point: String,
}

impl ArtifactStore {
    /// Create a store from engine options.
    pub fn new(options: &CrawlerOptions) -> Self {
        Self {
            out_dir: options.out_dir.clone(),
            crawl_id: options.id.clone(),
            http_access_point: options.http_access_point.trim_end_matches('/').to_string(),
        }
    }

    /// Directory holding this run's artifacts.
    pub fn dir(&self) -> PathBuf {
        self.out_dir.join(&self.crawl_id)
    }

    /// Ensure the run directory exists and return it.
    pub async fn ensure_dir(&self) -> Result<PathBuf> {
        let dir = self.dir();
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Public URL of an artifact by file name.
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}/{}", self.http_access_point, self.crawl_id, name)
    }

    /// Path of an artifact relative to the output root.
    pub fn relative_path(&self, name: &str) -> String {
        format!("{}/{}", self.crawl_id, name)
    }

    /// Base name (without extension) of a screenshot artifact.
    pub fn image_name(set_id: &str, index: usize, try_index: usize) -> String {
        format!("{set_id}-img-{index}-{try_index}")
    }

    /// Persist a screenshot and its action items, returning the media
    /// record referencing both.
    pub async fn write_image(
        &self,
        set_id: &str,
        index: usize,
        try_index: usize,
        png: &[u8],
        action_items: &[ActionItem],
    ) -> Result<CapturedMedia> {
        let dir = self.ensure_dir().await?;
        let name = Self::image_name(set_id, index, try_index);

        fs::write(dir.join(format!("{name}.png")), png).await?;
        fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_vec_pretty(action_items)?,
        )
        .await?;

        Ok(CapturedMedia {
            path: self.relative_path(&format!("{name}.png")),
            url: self.url_for(&format!("{name}.png")),
            content_type: "image/png".to_string(),
            action_items: action_items.to_vec(),
        })
    }

    /// Persist a PDF render.
    pub async fn write_pdf(&self, set_id: &str, pdf: &[u8]) -> Result<CapturedMedia> {
        let dir = self.ensure_dir().await?;
        let name = format!("{set_id}-pdf.pdf");
        fs::write(dir.join(&name), pdf).await?;

        Ok(CapturedMedia {
            path: self.relative_path(&name),
            url: self.url_for(&name),
            content_type: "application/pdf".to_string(),
            action_items: Vec::new(),
        })
    }

    /// Persist one markdown fragment; returns the written path.
    pub async fn write_fragment(&self, set_id: &str, index: usize, text: &str) -> Result<PathBuf> {
        self.write_text(&format!("{set_id}-img-{index}.md"), text).await
    }

    /// Persist the stitched markdown document.
    pub async fn write_document(&self, set_id: &str, markdown: &str) -> Result<PathBuf> {
        self.write_text(&format!("{set_id}-document.md"), markdown).await
    }

    /// Persist the document summary.
    pub async fn write_summary(&self, set_id: &str, summary: &str) -> Result<PathBuf> {
        self.write_text(&format!("{set_id}-summary.md"), summary).await
    }

    /// Persist a JSON artifact.
    pub async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let dir = self.ensure_dir().await?;
        let path = dir.join(name);
        fs::write(&path, serde_json::to_vec_pretty(value)?).await?;
        debug!(path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Persist a text artifact.
    pub async fn write_text(&self, name: &str, text: &str) -> Result<PathBuf> {
        let dir = self.ensure_dir().await?;
        let path = dir.join(name);
        fs::write(&path, text).await?;
        debug!(path = %path.display(), "artifact written");
        Ok(path)
    }

    /// True when the named artifact exists.
    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.dir().join(name)).await.unwrap_or(false)
    }

    /// The run directory joined to a file name.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir().join(name)
    }
}

/// Millisecond timestamp used in search/research artifact names.
pub fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
