//! Engine configuration.

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

/// URL- or pattern-matched CSS override applied before capture.
#[derive(Debug, Clone, Default)]
pub struct PagePreset {
    /// Exact URL to match (case-insensitive)
    pub url: Option<String>,

    /// Pattern to match against the URL
    pub pattern: Option<Regex>,

    /// CSS injected into matching pages
    pub css: Option<String>,
}

impl PagePreset {
    /// Preset matching one exact URL.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Preset matching a URL pattern.
    pub fn for_pattern(pattern: Regex) -> Self {
        Self {
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    /// Set the CSS payload.
    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = Some(css.into());
        self
    }

    /// True when this preset applies to the URL. A preset with neither a
    /// URL nor a pattern applies to every page.
    pub fn matches(&self, url: &str) -> bool {
        match (&self.url, &self.pattern) {
            (None, None) => true,
            (Some(exact), _) if exact.eq_ignore_ascii_case(url) => true,
            (_, Some(pattern)) => pattern.is_match(url),
            _ => false,
        }
    }
}

/// Engine configuration shared by all pipelines.
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    /// Identifies one engine run; prefixes every artifact path
    pub id: String,

    /// Viewport width in pixels
    pub frame_width: u32,

    /// Viewport height in pixels; also the scroll-capture frame height
    pub frame_height: u32,

    /// Vertical pixels shared between consecutive capture frames
    pub overlap: u32,

    /// Root directory for persisted artifacts
    pub out_dir: std::path::PathBuf,

    /// Public base URL under which the out dir is served; completion
    /// prompts reference images through it
    pub http_access_point: String,

    /// CSS overrides applied to matching pages before capture
    pub page_presets: Vec<PagePreset>,

    /// Skip recording captures/conversions in the in-memory output
    pub discard_output: bool,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            id: generate_crawl_id(),
            frame_width: 1024,
            frame_height: 1024,
            overlap: 100,
            out_dir: std::path::PathBuf::from("web-capture-out"),
            http_access_point: "http://localhost:8899".to_string(),
            page_presets: Vec::new(),
            discard_output: false,
        }
    }
}

impl CrawlerOptions {
    /// Options with a generated run id and defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the viewport size.
    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Set the capture overlap.
    pub fn with_overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    /// Set the artifact output root.
    pub fn with_out_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }

    /// Set the public access point for artifact URLs.
    pub fn with_http_access_point(mut self, url: impl Into<String>) -> Self {
        self.http_access_point = url.into();
        self
    }

    /// Add a page preset.
    pub fn with_preset(mut self, preset: PagePreset) -> Self {
        self.page_presets.push(preset);
        self
    }

    /// Discard the in-memory output record.
    pub fn discarding_output(mut self) -> Self {
        self.discard_output = true;
        self
    }

    /// Scroll distance per capture iteration.
    pub fn scroll_distance(&self) -> u32 {
        self.frame_height.saturating_sub(self.overlap)
    }

    /// Merge all presets matching a URL into one.
    ///
    /// CSS is concatenated across matches, not replaced; other fields take
    /// the last matching non-empty value.
    pub fn page_preset(&self, url: &str) -> Option<PagePreset> {
        let mut matching = self.page_presets.iter().filter(|p| p.matches(url));
        let first = matching.next()?.clone();
        let mut merged = first;
        for preset in matching {
            if let Some(css) = &preset.css {
                match &mut merged.css {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(css);
                    }
                    None => merged.css = Some(css.clone()),
                }
            }
            if preset.url.is_some() {
                merged.url = preset.url.clone();
            }
            if preset.pattern.is_some() {
                merged.pattern = preset.pattern.clone();
            }
        }
        Some(merged)
    }
}

/// Timestamped unique id for one engine run.
fn generate_crawl_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y-%m-%d-%H-%M"),
        Uuid::new_v4()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_matching() {
        let exact = PagePreset::for_url("https://Example.com/Page");
        assert!(exact.matches("https://example.com/page"));
        assert!(!exact.matches("https://example.com/other"));

        let pattern = PagePreset::for_pattern(Regex::new(r"example\.com/docs/").unwrap());
        assert!(pattern.matches("https://example.com/docs/intro"));
        assert!(!pattern.matches("https://example.com/blog"));

        let global = PagePreset::default().with_css("body{}");
        assert!(global.matches("https://anything.test"));
    }

    #[test]
    fn test_preset_css_concatenates_across_matches() {
        let options = CrawlerOptions::new()
            .with_preset(PagePreset::default().with_css(".banner{display:none}"))
            .with_preset(
                PagePreset::for_pattern(Regex::new(r"example\.com").unwrap())
                    .with_css(".nav{display:none}"),
            );

        let merged = options.page_preset("https://example.com/a").unwrap();
        assert_eq!(
            merged.css.as_deref(),
            Some(".banner{display:none}\n.nav{display:none}")
        );

        // Only the global preset matches here.
        let merged = options.page_preset("https://other.com").unwrap();
        assert_eq!(merged.css.as_deref(), Some(".banner{display:none}"));
    }

    #[test]
    fn test_scroll_distance() {
        let options = CrawlerOptions::new().with_viewport(1024, 1024).with_overlap(100);
        assert_eq!(options.scroll_distance(), 924);
    }
}
