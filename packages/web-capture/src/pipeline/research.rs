//! Research over search results.
//!
//! Takes the conversions gathered by a search-and-crawl (or runs one) and
//! produces per-subject summaries plus a final conclusion, persisted as a
//! JSON record and a markdown report.

use futures::future::join_all;
use tracing::info;

use crate::artifacts::timestamp_millis;
use crate::cancel::CancelToken;
use crate::crawler::WebCrawler;
use crate::error::{CrawlerError, Result};
use crate::pipeline::capture::check_cancel;
use crate::prompts;
use crate::types::crawl::{ResearchOptions, ResearchResult, SearchResultSet, SubjectSummary};

impl WebCrawler {
    /// Run a research pass: gather search results (unless supplied),
    /// summarize each subject over them, and write a conclusion.
    pub async fn run_research(
        &self,
        options: ResearchOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<ResearchResult> {
        check_cancel(cancel)?;
        let results = match (options.search_results, options.search) {
            (Some(results), _) => results,
            (None, Some(search)) => self.search_and_crawl(search, cancel).await?,
            (None, None) => {
                return Err(CrawlerError::InvalidOptions {
                    reason: "research requires search options or search results".to_string(),
                })
            }
        };
        let articles = articles_markdown(&results);

        let subjects = &options.subjects;
        let conclusion = options.conclusion.as_str();
        let articles_md = articles.as_str();
        let summaries = join_all(subjects.iter().map(|subject| async move {
            check_cancel(cancel)?;
            let response = self
                .complete(prompts::subject_summary_request(
                    subject,
                    subjects,
                    conclusion,
                    articles_md,
                ))
                .await?;
            Ok(SubjectSummary {
                subject: subject.clone(),
                summary: response.text,
            })
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        check_cancel(cancel)?;
        let conclusion_summary = self
            .complete(prompts::conclusion_request(
                &options.conclusion,
                &articles,
                &summaries,
            ))
            .await?
            .text;

        let research = ResearchResult {
            title: options.title,
            subjects: options.subjects,
            conclusion: options.conclusion,
            subject_summaries: summaries,
            conclusion_summary,
            usage: self.usage().snapshot(),
        };

        let ts = timestamp_millis();
        self.artifacts()
            .write_json(&format!("research-{ts}.json"), &research)
            .await?;
        self.artifacts()
            .write_text(&format!("research-{ts}.md"), &report_markdown(&research))
            .await?;

        self.record_research(&research);
        info!(title = %research.title, subjects = research.subjects.len(), "research finished");
        Ok(research)
    }
}

/// The crawl's conversions as one markdown article collection.
fn articles_markdown(results: &SearchResultSet) -> String {
    results
        .state
        .results
        .iter()
        .map(|conversion| format!("## {}\n\n{}", conversion.url, conversion.markdown))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Human-readable report written next to the JSON record, with an anchor
/// link per subject.
fn report_markdown(research: &ResearchResult) -> String {
    let mut report = format!("# {}\n", research.title);
    for summary in &research.subject_summaries {
        report.push_str(&format!(
            "\n- [{}](#{})",
            summary.subject,
            anchor(&summary.subject)
        ));
    }
    report.push_str("\n- [Conclusion](#conclusion)\n");
    for summary in &research.subject_summaries {
        report.push_str(&format!("\n## {}\n\n{}\n", summary.subject, summary.summary));
    }
    report.push_str(&format!("\n## Conclusion\n\n{}\n", research.conclusion_summary));
    report
}

/// Heading text as a markdown anchor fragment.
fn anchor(heading: &str) -> String {
    heading
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' => Some(c),
            ' ' => Some('-'),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{engine_with, MockBrowser, MockCompletion, MockResponse};
    use crate::types::conversion::PageConversion;
    use crate::types::crawl::CrawlState;

    fn canned_results() -> SearchResultSet {
        SearchResultSet {
            term: "solar market".to_string(),
            state: CrawlState {
                crawled: vec!["https://a.test".to_string()],
                results: vec![PageConversion {
                    url: "https://a.test".to_string(),
                    markdown: "Solar capacity grew 20%".to_string(),
                    summary: "growth".to_string(),
                    set_id: "s".to_string(),
                }],
            },
            usage: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_research_over_supplied_results() {
        let completion = Arc::new(MockCompletion::new().with_responses(vec![
            MockResponse::text("Capacity is accelerating."),
            MockResponse::text("Invest in solar."),
        ]));
        let crawler = engine_with(Arc::new(MockBrowser::new()), completion.clone());

        let research = crawler
            .run_research(
                ResearchOptions {
                    title: "Solar outlook".to_string(),
                    subjects: vec!["capacity".to_string()],
                    conclusion: "whether to invest".to_string(),
                    search: None,
                    search_results: Some(canned_results()),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(research.subject_summaries.len(), 1);
        assert_eq!(research.subject_summaries[0].summary, "Capacity is accelerating.");
        assert_eq!(research.conclusion_summary, "Invest in solar.");

        // Both prompts carried the article text.
        for request in completion.requests() {
            assert!(request.parts.iter().any(|part| matches!(
                part,
                crate::traits::completion::PromptPart::User(text)
                    if text.contains("Solar capacity grew 20%")
            )));
        }
    }

    #[test]
    fn test_anchor_slugs() {
        assert_eq!(anchor("Solar Capacity"), "solar-capacity");
        assert_eq!(anchor("Q1 2024 Results!"), "q1-2024-results");
    }

    #[tokio::test]
    async fn test_research_requires_a_source() {
        let crawler = engine_with(Arc::new(MockBrowser::new()), Arc::new(MockCompletion::new()));
        let err = crawler
            .run_research(
                ResearchOptions {
                    title: "t".to_string(),
                    subjects: vec![],
                    conclusion: "c".to_string(),
                    search: None,
                    search_results: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlerError::InvalidOptions { .. }));
    }
}
