//! Prompt builders for every completion call the pipelines make.

use serde_json::json;

use crate::traits::completion::{CompletionRequest, FunctionSpec};
use crate::types::crawl::SubjectSummary;
use crate::types::media::ActionItem;

/// Text a vision model returns for an unreadable/blank screenshot; the
/// conversion pipeline reacts by re-taking the frame in safe mode.
pub const BLANK_SENTINEL: &str = "BLANK";

/// Wire name of the popup-close function offered during conversion.
pub const CLOSE_POPUP_FN: &str = "closePopup";

/// Wire name of the page-classification function.
pub const CLASSIFY_FN: &str = "classifyWebsite";

/// Wire name of the requirement-check function.
pub const REQUIREMENTS_FN: &str = "setRequirementsMet";

/// Wire name of the link-selection function.
pub const NAVIGATE_FN: &str = "navigateTo";

/// Wire name of the popup button-click function.
pub const CLICK_FN: &str = "click";

/// Wire name of the no-popup-found function.
pub const NOT_FOUND_FN: &str = "notFound";

fn links_block(links: &[ActionItem]) -> String {
    links
        .iter()
        .map(ActionItem::to_md_link)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert one screenshot into a markdown fragment.
///
/// Fragment 0 is converted standalone; later fragments carry the previous
/// fragment as overlap context and must begin exactly where it ends.
pub fn conversion_request(
    image_url: &str,
    previous_fragment: Option<&str>,
    links: &[ActionItem],
    allow_popup_close: bool,
) -> CompletionRequest {
    let mut request = CompletionRequest::new().system(
        "You are a web scraping agent that is converting a series of screenshots of a web page into markdown.\n\
         Convert tables, graphs and charts into markdown tables with a detailed description.\n\
         If a graph or chart can not be converted into a markdown table convert it to a Mermaid diagram in a code block.\n\
         Convert images into markdown images with a detailed description in the alt text area and if you don't know the full URL to the image use an empty anchor link (a single hash tag).\n\
         Ignore any site navigation UI elements.\n\
         Ignore any ads.\n\
         If a blank image is given respond with the text \"BLANK\" in all caps.\n\
         Do not enclose your responses in a markdown code block.",
    );

    if allow_popup_close {
        request = request
            .system(
                "If the screenshot has a popup that covers the majority of the page and the popup \
                 has buttons to close or accept the terms of the popup call the closePopup function.",
            )
            .function(
                FunctionSpec::new(CLOSE_POPUP_FN, json!({"type": "object", "properties": {}}))
                    .with_description(
                        "Only call if the popup is large and covers the majority of the screenshot.",
                    ),
            );
    }

    request = request.user("Convert the following image into a detailed markdown document or call closePopup.");

    if !links.is_empty() {
        request = request.user(format!(
            "Below is a list of hyperlinks on the page. Each item in the list includes text as the \
             link is displayed in the following image and its URL.\n\
             When converting the following image into markdown you can use the following list of \
             links to populate the generated markdown links.\n\
             If you are unsure of which URL to use when converting a link use an empty anchor link \
             (a single hashtag) as the URL.\n\nPage Hyperlinks:\n{}",
            links_block(links)
        ));
    }

    if let Some(previous) = previous_fragment {
        let previous = if previous.is_empty() { "Empty" } else { previous };
        request = request.user(format!(
            "The following image continues where the following markdown ends.\n\
             The image and markdown overlap.\n\
             Your response should start exactly where the overlap ends.\n\n\
             Markdown from previous screenshot:\n{previous}"
        ));
    }

    request.image(image_url)
}

/// Summarize a stitched markdown document.
pub fn summary_request(markdown: &str) -> CompletionRequest {
    CompletionRequest::new().user(format!(
        "Summarize the following markdown document.\n\
         Include important financial numbers that would be important to a financial advisor.\n\
         Format the summary using markdown. Do not enclose your responses in a markdown code block.\n\n\
         {markdown}"
    ))
}

/// Classify a page from its first screenshots.
pub fn classification_request(first_image: &str, second_image: Option<&str>) -> CompletionRequest {
    let mut request = CompletionRequest::new()
        .function(FunctionSpec::new(
            CLASSIFY_FN,
            json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["landing-page", "main-content", "reference-list", "other"]
                    }
                },
                "required": ["type"]
            }),
        ))
        .user(
            "Classify the following images of a website based on their main purpose by calling \
             the classifyWebsite function.\n\
             Pages that primarily link to other pages should be considered a reference-list.",
        )
        .image(first_image);
    if let Some(second) = second_image {
        request = request.image(second);
    }
    request
}

/// Decide whether a page satisfies a caller-supplied requirement.
pub fn requirement_request(
    requirement: &str,
    first_image: &str,
    second_image: Option<&str>,
) -> CompletionRequest {
    let mut request = CompletionRequest::new()
        .function(FunctionSpec::new(
            REQUIREMENTS_FN,
            json!({
                "type": "object",
                "properties": {
                    "requirementsMet": {
                        "type": "boolean",
                        "description": "True if the given requirements were met"
                    }
                },
                "required": ["requirementsMet"]
            }),
        ))
        .user(format!(
            "Call setRequirementsMet based on the following requirements and the following image \
             of a screenshot of the top of a webpage.\n\nRequirements:\n{requirement}"
        ))
        .image(first_image);
    if let Some(second) = second_image {
        request = request.image(second);
    }
    request
}

/// Pick the next URLs to crawl from a non-main-content page.
pub fn navigation_request(
    links: &[ActionItem],
    already_crawled: &[String],
    requirement: Option<&str>,
    first_image: &str,
    second_image: Option<&str>,
) -> CompletionRequest {
    let mut user = format!(
        "Based on the following links and images select the top 5 URLs to navigate to by calling \
         navigateTo. Do not use anchor links.\n\nLinks:\n{}",
        links_block(links)
    );
    if !already_crawled.is_empty() {
        user.push_str(&format!(
            "\n\nDo not include any of the following URLs, they have already been scanned.\n{}",
            already_crawled.join("\n")
        ));
    }

    let mut request = CompletionRequest::new()
        .function(FunctionSpec::new(
            NAVIGATE_FN,
            json!({
                "type": "object",
                "properties": {
                    "urls": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "URLs of new pages to navigate to"
                    }
                },
                "required": ["urls"]
            }),
        ))
        .user(user);

    if let Some(requirement) = requirement {
        request = request.user(format!(
            "The URLs passed to navigateTo should point to pages that meet the following \
             requirements based on your best knowledge:\n{requirement}"
        ));
    }

    request = request.image(first_image);
    if let Some(second) = second_image {
        request = request.image(second);
    }
    request
}

/// Identify which button closes a popup, if any.
pub fn popup_request(buttons: &serde_json::Value, image_url: &str) -> CompletionRequest {
    CompletionRequest::new()
        .function(
            FunctionSpec::new(
                CLICK_FN,
                json!({
                    "type": "object",
                    "properties": {
                        "id": {
                            "type": "string",
                            "description": "The id of the button from the Clickable List"
                        },
                        "text": {
                            "type": "string",
                            "description": "The text content of the button to click"
                        }
                    },
                    "required": ["id"]
                }),
            ),
        )
        .function(FunctionSpec::new(
            NOT_FOUND_FN,
            json!({"type": "object", "properties": {}}),
        ))
        .user(format!(
            "If the following screenshot has a popup that covers the majority of the page call \
             the click function to click the appropriate button to close the popup.\n\
             If the screenshot does not appear to have a popup call the notFound function.\n\
             Avoid clicking on buttons that link to other pages or result in viewing content \
             other than the main content of the page.\n\
             If a popup is found and it is a cookies banner accept all cookies.\n\n\
             Below is a list of buttons with corresponding IDs in the screenshot.\n\n\
             Buttons:\n{}",
            serde_json::to_string_pretty(buttons).unwrap_or_default()
        ))
        .image(image_url)
}

/// Summarize a collection of articles for one research subject.
pub fn subject_summary_request(
    subject: &str,
    all_subjects: &[String],
    conclusion: &str,
    articles_md: &str,
) -> CompletionRequest {
    let mut request = CompletionRequest::new().system(format!(
        "You are a research agent analyzing the summarization of a collection of articles.\n\
         Summarize the collection of articles based on the following subject.\n\n\
         Subject: {subject}"
    ));

    if all_subjects.len() > 1 {
        let others = all_subjects
            .iter()
            .filter(|s| s.as_str() != subject)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        request = request.system(format!(
            "Keep in mind that multiple subject summaries will be generated based on the same \
             collection of articles.\n\
             For now focus on the subject of \"{subject}\" but if there are any important \
             relations between the subjects you can include them.\n\n\
             Other Subjects: {others}"
        ));
    }

    request
        .system(format!(
            "After generating all subject summaries a final conclusion will be generated based on \
             \"{conclusion}\".\n\
             Primarily focus on the subject of \"{subject}\".\n\n\
             Do not include a title or header as part of the summary."
        ))
        .user(format!("Articles:\n\n{articles_md}"))
}

/// Write the final research conclusion.
pub fn conclusion_request(
    conclusion: &str,
    articles_md: &str,
    subject_summaries: &[SubjectSummary],
) -> CompletionRequest {
    let summaries_md = subject_summaries
        .iter()
        .map(|s| format!("Subject: {}\nSummary:\n{}", s.subject, s.summary))
        .collect::<Vec<_>>()
        .join("\n\n\n");

    CompletionRequest::new()
        .system(format!(
            "You are a research agent writing your final conclusion about \"{conclusion}\" based \
             on a collection of articles and subject specific summaries.\n\n\
             Do not include a title or header as part of the conclusion."
        ))
        .user(format!("Articles:\n\n{articles_md}"))
        .user(format!("Subject Summaries:\n\n{summaries_md}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::completion::PromptPart;

    fn user_text(request: &CompletionRequest) -> String {
        request
            .parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::User(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_first_fragment_has_no_overlap_context() {
        let request = conversion_request("https://x/0.png", None, &[], true);
        assert!(!user_text(&request).contains("Markdown from previous screenshot"));
    }

    #[test]
    fn test_later_fragments_carry_previous_fragment() {
        let request = conversion_request("https://x/1.png", Some("## Prior section"), &[], false);
        let text = user_text(&request);
        assert!(text.contains("Your response should start exactly where the overlap ends."));
        assert!(text.contains("## Prior section"));
        assert!(request.functions.is_empty());
    }

    #[test]
    fn test_classification_declares_enum_function() {
        let request = classification_request("https://x/0.png", Some("https://x/1.png"));
        assert_eq!(request.functions[0].name, CLASSIFY_FN);
        let images = request
            .parts
            .iter()
            .filter(|p| matches!(p, PromptPart::Image(_)))
            .count();
        assert_eq!(images, 2);
    }

    #[test]
    fn test_navigation_excludes_crawled() {
        let request = navigation_request(
            &[],
            &["https://seen.test/a".to_string()],
            Some("annual reports"),
            "https://x/0.png",
            None,
        );
        let text = user_text(&request);
        assert!(text.contains("https://seen.test/a"));
        assert!(text.contains("annual reports"));
    }
}
