//! Local counterparts of the parse service's summarize and search endpoints,
//! used when the service is unreachable.

use crate::extractor::PageText;
use crate::parse_service::SnippetMatch;
use crate::text::{normalize_text, split_sentences};

const SNIPPET_LEAD: usize = 30;
const SNIPPET_LEN: usize = 100;

/// First `max_sentences` sentences across all pages, in page order.
pub fn summarize_pages(pages: &[PageText], max_sentences: usize) -> String {
    let text = pages
        .iter()
        .map(|page| normalize_text(&page.text))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    split_sentences(&text)
        .into_iter()
        .take(max_sentences)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Character window around the first case-insensitive match of `query`:
/// starts 30 characters before the match and spans at most 100 characters.
pub fn snippet_around(text: &str, query: &str) -> Option<String> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let chars = text.chars().collect::<Vec<_>>();
    let lowered = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect::<Vec<_>>();
    let needle = needle.chars().collect::<Vec<_>>();

    let position = lowered
        .windows(needle.len())
        .position(|window| window == needle.as_slice())?;

    let start = position.saturating_sub(SNIPPET_LEAD);
    let end = (start + SNIPPET_LEN).min(chars.len());
    Some(chars[start..end].iter().collect())
}

/// One match per page that contains `query`.
pub fn search_pages(pages: &[PageText], query: &str) -> Vec<SnippetMatch> {
    pages
        .iter()
        .filter_map(|page| {
            let text = page.text.trim();
            snippet_around(text, query).map(|snippet| SnippetMatch {
                page: page.number,
                snippet,
            })
        })
        .collect()
}

pub fn format_matches(matches: &[SnippetMatch]) -> String {
    if matches.is_empty() {
        return "No matches found.".to_string();
    }
    matches
        .iter()
        .map(|found| format!("[page {}] {}", found.page, found.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn snippet_starts_thirty_chars_before_match() {
        let text = format!("{}Exporter scheme{}", "a".repeat(50), "b".repeat(200));
        let snippet = snippet_around(&text, "exporter SCHEME").unwrap();
        assert_eq!(snippet.chars().count(), 100);
        assert!(snippet.starts_with(&"a".repeat(30)));
        assert_eq!(&snippet[30..45], "Exporter scheme");
    }

    #[test]
    fn snippet_near_start_and_end_is_clamped() {
        assert_eq!(snippet_around("Major exporter", "major").as_deref(), Some("Major exporter"));
        assert!(snippet_around("nothing here", "absent").is_none());
        assert!(snippet_around("anything", " ").is_none());
    }

    #[test]
    fn search_reports_matching_pages_only() {
        let pages = vec![page(1, "GST rules apply."), page(2, "Nothing."), page(3, "More gst.")];
        let matches = search_pages(&pages, "gst");
        assert_eq!(matches.iter().map(|found| found.page).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(format_matches(&matches), "[page 1] GST rules apply.\n[page 3] More gst.");
        assert_eq!(format_matches(&[]), "No matches found.");
    }

    #[test]
    fn summary_takes_leading_sentences_across_pages() {
        let pages = vec![page(1, "First one. Second one."), page(2, "Third one. Fourth one.")];
        assert_eq!(summarize_pages(&pages, 3), "First one. Second one. Third one.");
        assert_eq!(summarize_pages(&pages, 0), "");
    }
}
