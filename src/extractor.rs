//! Search-results HTML to [`SearchResult`] records.
//!
//! Parsing never fails: markup that matches nothing yields an empty list.
//! Callers learn about broken upstreams from the fetch step, not from here.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

/// Snippet used when only the fallback pattern matched.
pub const NO_SNIPPET: &str = "No description available";

const TITLE_CLASS: &str = "result__a";

// ============================================================================
// Data Structures
// ============================================================================

/// One organic result, in the order it appeared on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

// ============================================================================
// Selectors
// ============================================================================

static PAIR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a, .result__snippet").expect("static selector"));

static FALLBACK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a.result__a[href], a.result-link[href], h2 a[href], h3 a[href]")
        .expect("static selector")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

// ============================================================================
// Extraction
// ============================================================================

/// Extract at most `max_results` results from a search-results page.
///
/// Title anchors are paired with the snippet that follows them. When the page
/// has no such pairs, title anchors alone are recovered and their snippet is
/// [`NO_SNIPPET`].
pub fn extract(html: &str, max_results: usize) -> Vec<SearchResult> {
    if max_results == 0 {
        return Vec::new();
    }

    let document = Html::parse_document(html);

    let results = paired_results(&document, max_results);
    if !results.is_empty() {
        return results;
    }

    let results = fallback_results(&document, max_results);
    debug!(count = results.len(), "primary result pattern matched nothing, used fallback");
    results
}

fn paired_results(document: &Html, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();
    let mut pending_title: Option<ElementRef<'_>> = None;

    for element in document.select(&PAIR_SELECTOR) {
        if results.len() >= limit {
            break;
        }

        if is_title_anchor(&element) {
            // A title with no snippet before the next title is not a match.
            pending_title = Some(element);
            continue;
        }

        let Some(title) = pending_title.take() else {
            continue;
        };
        if let Some(result) = build_result(title, clean_text(element)) {
            results.push(result);
        }
    }

    results
}

fn fallback_results(document: &Html, limit: usize) -> Vec<SearchResult> {
    document
        .select(&FALLBACK_SELECTOR)
        .filter_map(|anchor| build_result(anchor, NO_SNIPPET.to_string()))
        .take(limit)
        .collect()
}

fn build_result(anchor: ElementRef<'_>, body: String) -> Option<SearchResult> {
    let title = clean_text(anchor);
    if title.is_empty() {
        return None;
    }
    let href = normalize_href(anchor.value().attr("href")?)?;
    Some(SearchResult { title, href, body })
}

fn is_title_anchor(element: &ElementRef<'_>) -> bool {
    element.value().name() == "a" && element.value().classes().any(|c| c == TITLE_CLASS)
}

/// Text content with embedded markup dropped and whitespace collapsed.
fn clean_text(element: ElementRef<'_>) -> String {
    let text = element.text().collect::<String>();
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

// ============================================================================
// Link Normalization
// ============================================================================

/// Turn a result href into an absolute `http(s)` URL.
///
/// Protocol-relative links get `https:`; DuckDuckGo `/l/?uddg=` redirect links
/// are unwrapped to their destination. Anything that still is not an absolute
/// web URL is dropped.
pub fn normalize_href(href: &str) -> Option<String> {
    let href = href.trim();

    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with("/l/?") {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };

    let url = Url::parse(&absolute).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    if let Some(destination) = unwrap_redirect(&url) {
        return Some(destination);
    }
    Some(absolute)
}

fn unwrap_redirect(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let is_ddg = host == "duckduckgo.com" || host.ends_with(".duckduckgo.com");
    if !is_ddg || url.path() != "/l/" {
        return None;
    }

    let (_, destination) = url.query_pairs().find(|(key, _)| key == "uddg")?;
    let parsed = Url::parse(&destination).ok()?;
    matches!(parsed.scheme(), "http" | "https").then(|| destination.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_block(i: usize) -> String {
        format!(
            r#"<div class="result results_links web-result">
                 <h2 class="result__title">
                   <a rel="nofollow" class="result__a" href="https://example.com/{i}">Result <b>{i}</b></a>
                 </h2>
                 <a class="result__snippet" href="https://example.com/{i}">Snippet   for
                    <b>result</b> {i}</a>
               </div>"#
        )
    }

    fn page(count: usize) -> String {
        let blocks: String = (0..count).map(result_block).collect();
        format!("<html><body><div id=\"links\">{blocks}</div></body></html>")
    }

    #[test]
    fn extracts_pairs_in_document_order() {
        let results = extract(&page(3), 10);
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.title, format!("Result {i}"));
            assert_eq!(result.href, format!("https://example.com/{i}"));
            assert_eq!(result.body, format!("Snippet for result {i}"));
        }
    }

    #[test]
    fn truncates_at_max_results() {
        let results = extract(&page(20), 5);
        assert_eq!(results.len(), 5);
        let titles: Vec<_> = results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Result 0", "Result 1", "Result 2", "Result 3", "Result 4"]);
    }

    #[test]
    fn zero_max_results_yields_nothing() {
        assert!(extract(&page(3), 0).is_empty());
    }

    #[test]
    fn extraction_is_repeatable() {
        let html = page(7);
        assert_eq!(extract(&html, 10), extract(&html, 10));
    }

    #[test]
    fn unmatched_document_is_empty_not_error() {
        let html = "<html><body><p>Nothing to see</p><a href=\"/x\">plain</a></body></html>";
        assert!(extract(html, 10).is_empty());
        assert!(extract("", 10).is_empty());
        assert!(extract("<<<not html at all", 10).is_empty());
    }

    #[test]
    fn falls_back_to_titles_when_snippets_missing() {
        let html = r#"
            <div class="result"><h2><a class="result__a" href="https://a.example/">Alpha</a></h2></div>
            <div class="result"><h2><a class="result__a" href="https://b.example/">Beta</a></h2></div>
        "#;
        let results = extract(html, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Alpha");
        assert_eq!(results[0].body, NO_SNIPPET);
        assert_eq!(results[1].href, "https://b.example/");
    }

    #[test]
    fn fallback_recovers_heading_links() {
        let html = r#"<h3><a href="//news.example/story">A story</a></h3>"#;
        let results = extract(html, 10);
        assert_eq!(
            results,
            vec![SearchResult {
                title: "A story".into(),
                href: "https://news.example/story".into(),
                body: NO_SNIPPET.into(),
            }]
        );
    }

    #[test]
    fn fallback_not_used_when_primary_matches() {
        let html = format!(
            "{}<h2><a href=\"https://other.example/\">Other</a></h2>",
            result_block(0)
        );
        let results = extract(&html, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Result 0");
    }

    #[test]
    fn title_without_snippet_is_skipped_in_primary_pass() {
        let html = r#"
            <a class="result__a" href="https://lonely.example/">Lonely</a>
            <a class="result__a" href="https://paired.example/">Paired</a>
            <div class="result__snippet">With snippet</div>
        "#;
        let results = extract(html, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Paired");
        assert_eq!(results[0].body, "With snippet");
    }

    #[test]
    fn entities_are_decoded() {
        let html = r#"<a class="result__a" href="https://x.example/">Tom &amp; Jerry</a>
                      <a class="result__snippet">&lt;cat&gt; &quot;mouse&quot;</a>"#;
        let results = extract(html, 10);
        assert_eq!(results[0].title, "Tom & Jerry");
        assert_eq!(results[0].body, "<cat> \"mouse\"");
    }

    #[test]
    fn protocol_relative_href_becomes_https() {
        assert_eq!(
            normalize_href("//example.com/x").as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn duckduckgo_redirects_are_unwrapped() {
        assert_eq!(
            normalize_href("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=abc")
                .as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(
            normalize_href("/l/?uddg=https%3A%2F%2Ftest.com").as_deref(),
            Some("https://test.com")
        );
    }

    #[test]
    fn non_web_hrefs_are_dropped() {
        assert_eq!(normalize_href("/relative/path"), None);
        assert_eq!(normalize_href("javascript:void(0)"), None);
        assert_eq!(normalize_href("mailto:someone@example.com"), None);
        assert_eq!(normalize_href(""), None);
    }

    #[test]
    fn results_with_unusable_href_are_skipped() {
        let html = r#"
            <a class="result__a" href="/local">Local</a><a class="result__snippet">x</a>
            <a class="result__a" href="https://ok.example/">Ok</a><a class="result__snippet">y</a>
        "#;
        let results = extract(html, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Ok");
    }
}
