//! Web browsing tool: search, scrape, return raw content.

use futures::future::join_all;
use serde::Serialize;

use super::ToolOutput;
use crate::events::EventSink;
use crate::web::{SearchHit, WebResearch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapedPage {
    pub title: String,
    pub url: String,
    pub content: String,
}

/// Sources found and the pages that could be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseResult {
    pub sources: Vec<SearchHit>,
    #[serde(rename = "scrapedContent")]
    pub scraped_content: Vec<ScrapedPage>,
}

pub async fn browse_internet(
    web: &dyn WebResearch,
    sink: &EventSink,
    query: &str,
    max_results: usize,
    max_chars: usize,
) -> ToolOutput {
    sink.status("Searching the web...");
    let sources = match web.search(query, max_results).await {
        Ok(hits) => hits.into_iter().take(max_results).collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("Web search failed: {e}");
            return ToolOutput::error(format!("Failed to browse the internet: {e}"));
        }
    };

    if !sources.is_empty() {
        sink.status(format!("Reading {} sources...", sources.len()));
    }
    let pages = join_all(sources.iter().map(|hit| async move {
        match web.read(&hit.url).await {
            Ok(text) => {
                let content = clean_scraped(&text, max_chars);
                (!content.is_empty()).then(|| ScrapedPage {
                    title: hit.title.clone(),
                    url: hit.url.clone(),
                    content,
                })
            }
            Err(e) => {
                tracing::debug!(url = %hit.url, "Skipping source: {e}");
                None
            }
        }
    }))
    .await;

    ToolOutput::Browse(BrowseResult {
        sources,
        scraped_content: pages.into_iter().flatten().collect(),
    })
}

/// Collapse whitespace and cap the length in characters.
pub fn clean_scraped(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}
