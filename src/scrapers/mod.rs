//! Page fetching and HTML reduction for catalogue and patch note pages.
//!
//! Scraping follows a two-phase pattern:
//!
//! 1. **Indexing** ([`catalogue`]): apply model-inferred selectors to a
//!    catalogue page, follow pagination, and collect patch note URLs
//! 2. **Fetching**: download each patch note and reduce it to plain text for
//!    the summarization prompt
//!
//! Pages are fetched through the [`FetchPage`] trait so the pipeline can run
//! against canned HTML in tests.

pub mod catalogue;

use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use std::error::Error;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; patch_digest/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Upper bound on anchors listed in a page outline.
const MAX_OUTLINE_LINKS: usize = 400;

pub(crate) static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Anything that can turn a URL into raw HTML.
pub trait FetchPage {
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

/// [`FetchPage`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl FetchPage for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Page fetch returned error status");
            return Err(format!("HTTP {}", status.as_u16()).into());
        }
        let body = response.text().await?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

/// Visible text of an HTML document, one trimmed chunk per line.
///
/// Script, style and similar elements are skipped; blank lines are dropped.
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    raw.lines()
        .flat_map(|line| line.split("  "))
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    if is_hidden(element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                    if is_block(child.value().name()) {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Elements whose text is never shown to a reader.
fn is_hidden(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript" | "template" | "svg" | "head")
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div" | "br" | "li" | "ul" | "ol" | "tr" | "table" | "section" | "article"
            | "header" | "footer" | "nav" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre"
            | "blockquote"
    )
}

/// Compact listing of the page's anchors for the selector-inference prompt.
///
/// One line per anchor: the ancestor chain (tag plus classes, outermost
/// first, at most three levels), the anchor's own classes, its `href`, and
/// its collapsed text.
pub fn page_outline(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .take(MAX_OUTLINE_LINKS)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let text = anchor.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let mut line = ancestor_path(anchor);
            if !line.is_empty() {
                line.push_str(" > ");
            }
            line.push_str(&format!("{} href=\"{}\" text=\"{}\"", describe(anchor), href, text));
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn ancestor_path(element: ElementRef<'_>) -> String {
    let mut path: Vec<String> = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|e| !matches!(e.value().name(), "html" | "body"))
        .take(3)
        .map(describe)
        .collect();
    path.reverse();
    path.join(" > ")
}

fn describe(element: ElementRef<'_>) -> String {
    let mut out = element.value().name().to_string();
    for class in element.value().classes() {
        out.push('.');
        out.push_str(class);
    }
    out
}
