//! Patch note link collection from a catalogue page and its pagination.
//!
//! Selectors come from the model, so extraction is tolerant: a selector may
//! match the anchor itself or a container holding it, relative `href`s are
//! resolved against the page they appear on, and anything that isn't
//! http(s) is dropped.

use super::{ANCHOR_SELECTOR, FetchPage};
use crate::models::CompiledSelectors;
use itertools::Itertools;
use rand::{Rng, rng};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// How far and how politely to walk a paginated catalogue.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Total catalogue pages to read, the first one included.
    pub max_pages: usize,
    /// Pause before each additional page fetch (plus up to 250ms jitter).
    pub page_delay: Duration,
}

/// Patch note URLs on one page, in document order, deduplicated.
pub fn extract_links(html: &str, page_url: &Url, selector: &Selector) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(link_target)
        .filter_map(|href| resolve(page_url, href))
        .unique()
        .collect()
}

/// The `href` of an element, or of the first anchor inside it.
fn link_target(element: ElementRef<'_>) -> Option<&str> {
    element.value().attr("href").or_else(|| {
        element
            .select(&ANCHOR_SELECTOR)
            .next()
            .and_then(|a| a.value().attr("href"))
    })
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// First pagination target on the page that hasn't been visited yet.
fn next_page(
    html: &str,
    page_url: &Url,
    selectors: &CompiledSelectors,
    visited: &HashSet<Url>,
) -> Option<Url> {
    let selector = selectors.pagination.as_ref()?;
    extract_links(html, page_url, selector)
        .into_iter()
        .find(|candidate| !visited.contains(candidate))
}

/// Walk the catalogue from its already-fetched first page and collect every
/// patch note link, following pagination for at most `max_pages` pages.
///
/// A pagination page that fails to load ends the walk; links gathered so far
/// are kept.
#[instrument(level = "info", skip_all, fields(start = %start_url, max_pages = options.max_pages))]
pub async fn collect_patch_note_links<F: FetchPage>(
    fetcher: &F,
    start_url: &Url,
    first_page_html: &str,
    selectors: &CompiledSelectors,
    options: &CrawlOptions,
) -> Vec<Url> {
    let mut visited: HashSet<Url> = HashSet::from([start_url.clone()]);
    let mut links = extract_links(first_page_html, start_url, &selectors.patch_note);
    let mut next = next_page(first_page_html, start_url, selectors, &visited);
    let mut pages = 1usize;
    debug!(page = pages, found = links.len(), "Indexed catalogue page");

    while pages < options.max_pages {
        let Some(page_url) = next.take() else {
            break;
        };
        let jitter_ms: u64 = rng().random_range(0..=250);
        sleep(options.page_delay + Duration::from_millis(jitter_ms)).await;

        visited.insert(page_url.clone());
        let html = match fetcher.fetch(page_url.as_str()).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %page_url, error = %e, "Pagination fetch failed; keeping links found so far");
                break;
            }
        };
        pages += 1;

        let found = extract_links(&html, &page_url, &selectors.patch_note);
        debug!(page = pages, url = %page_url, found = found.len(), "Indexed catalogue page");
        links.extend(found);
        next = next_page(&html, &page_url, selectors, &visited);
    }

    let links: Vec<Url> = links
        .into_iter()
        .filter(|link| !visited.contains(link))
        .unique()
        .collect();
    info!(pages, count = links.len(), "Collected patch note URLs");
    links
}
