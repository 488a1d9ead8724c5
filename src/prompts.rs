//! Prompt builders for the three questions asked of the model.
//!
//! Each prompt that expects structured output names the exact JSON shape;
//! responses are read back through [`crate::utils::extract_json`].

use chrono::NaiveDate;
use url::Url;

/// Is the page a catalogue of patch notes?
///
/// Expects `{"is_catalogue": bool, "reason": string}`.
pub fn verify_catalogue(url: &Url, page_text: &str) -> String {
    format!(
        r#"You are inspecting a web page to decide whether it is a catalogue of product patch notes:
a listing page whose main content links to several individual patch notes, release notes,
changelogs or game update articles.

Page URL: {url}

Respond with a single JSON object and nothing else:
{{"is_catalogue": true or false, "reason": "one short sentence"}}

Page text:
{page_text}"#
    )
}

/// Which CSS selectors find patch note links and pagination links?
///
/// Expects `{"patch_note_selector": string, "pagination_selector": string|null}`.
pub fn infer_selectors(url: &Url, reference: Option<&Url>, outline: &str) -> String {
    let reference_hint = match reference {
        Some(reference) => format!(
            "\nOne known patch note on this catalogue is {reference}. The selector must match \
             the link to it and the links to its sibling patch notes.\n"
        ),
        None => String::new(),
    };
    format!(
        r#"Below is every link on a patch notes catalogue page, one per line, written as
"ancestor > ancestor > a.class href="..." text="..."".

Catalogue URL: {url}
{reference_hint}
Produce CSS selectors (as understood by a standard CSS selector engine) that:
1. patch_note_selector: matches the links to individual patch note articles and nothing else
   (no navigation, footer, social or category links).
2. pagination_selector: matches the link to the next (older) page of the catalogue, or null
   if the catalogue is not paginated.

Respond with a single JSON object and nothing else:
{{"patch_note_selector": "...", "pagination_selector": "..." or null}}

Links:
{outline}"#
    )
}

/// Summarize one patch note.
///
/// Expects `{"title": string, "version": string|null, "date": string|null, "summary": string}`.
pub fn summarize_patch_note(url: &Url, page_text: &str, since: Option<NaiveDate>) -> String {
    let since_hint = match since {
        Some(date) => format!("Only cover changes released on or after {date}; say so if there are none.\n"),
        None => String::new(),
    };
    format!(
        r#"You are a helpful assistant that summarizes product updates and patch notes.
Focus on key changes, additions, removals, and fixes. Be concise and clear.
{since_hint}
Respond with a single JSON object and nothing else:
{{"title": "patch note title", "version": "version label or null", "date": "release date or null",
 "summary": "Markdown summary using '*' bullet points, nested by four spaces"}}

Patch note URL: {url}

Patch note text:
{page_text}"#
    )
}
