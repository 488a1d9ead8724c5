//! Helpers for model-response parsing, log previews and output directories.
//!
//! - JSON extraction from free-form model text (fenced or bare)
//! - EOF detection for JSON cut off mid-document
//! - Log-safe string truncation and filename slugs
//! - Output directory validation

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// A fenced code block, optionally tagged `json`.
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and the number of dropped bytes appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// A model that runs out of output tokens leaves the document unterminated,
/// which serde reports as an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Pick the JSON candidate out of a model response.
///
/// In order of preference: the body of the first fenced code block, the span
/// from the first `{` to the last `}` (or to the end when unterminated), the
/// trimmed text itself.
pub fn json_candidate(text: &str) -> &str {
    if let Some(body) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        // Unterminated object; keep it so the EOF shows up as truncation.
        (Some(start), _) => text[start..].trim_end(),
        _ => text.trim(),
    }
}

/// Deserialize the JSON object embedded in a model response.
///
/// # Arguments
///
/// * `text` - Raw model output, optionally wrapped in prose or a code fence
///
/// # Returns
///
/// The parsed value, or the `serde_json` error for the candidate picked by
/// [`json_candidate`]. Check it with [`looks_truncated`] to tell a cut-off
/// answer from a malformed one.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(json_candidate(text))
}

/// Convert a title or host name to a filename-friendly slug.
///
/// ```ignore
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("www.leagueoflegends.com"), "www-leagueoflegends-com");
/// ```
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .replace('.', " ")
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then writes and removes a probe
/// file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
