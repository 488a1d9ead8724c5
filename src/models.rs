//! Data models for model verdicts, patch note summaries and digest reports.
//!
//! - [`CatalogueVerdict`] / [`LinkSelectors`]: structured answers requested
//!   from the model about a catalogue page
//! - [`PatchNoteSummary`]: the model's summary of one patch note
//! - [`PatchNoteEntry`]: per-URL result, either a summary or a classified
//!   failure
//! - [`DigestReport`]: everything one run produced
//! - [`ErrorBody`]: the structured error handed to the outer layer

use crate::error::DigestError;
use scraper::Selector;
use serde::{Deserialize, Serialize};

/// The model's answer to "is this page a patch notes catalogue?".
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CatalogueVerdict {
    pub is_catalogue: bool,
    #[serde(default)]
    pub reason: String,
}

/// CSS selectors the model inferred for a catalogue page.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LinkSelectors {
    /// Matches the anchors that point at individual patch notes.
    pub patch_note_selector: String,
    /// Matches "next page" style anchors, if the catalogue is paginated.
    #[serde(default)]
    pub pagination_selector: Option<String>,
}

/// [`LinkSelectors`] after successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub patch_note: Selector,
    pub pagination: Option<Selector>,
}

impl LinkSelectors {
    /// Compile both selectors; a selector the engine rejects is a parse
    /// failure of the model's answer.
    pub fn compile(&self) -> Result<CompiledSelectors, DigestError> {
        let patch_note = parse_selector(&self.patch_note_selector)?;
        let pagination = match self.pagination_selector.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_selector(s)?),
            _ => None,
        };
        Ok(CompiledSelectors {
            patch_note,
            pagination,
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector, DigestError> {
    Selector::parse(selector).map_err(|e| DigestError::ParseFailed {
        reason: format!("invalid CSS selector `{selector}`: {e}"),
        raw: selector.to_string(),
    })
}

/// The model's summary of a single patch note.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PatchNoteSummary {
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    /// Markdown body.
    pub summary: String,
}

impl PatchNoteSummary {
    /// `"{title} ({date}) - {version}"`, omitting the parts that are missing.
    pub fn display_title(&self) -> String {
        let mut title = if self.title.trim().is_empty() {
            "Patch Notes Summary".to_string()
        } else {
            self.title.trim().to_string()
        };
        if let Some(date) = self.date.as_deref().filter(|d| !d.trim().is_empty()) {
            title.push_str(&format!(" ({})", date.trim()));
        }
        if let Some(version) = self.version.as_deref().filter(|v| !v.trim().is_empty()) {
            title.push_str(&format!(" - {}", version.trim()));
        }
        title
    }
}

/// Result for one patch note URL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Summarized(PatchNoteSummary),
    Failed {
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PatchNoteEntry {
    pub url: String,
    #[serde(flatten)]
    pub outcome: EntryOutcome,
}

impl PatchNoteEntry {
    pub fn summarized(url: impl Into<String>, summary: PatchNoteSummary) -> Self {
        Self {
            url: url.into(),
            outcome: EntryOutcome::Summarized(summary),
        }
    }

    pub fn failed(url: impl Into<String>, error: &DigestError) -> Self {
        Self {
            url: url.into(),
            outcome: EntryOutcome::Failed {
                kind: error.kind().to_string(),
                message: error.to_string(),
                raw_response: error.raw_response().map(str::to_string),
            },
        }
    }

    pub fn summary(&self) -> Option<&PatchNoteSummary> {
        match &self.outcome {
            EntryOutcome::Summarized(summary) => Some(summary),
            EntryOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<&str> {
        match &self.outcome {
            EntryOutcome::Failed { kind, .. } => Some(kind),
            EntryOutcome::Summarized(_) => None,
        }
    }
}

/// Everything a digest run produced for one catalogue.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DigestReport {
    pub catalogue_url: String,
    /// RFC 3339 local timestamp of when the report was assembled.
    pub generated_at: String,
    /// Distinct patch note links found across the walked pages.
    pub urls_found: usize,
    /// Links that were fetched and summarized (or failed trying).
    pub urls_processed: usize,
    pub patch_notes: Vec<PatchNoteEntry>,
}

impl DigestReport {
    pub fn summarized_count(&self) -> usize {
        self.patch_notes.iter().filter(|e| e.summary().is_some()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.patch_notes.len() - self.summarized_count()
    }
}

/// Structured error body for a run that could not produce a report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl From<&DigestError> for ErrorBody {
    fn from(error: &DigestError) -> Self {
        Self {
            error: error.to_string(),
            kind: error.kind().to_string(),
            retry_after_secs: error.retry_after_secs(),
            raw_response: error.raw_response().map(str::to_string),
        }
    }
}
