//! Catalogue digest pipeline.
//!
//! 1. **Verify**: fetch the catalogue and ask the model whether it lists patch notes
//! 2. **Infer**: ask the model for patch-note and pagination selectors
//! 3. **Index**: walk the catalogue pages and collect patch note URLs
//! 4. **Summarize**: fetch and summarize the first `max_patch_notes` URLs
//!
//! Steps 1-3 abort the run on failure. Step 4 has partial-failure semantics:
//! each URL yields a [`PatchNoteEntry`], summarized or failed, and one bad
//! article never stops the others. Everything runs sequentially.

use crate::api::{AskAsync, InvocationRequest, Invoker};
use crate::error::DigestError;
use crate::models::{CatalogueVerdict, DigestReport, LinkSelectors, PatchNoteEntry, PatchNoteSummary};
use crate::prompts;
use crate::scrapers::catalogue::{CrawlOptions, collect_patch_note_links};
use crate::scrapers::{FetchPage, page_outline, page_text};
use crate::utils::{extract_json, looks_truncated, truncate_for_log};
use chrono::{Local, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Knobs for one digest run.
#[derive(Debug, Clone)]
pub struct DigestOptions {
    pub max_attempts: usize,
    pub token_budget: usize,
    pub max_pages: usize,
    pub page_delay: Duration,
    pub max_patch_notes: usize,
    /// Only summarize changes released on or after this date.
    pub since: Option<NaiveDate>,
}

/// Runs digests against one model backend and one page fetcher.
#[derive(Debug)]
pub struct Digester<A, F> {
    invoker: Invoker<A>,
    fetcher: F,
    options: DigestOptions,
}

impl<A, F> Digester<A, F>
where
    A: AskAsync<Response = String>,
    F: FetchPage,
{
    pub fn new(invoker: Invoker<A>, fetcher: F, options: DigestOptions) -> Self {
        Self {
            invoker,
            fetcher,
            options,
        }
    }

    pub fn invoker(&self) -> &Invoker<A> {
        &self.invoker
    }

    /// Digest the catalogue at `catalogue_url`.
    ///
    /// # Arguments
    ///
    /// * `catalogue_url` - The patch notes listing page
    /// * `reference_url` - A known patch note on the catalogue, used to anchor
    ///   selector inference
    ///
    /// # Returns
    ///
    /// A [`DigestReport`] with one entry per selected patch note, summarized
    /// or failed, plus how many patch note URLs the catalogue yielded.
    ///
    /// # Errors
    ///
    /// Aborts with a [`DigestError`] when either URL is invalid, the catalogue
    /// cannot be fetched, the model rejects it as a catalogue, its selector
    /// answer cannot be parsed or compiled, no patch note links are found, or a
    /// model call fails during verification or selector inference.
    #[instrument(level = "info", skip_all, fields(url = %catalogue_url))]
    pub async fn digest(
        &self,
        catalogue_url: &str,
        reference_url: Option<&str>,
    ) -> Result<DigestReport, DigestError> {
        let catalogue = parse_page_url(catalogue_url)?;
        let reference = reference_url.map(parse_page_url).transpose()?;

        let html = self.fetch(&catalogue).await?;

        let verdict: CatalogueVerdict = self
            .ask_json(prompts::verify_catalogue(&catalogue, &page_text(&html)))
            .await?;
        if !verdict.is_catalogue {
            warn!(reason = %verdict.reason, "Model says page is not a patch notes catalogue");
            return Err(DigestError::NotACatalogue {
                url: catalogue.to_string(),
                reason: verdict.reason,
            });
        }
        info!(reason = %verdict.reason, "Catalogue verified");

        let selectors: LinkSelectors = self
            .ask_json(prompts::infer_selectors(&catalogue, reference.as_ref(), &page_outline(&html)))
            .await?;
        info!(
            patch_note_selector = %selectors.patch_note_selector,
            pagination_selector = ?selectors.pagination_selector,
            "Selectors inferred"
        );
        let compiled = selectors.compile()?;

        let crawl = CrawlOptions {
            max_pages: self.options.max_pages,
            page_delay: self.options.page_delay,
        };
        let links = collect_patch_note_links(&self.fetcher, &catalogue, &html, &compiled, &crawl).await;
        if links.is_empty() {
            return Err(DigestError::NoPatchNotesFound {
                url: catalogue.to_string(),
            });
        }

        let urls_found = links.len();
        let selected: Vec<Url> = links.into_iter().take(self.options.max_patch_notes).collect();
        let patch_notes = self.summarize_all(selected).await;

        let report = DigestReport {
            catalogue_url: catalogue.to_string(),
            generated_at: Local::now().to_rfc3339(),
            urls_found,
            urls_processed: patch_notes.len(),
            patch_notes,
        };
        info!(
            urls_found = report.urls_found,
            urls_processed = report.urls_processed,
            summarized = report.summarized_count(),
            failed = report.failed_count(),
            "Digest complete"
        );
        Ok(report)
    }

    /// Summarize each URL in order; failures are recorded, not raised.
    #[instrument(level = "info", skip_all, fields(count = urls.len()))]
    pub async fn summarize_all(&self, urls: Vec<Url>) -> Vec<PatchNoteEntry> {
        stream::iter(urls)
            .then(|url| async move {
                match self.summarize(&url).await {
                    Ok(summary) => {
                        info!(%url, title = %summary.title, "Summarized patch note");
                        PatchNoteEntry::summarized(url, summary)
                    }
                    Err(e) => {
                        error!(%url, kind = e.kind(), error = %e, "Patch note failed");
                        PatchNoteEntry::failed(url, &e)
                    }
                }
            })
            .collect()
            .await
    }

    async fn summarize(&self, url: &Url) -> Result<PatchNoteSummary, DigestError> {
        let html = self.fetch(url).await?;
        let prompt = prompts::summarize_patch_note(url, &page_text(&html), self.options.since);
        self.ask_json(prompt).await
    }

    async fn fetch(&self, url: &Url) -> Result<String, DigestError> {
        self.fetcher
            .fetch(url.as_str())
            .await
            .map_err(|e| DigestError::FetchFailed {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    /// Ask the model and read a JSON object out of its answer.
    ///
    /// A response cut off mid-document is re-asked once.
    async fn ask_json<T: DeserializeOwned>(&self, prompt: String) -> Result<T, DigestError> {
        let request = InvocationRequest::new(prompt)
            .with_max_attempts(self.options.max_attempts)
            .with_token_budget(self.options.token_budget);

        let mut raw = self.invoker.invoke(request.clone()).await?;
        let mut parsed = extract_json::<T>(&raw);

        if let Err(ref e) = parsed {
            if looks_truncated(e) {
                warn!(error = %e, "EOF while parsing; re-asking once");
                raw = self.invoker.invoke(request).await?;
                parsed = extract_json::<T>(&raw);
            }
        }

        parsed.map_err(|e| {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&raw, 300),
                "Model returned non-conforming JSON"
            );
            DigestError::ParseFailed {
                reason: e.to_string(),
                raw,
            }
        })
    }
}

fn parse_page_url(raw: &str) -> Result<Url, DigestError> {
    let url = Url::parse(raw.trim()).map_err(|e| DigestError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DigestError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    Ok(url)
}
