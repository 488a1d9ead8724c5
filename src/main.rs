//! # Patch Digest
//!
//! Finds the patch notes listed on a changelog catalogue page and summarizes
//! each one with a Gemini model, staying inside per-minute and per-day call
//! ceilings.
//!
//! ## Usage
//!
//! ```sh
//! GEMINI_API_KEY=... patch_digest --url https://example.com/patch-notes -n 5 -m ./digests
//! ```
//!
//! ## Architecture
//!
//! 1. **Verify**: ask the model whether the page is a patch notes catalogue
//! 2. **Infer**: ask the model for CSS selectors for patch note and pagination links
//! 3. **Index**: walk up to `max_pages` catalogue pages collecting patch note URLs
//! 4. **Summarize**: fetch and summarize each selected patch note, one at a time
//! 5. **Output**: print the JSON report; optionally write JSON and Markdown files
//!
//! Every model call goes through [`api::Invoker`], which consults the
//! process-wide [`governor::SharedGovernor`] before each attempt.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod budget;
mod cli;
mod config;
mod digest;
mod error;
mod governor;
mod models;
mod outputs;
mod prompts;
mod scrapers;
mod utils;

use api::{GeminiClient, Invoker};
use cli::Cli;
use config::Settings;
use digest::Digester;
use error::ConfigError;
use governor::SharedGovernor;
use models::ErrorBody;
use outputs::{json, markdown};
use scrapers::HttpFetcher;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("patch_digest starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(url = %args.url, reference_url = ?args.reference_url, "Parsed CLI arguments");

    // ---- Settings ----
    let settings = Settings::load(args.config.as_deref())?.apply_cli(&args);
    if let Err(e) = settings.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }
    let Some(api_key) = args.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        error!("No Gemini API key configured");
        return Err(ConfigError::MissingApiKey.into());
    };
    info!(
        model = %settings.model,
        calls_per_minute = settings.calls_per_minute,
        calls_per_day = settings.calls_per_day,
        max_patch_notes = settings.max_patch_notes,
        max_pages = settings.max_pages,
        "Settings resolved"
    );

    // Early check: ensure output dirs are writable
    for dir in [&args.json_output_dir, &args.markdown_output_dir].into_iter().flatten() {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Output directory is not writable (fix perms or choose a different path)");
            return Err(e);
        }
    }

    // ---- Wire the pipeline ----
    let client = GeminiClient::new(
        &settings.api_base,
        &settings.model,
        api_key,
        settings.request_timeout(),
    )?;
    let governor = SharedGovernor::new(settings.governor_limits());
    let invoker = Invoker::new(client, governor, settings.retry_backoff());
    let fetcher = HttpFetcher::new(settings.request_timeout())?;
    let digester = Digester::new(invoker, fetcher, settings.digest_options(args.since));

    // ---- Digest ----
    let report = match digester.digest(&args.url, args.reference_url.as_deref()).await {
        Ok(report) => report,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Digest failed");
            println!("{}", serde_json::to_string_pretty(&ErrorBody::from(&e))?);
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    // ---- Outputs ----
    if let Some(dir) = &args.json_output_dir {
        if let Err(e) = json::write_report(&report, dir).await {
            error!(error = %e, "Failed to write JSON report");
        }
    }
    if let Some(dir) = &args.markdown_output_dir {
        if let Err(e) = markdown::write_report(&report, dir).await {
            error!(error = %e, "Failed to write Markdown digest");
        }
    }

    if report.failed_count() > 0 {
        warn!(failed = report.failed_count(), "Some patch notes could not be summarized");
    }

    let calls = digester.invoker().governor().snapshot();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        summarized = report.summarized_count(),
        model_calls = calls.day_calls,
        model_calls_last_minute = calls.minute_calls,
        "Execution complete"
    );

    Ok(())
}
