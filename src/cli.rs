//! Command-line interface definitions for Patch Digest.
//!
//! All arguments can be provided via command-line flags; secrets and model
//! selection can also come from environment variables.

use chrono::NaiveDate;
use clap::Parser;

/// Command-line arguments for the Patch Digest application.
///
/// # Examples
///
/// ```sh
/// # Summarize the three newest patch notes on a catalogue page
/// GEMINI_API_KEY=... patch_digest --url https://www.leagueoflegends.com/en-us/news/tags/patch-notes/
///
/// # Anchor selector inference with a known patch note and keep Markdown output
/// patch_digest -u https://example.com/updates -r https://example.com/updates/1-4 -m ./digests
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Patch notes catalogue URL
    #[arg(short, long)]
    pub url: String,

    /// A known patch note on the catalogue, used to anchor selector inference
    #[arg(short, long)]
    pub reference_url: Option<String>,

    /// How many patch notes to summarize (1-10)
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_patch_notes: Option<u8>,

    /// Only summarize changes released on or after this date (YYYY-MM-DD)
    #[arg(short, long)]
    pub since: Option<NaiveDate>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL")]
    pub model: Option<String>,

    /// Maximum catalogue pages to walk
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Model calls allowed per minute
    #[arg(long)]
    pub calls_per_minute: Option<usize>,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output directory for the JSON report
    #[arg(short, long)]
    pub json_output_dir: Option<String>,

    /// Output directory for the Markdown digest
    #[arg(short, long)]
    pub markdown_output_dir: Option<String>,
}
