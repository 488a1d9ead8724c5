//! JSON output generation for the API.
//!
//! # Output Structure
//!
//! Reports are organized by the local date of the run, one file per
//! catalogue host:
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     └── www-leagueoflegends-com.json
//! ```
//!
//! A second run on the same day for the same catalogue replaces the file.

use super::report_stem;
use crate::models::DigestReport;
use chrono::Local;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write a [`DigestReport`] to `{json_output_dir}/{date}/{host}.json`.
///
/// Returns the path written.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(
    report: &DigestReport,
    json_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    let local_date = Local::now().date_naive().to_string();
    let full_json_dir = PathBuf::from(json_output_dir).join(local_date);

    info!(full_json_dir = %full_json_dir.display(), "Ensuring JSON directory exists");
    if let Err(e) = fs::create_dir_all(&full_json_dir).await {
        error!(full_json_dir = %full_json_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let output_json_filename = full_json_dir.join(format!("{}.json", report_stem(report)));
    info!(path = %output_json_filename.display(), "Writing JSON");
    fs::write(&output_json_filename, json).await?;
    info!(path = %output_json_filename.display(), "Wrote JSON report");

    Ok(output_json_filename)
}
