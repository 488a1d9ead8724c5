//! Output generation for digest reports.
//!
//! # Submodules
//!
//! - [`json`]: writes the [`DigestReport`](crate::models::DigestReport) as a
//!   JSON file for API consumption
//! - [`markdown`]: renders the report as a readable Markdown digest
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     └── www-leagueoflegends-com.json
//!
//! markdown_output_dir/
//! └── 2025-05-06_www-leagueoflegends-com.md
//! ```

pub mod json;
pub mod markdown;

use crate::models::DigestReport;
use crate::utils::slugify;
use url::Url;

/// Filename stem for a report: the slugged catalogue host.
pub fn report_stem(report: &DigestReport) -> String {
    Url::parse(&report.catalogue_url)
        .ok()
        .and_then(|url| url.host_str().map(slugify))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "catalogue".to_string())
}
