//! Markdown rendering of a digest report.
//!
//! Each summarized patch note becomes a section titled
//! `"{title} ({date}) - {version}"` followed by its summary and a link back
//! to the original. Failed entries are listed at the end with their failure
//! kind.

use super::report_stem;
use crate::models::{DigestReport, EntryOutcome};
use chrono::Local;
use std::error::Error;
use std::fmt::Write;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, instrument};

/// Re-indent `*` bullets to multiples of four spaces.
///
/// Models nest bullets with arbitrary indentation; Markdown renderers need
/// four spaces per level. Partial levels round down.
pub fn normalize_bullets(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with('*') {
                let level = (line.len() - trimmed.len()) / 4;
                format!("{}{}", " ".repeat(level * 4), trimmed.trim_end())
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the full Markdown digest for a report.
pub fn report_to_markdown(report: &DigestReport) -> String {
    let mut md = String::new();

    let _ = writeln!(md, "# Patch notes digest\n");
    let _ = writeln!(md, "- Catalogue: <{}>", report.catalogue_url);
    let _ = writeln!(md, "- Generated: {}", report.generated_at);
    let _ = writeln!(
        md,
        "- Patch notes found: {}, processed: {}\n",
        report.urls_found, report.urls_processed
    );

    for entry in &report.patch_notes {
        if let EntryOutcome::Summarized(summary) = &entry.outcome {
            let _ = writeln!(md, "## {}\n", summary.display_title());
            let _ = writeln!(md, "{}\n", normalize_bullets(summary.summary.trim()));
            let _ = writeln!(md, "[View original]({})\n", entry.url);
        }
    }

    let failures: Vec<_> = report
        .patch_notes
        .iter()
        .filter_map(|entry| match &entry.outcome {
            EntryOutcome::Failed { kind, message, .. } => Some((entry, kind, message)),
            EntryOutcome::Summarized(_) => None,
        })
        .collect();

    if !failures.is_empty() {
        let _ = writeln!(md, "## Not summarized\n");
        for (entry, kind, message) in failures {
            let _ = writeln!(md, "- <{}>: `{}` {}", entry.url, kind, message);
        }
    }

    md
}

/// Write the Markdown digest to `{markdown_output_dir}/{date}_{host}.md`.
#[instrument(level = "info", skip_all, fields(%markdown_output_dir))]
pub async fn write_report(
    report: &DigestReport,
    markdown_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let md = report_to_markdown(report);
    let filename = format!(
        "{}_{}.md",
        Local::now().date_naive(),
        report_stem(report)
    );
    let path = PathBuf::from(markdown_output_dir).join(filename);

    info!(path = %path.display(), "Writing Markdown");
    fs::write(&path, md).await?;
    info!(path = %path.display(), "Wrote Markdown digest");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::tests::sample_report;

    #[test]
    fn test_normalize_bullets() {
        let text = "Intro\n* Top\n    * Nested\n      * Deeper\n  * Shallow";
        assert_eq!(
            normalize_bullets(text),
            "Intro\n* Top\n    * Nested\n    * Deeper\n* Shallow"
        );
    }

    #[test]
    fn test_report_to_markdown() {
        let md = report_to_markdown(&sample_report());
        assert!(md.starts_with("# Patch notes digest\n"));
        assert!(md.contains("- Patch notes found: 14, processed: 2"));
        assert!(md.contains("## Patch 25.09 Notes (2025-04-29) - 25.09\n"));
        assert!(md.contains("* Champion changes\n* Buffed Ahri\n* Fixed crash on load"));
        assert!(md.contains(
            "[View original](https://www.leagueoflegends.com/en-us/news/game-updates/patch-25-09-notes/)"
        ));
        assert!(md.contains("## Not summarized"));
        assert!(md.contains("`fetch-failed`"));
    }

    #[test]
    fn test_no_failure_section_when_all_succeed() {
        let mut report = sample_report();
        report.patch_notes.truncate(1);
        assert!(!report_to_markdown(&report).contains("Not summarized"));
    }

    #[tokio::test]
    async fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&sample_report(), dir.path().to_str().unwrap())
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.ends_with("_www-leagueoflegends-com.md"));
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("Patch 25.09 Notes"));
    }
}
