//! CSV export of search results.

use crate::search::SearchResult;
use anyhow::{Context, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use chrono::NaiveDate;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EXPORT_HEADER: [&str; 3] = ["serial_number", "insurance_status", "found"];

/// Status column of an exported row.
pub fn status_label(result: &SearchResult) -> &'static str {
    match (result.found, result.is_insurance) {
        (true, true) => "subscribed",
        (true, false) => "not subscribed",
        (false, _) => "not found",
    }
}

fn found_marker(result: &SearchResult) -> &'static str {
    if result.found { "○" } else { "×" }
}

/// Render results as BOM-prefixed CSV. `None` when there is nothing to export.
pub fn render_csv(results: &[SearchResult]) -> Result<Option<String>> {
    if results.is_empty() {
        return Ok(None);
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;
    for result in results {
        writer.write_record([
            result.serial_number.as_str(),
            status_label(result),
            found_marker(result),
        ])?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    let body = String::from_utf8(bytes).context("CSV output was not UTF-8")?;

    Ok(Some(format!("\u{feff}{body}")))
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("search_results_{}.csv", date.format("%Y-%m-%d"))
}

/// Write results into `dir` as `search_results_<date>.csv`.
///
/// Returns the written path, or `None` (and writes nothing) when `results` is empty.
pub fn export_results(
    results: &[SearchResult],
    dir: &Path,
    date: NaiveDate,
) -> Result<Option<PathBuf>> {
    let Some(content) = render_csv(results)? else {
        log::debug!("No results to export");
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(export_file_name(date));
    AtomicFile::new(&path, OverwriteBehavior::AllowOverwrite)
        .write(|f| f.write_all(content.as_bytes()))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    log::debug!("Exported {} results to {}", results.len(), path.display());
    Ok(Some(path))
}

/// Export using today's local date.
pub fn export_results_today(results: &[SearchResult], dir: &Path) -> Result<Option<PathBuf>> {
    export_results(results, dir, chrono::Local::now().date_naive())
}
