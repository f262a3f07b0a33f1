use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use sncheck_api::config::MAX_CONCURRENCY;
use sncheck_api::terms::import_file;
use sncheck_api::{
    Config, MAX_TERMS, OrganizationSettings, QueryTermList, SearchOptions, SearchResult,
    SearchStats, export_results_today, parse_bulk_text, search_serial_numbers,
};

use crate::auth::require_session;

#[derive(ValueEnum, Debug, Clone, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Args, Debug, Clone)]
#[command(about = "Look up the insurance status of serial numbers")]
pub struct SearchArgs {
    /// Serial numbers (commas also separate terms)
    #[arg(value_name = "SERIAL")]
    pub terms: Vec<String>,

    /// Newline- or comma-separated serial numbers
    #[arg(long, value_name = "TEXT")]
    pub bulk: Option<String>,

    /// Read serial numbers from the first column of a CSV or text file
    #[arg(long, value_name = "PATH", value_hint = clap::ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Write results to DIR/search_results_<date>.csv
    #[arg(long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    pub export: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Number of lookups to run at once
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_CONCURRENCY as u64))]
    pub concurrency: Option<u64>,
}

/// Positional terms, then `--bulk`, then `--file`, capped as one list.
fn collect_terms(args: &SearchArgs) -> Result<QueryTermList> {
    let mut terms: Vec<String> = parse_bulk_text(&args.terms.join("\n")).into_inner();
    if let Some(bulk) = &args.bulk {
        terms.extend(parse_bulk_text(bulk).into_inner());
    }
    if let Some(path) = &args.file {
        terms.extend(import_file(path)?.into_inner());
    }

    if terms.len() > MAX_TERMS {
        log::warn!(
            "{} serial numbers given, only the first {} are looked up",
            terms.len(),
            MAX_TERMS
        );
    }
    let terms = QueryTermList::from_terms(terms);
    if terms.is_empty() {
        bail!("No serial numbers given. Pass them as arguments, with --bulk or with --file.");
    }
    Ok(terms)
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    results: &'a [SearchResult],
    stats: SearchStats,
}

pub fn execute(args: SearchArgs, config: &Config) -> Result<()> {
    let terms = collect_terms(&args)?;
    let session = require_session(config)?;
    let store = session.store(config)?;

    let settings = OrganizationSettings::fetch(&store);
    if let Some(notice) = settings.maintenance_notice() {
        eprintln!("{} {}", "Warning:".yellow().bold(), notice);
    }

    let options = SearchOptions {
        concurrency: args
            .concurrency
            .map(|c| c as usize)
            .unwrap_or(config.concurrency),
    };

    let progress = if io::stderr().is_terminal() {
        ProgressBar::new(terms.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner} Looking up {pos}/{len} {wide_bar}")
            .context("Invalid progress template")?,
    );
    let results = search_serial_numbers(&store, &terms[..], options, &|| progress.inc(1))?;
    progress.finish_and_clear();

    let stats = SearchStats::from_results(&results);
    let mut writer = io::stdout().lock();
    match args.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &SearchOutput {
                results: &results,
                stats,
            })?;
            writeln!(writer)?;
        }
        OutputFormat::Table => {
            write_results_table(&results, &mut writer)?;
            write_stats(&stats, &mut writer)?;
        }
    }

    if let Some(dir) = &args.export {
        match export_results_today(&results, dir)? {
            Some(path) => eprintln!("{} Exported to {}", "✓".green(), path.display()),
            None => eprintln!("Nothing to export"),
        }
    }

    Ok(())
}

fn status_cell(result: &SearchResult) -> Cell {
    let cell = Cell::new(result.display_status());
    if result.error.is_some() {
        cell.fg(Color::Red)
    } else if !result.found {
        cell.fg(Color::DarkGrey)
    } else if result.is_insurance {
        cell.fg(Color::Green)
    } else {
        cell.fg(Color::Yellow)
    }
}

fn write_results_table<W: Write>(results: &[SearchResult], mut writer: W) -> io::Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Serial number", "Status", "Detail"]);

    for (index, result) in results.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(&result.serial_number),
            status_cell(result),
            Cell::new(result.error.as_deref().unwrap_or("")),
        ]);
    }

    writeln!(writer, "{table}")
}

fn write_stats<W: Write>(stats: &SearchStats, mut writer: W) -> io::Result<()> {
    writeln!(
        writer,
        "{} searched, {} found ({}%), {} subscribed / {} not subscribed ({}% of found), {} not found",
        stats.total,
        stats.found,
        stats.found_rate(),
        stats.insured,
        stats.not_insured,
        stats.insured_rate(),
        stats.not_found
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(terms: &[&str]) -> SearchArgs {
        SearchArgs {
            terms: terms.iter().map(|t| t.to_string()).collect(),
            bulk: None,
            file: None,
            export: None,
            format: OutputFormat::Table,
            concurrency: None,
        }
    }

    #[test]
    fn test_collect_terms_merges_sources_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serials.csv");
        std::fs::write(&path, "F1,x\nF2,y\n").unwrap();

        let mut a = args(&["A1,A2", " A3 "]);
        a.bulk = Some("B1\nB2".to_string());
        a.file = Some(path);

        let terms = collect_terms(&a).unwrap();
        assert_eq!(&*terms, ["A1", "A2", "A3", "B1", "B2", "F1", "F2"]);
    }

    #[test]
    fn test_collect_terms_caps_total() {
        let many: Vec<String> = (0..150).map(|i| format!("SN{i}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let terms = collect_terms(&args(&refs)).unwrap();
        assert_eq!(terms.len(), MAX_TERMS);
        assert_eq!(terms[99], "SN99");
    }

    #[test]
    fn test_collect_terms_requires_input() {
        assert!(collect_terms(&args(&[" ", ","])).is_err());
    }

    #[test]
    fn test_stats_line() {
        let results = vec![
            SearchResult::found("A", true),
            SearchResult::found("B", false),
            SearchResult::not_found("C"),
        ];
        let mut out = Vec::new();
        write_stats(&SearchStats::from_results(&results), &mut out).unwrap();
        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @"3 searched, 2 found (67%), 1 subscribed / 1 not subscribed (50% of found), 1 not found");
    }
}
