use anyhow::Result;
use clap::Args;
use colored::Colorize;
use sncheck_api::suggest::{MIN_QUERY_CHARS, should_fetch};
use sncheck_api::{Config, fetch_suggestions};

use crate::auth::require_session;
use crate::search::OutputFormat;

#[derive(Args, Debug)]
#[command(about = "List serial numbers containing a fragment")]
pub struct SuggestArgs {
    /// Fragment of a serial number (at least two characters)
    pub query: String,

    /// Output format
    #[arg(short, long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

pub fn execute(args: SuggestArgs, config: &Config) -> Result<()> {
    let query = args.query.trim();
    if !should_fetch(query, true) {
        eprintln!(
            "Type at least {} characters to get suggestions.",
            MIN_QUERY_CHARS
        );
        return Ok(());
    }

    let session = require_session(config)?;
    let store = session.store(config)?;
    let suggestions = fetch_suggestions(&store, query, session.is_authenticated());

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&suggestions)?),
        OutputFormat::Table => {
            if suggestions.is_empty() {
                println!("No serial numbers contain {:?}", query);
            }
            for s in &suggestions {
                let status = if s.is_insurance {
                    "subscribed".green()
                } else {
                    "not subscribed".yellow()
                };
                println!("{:<24} {}", s.serial_number, status);
            }
        }
    }
    Ok(())
}
