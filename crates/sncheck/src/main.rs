#[cfg(all(feature = "mimalloc", not(target_family = "wasm")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;
use sncheck_api::Config;

mod auth;
mod info;
mod quick;
mod search;
mod suggest;

#[derive(Parser)]
#[command(name = "sncheck")]
#[command(about = "Look up device insurance status by serial number", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true, hide = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage authentication
    Auth(auth::AuthArgs),

    /// Look up serial numbers
    #[command(alias = "s")]
    Search(search::SearchArgs),

    /// Show serial numbers containing a fragment
    Suggest(suggest::SuggestArgs),

    /// Interactive lookup with live suggestions
    #[command(alias = "q")]
    Quick,

    /// Show server, organization and session information
    Info(info::InfoArgs),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e}", "Error:".red());
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Default level depends on --debug, RUST_LOG overrides
    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("error")
    };
    env_logger::Builder::from_env(env).init();

    let config = Config::load()?;
    log::debug!("Using record store at {}", config.api_url);

    match cli.command {
        Commands::Auth(args) => auth::execute(args, &config),
        Commands::Search(args) => search::execute(args, &config),
        Commands::Suggest(args) => suggest::execute(args, &config),
        Commands::Quick => quick::execute(&config),
        Commands::Info(args) => info::execute(args, &config),
    }
}
