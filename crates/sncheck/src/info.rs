use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use sncheck_api::{Config, OrganizationSettings, RestStore, SessionContext, SessionState};

use crate::search::OutputFormat;

#[derive(Args, Debug)]
#[command(about = "Show server, organization and session information")]
pub struct InfoArgs {
    /// Output format
    #[arg(short, long, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    api_url: &'a str,
    session: &'static str,
    email: Option<&'a str>,
    settings: &'a OrganizationSettings,
}

pub fn execute(args: InfoArgs, config: &Config) -> Result<()> {
    let session = SessionContext::from_config(config)?;
    // Settings are readable without a session; the token is sent when there is one.
    let store = RestStore::new(config, session.token().map(str::to_string))?;
    let settings = OrganizationSettings::fetch(&store);
    let email = session.identity().map(|i| i.email.as_str());

    match args.format {
        OutputFormat::Json => {
            let output = InfoOutput {
                api_url: &config.api_url,
                session: session.state().name(),
                email,
                settings: &settings,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", settings.app_title.blue().bold());
            println!("Organization: {}", settings.organization_name);
            if let Some(description) = &settings.app_description {
                println!("Description: {}", description);
            }
            if let Some(contact) = &settings.contact_email {
                println!("Contact: {}", contact);
            }
            println!("Server: {}", config.api_url.cyan());
            match session.state() {
                SessionState::Authenticated(identity) => {
                    println!("Session: logged in as {}", identity.email)
                }
                state => println!("Session: {}", state.name()),
            }
            if let Some(notice) = settings.maintenance_notice() {
                println!("{} {}", "Maintenance:".yellow().bold(), notice);
            }
        }
    }
    Ok(())
}
