use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use sncheck_api::auth::time_until_expiry;
use sncheck_api::{AuthError, Config, SessionContext, SessionState};

#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    command: Option<AuthCommand>,
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Log in through the configured OAuth provider (opens browser)
    Login,
    /// Log out and clear the stored token
    Logout,
    /// Show current authentication status
    Status,
}

pub fn execute(args: AuthArgs, config: &Config) -> Result<()> {
    match args.command {
        Some(AuthCommand::Login) | None => login(config),
        Some(AuthCommand::Logout) => logout(config),
        Some(AuthCommand::Status) => status(config),
    }
}

fn login(config: &Config) -> Result<()> {
    let mut session = SessionContext::from_config(config)?;
    let identity = session.login()?;
    println!(
        "{} Logged in as {}",
        "✓".green(),
        identity.email.bold()
    );
    Ok(())
}

fn logout(config: &Config) -> Result<()> {
    let mut session = SessionContext::from_config(config)?;
    session.logout()?;
    println!("{}", "✓ Logged out successfully".green());
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let session = SessionContext::from_config(config)?;
    println!("Authentication Status:");
    match session.state() {
        SessionState::Authenticated(identity) => {
            println!("  Status: Logged in");
            println!("  Email: {}", identity.email);
            if !identity.name.is_empty() {
                println!("  Name: {}", identity.name);
            }
            if let Some(token) = session.token() {
                let now = chrono::Utc::now().timestamp();
                println!("  Token expires in: {}", time_until_expiry(token, now));
            }
        }
        _ => {
            println!("  Status: Not logged in");
            println!("\nRun `sncheck auth login` to authenticate.");
        }
    }
    Ok(())
}

/// Restore the stored session and confirm it with the server.
pub fn require_session(config: &Config) -> Result<SessionContext> {
    let mut session = SessionContext::from_config(config)?;
    if !session.is_authenticated() {
        return Err(AuthError::NotAuthenticated.into());
    }
    session
        .confirm()
        .context("Stored session was rejected. Run `sncheck auth login` to authenticate again.")?;
    Ok(session)
}
