use anyhow::Result;
use sncheck_api::{Config, OrganizationSettings};

use crate::auth::require_session;

pub fn execute(config: &Config) -> Result<()> {
    let session = require_session(config)?;
    let settings = OrganizationSettings::fetch(&session.store(config)?);
    sncheck_api::tui::run(config, session, settings)
}
