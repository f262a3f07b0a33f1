use crate::store::RestStore;
use serde::{Deserialize, Serialize};

pub const ORGANIZATION_SETTINGS: &str = "organization_settings";

pub const DEFAULT_APP_TITLE: &str = "Device insurance lookup";
pub const DEFAULT_ORGANIZATION_NAME: &str = "sncheck";

/// Branding and maintenance flags stored as a single record on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSettings {
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default = "default_organization_name")]
    pub organization_name: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub contact_email: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub app_description: Option<String>,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub maintenance_message: Option<String>,
}

fn default_app_title() -> String {
    DEFAULT_APP_TITLE.to_string()
}

fn default_organization_name() -> String {
    DEFAULT_ORGANIZATION_NAME.to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            app_title: default_app_title(),
            organization_name: default_organization_name(),
            contact_email: None,
            app_description: None,
            maintenance_mode: false,
            maintenance_message: None,
        }
    }
}

impl OrganizationSettings {
    /// Fetch the settings record. Any failure falls back to the defaults.
    pub fn fetch(store: &RestStore) -> Self {
        match store.list::<OrganizationSettings>(ORGANIZATION_SETTINGS, 1, None, None) {
            Ok(page) => page.items.into_iter().next().unwrap_or_default(),
            Err(e) => {
                log::debug!("Using default organization settings: {e}");
                Self::default()
            }
        }
    }

    /// Warning to show while the server is in maintenance mode.
    pub fn maintenance_notice(&self) -> Option<String> {
        if !self.maintenance_mode {
            return None;
        }
        Some(
            self.maintenance_message
                .clone()
                .unwrap_or_else(|| "The service is under maintenance.".to_string()),
        )
    }
}
