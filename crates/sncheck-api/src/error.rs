use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single request against the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Record store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from record store: {0}")]
    Decode(String),
}

/// Failure while importing query terms from a file.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("No serial numbers found in {0}")]
    Empty(PathBuf),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("OAuth provider `{0}` is not enabled on the server")]
    UnknownProvider(String),

    #[error("OAuth state mismatch, the login callback did not originate from this session")]
    StateMismatch,

    #[error("Login was canceled: {0}")]
    Canceled(String),

    #[error("Session refresh failed: {0}")]
    Refresh(#[source] StoreError),

    #[error("Failed to persist session token: {0}")]
    Storage(String),

    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("Not authenticated. Run `sncheck auth login` to authenticate.")]
    NotAuthenticated,
}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}
