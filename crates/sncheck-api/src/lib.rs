pub mod auth;
pub mod config;
pub mod error;
pub mod export;
pub mod op;
pub mod search;
pub mod session;
pub mod settings;
pub mod store;
pub mod suggest;
pub mod terms;
pub mod tui;

pub use auth::{IdentityProvider, OAuthProvider, SessionIdentity, TokenStore};
pub use config::Config;
pub use error::{AuthError, ImportError, StoreError};
pub use export::{export_results, export_results_today, render_csv};
pub use op::OpState;
pub use search::{SearchOptions, SearchResult, SearchStats, search, search_serial_numbers};
pub use session::{SessionContext, SessionState};
pub use settings::OrganizationSettings;
pub use store::{RecordStore, RestStore, SerialRecord};
pub use suggest::{Suggestion, SuggestionFetcher, fetch_suggestions};
pub use terms::{MAX_TERMS, QueryTermList, import_file, parse_bulk_text};
