//! Read-only client for the `serial_numbers` collection of the record store.

use crate::config::Config;
use crate::error::StoreError;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{Arc, RwLock};

pub const SERIAL_NUMBERS: &str = "serial_numbers";

/// Hard cap applied to realtime suggestion queries.
pub const SUGGESTION_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialRecord {
    #[serde(default)]
    pub id: String,
    pub serial_number: String,
    #[serde(default)]
    pub is_insurance: bool,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub created: Option<DateTime<Utc>>,
}

/// Paged list envelope returned by every collection query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Parse `2024-05-01 09:30:00.123Z` (the store's own format) or RFC 3339.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.fZ")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Quote a value for use as a string literal inside a filter expression.
pub fn quote_filter_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// The two queries the lookup flow needs from the record store.
pub trait RecordStore: Send + Sync {
    /// Exact, case-sensitive match on the serial number (limit 1).
    fn find_exact(&self, serial_number: &str) -> Result<Option<SerialRecord>, StoreError>;

    /// Substring match sorted by serial number ascending.
    fn find_partial(&self, fragment: &str, limit: usize) -> Result<Vec<SerialRecord>, StoreError>;
}

/// Record store backed by the REST list API.
///
/// Clones share one token slot, so a refreshed token reaches every worker
/// holding a handle to the same store.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

pub(crate) fn http_client(config: &Config) -> Result<Client, StoreError> {
    Ok(Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("sncheck/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn a non-success response into a `StoreError::Status`, keeping the server's message.
pub(crate) fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(StoreError::Status {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

impl RestStore {
    pub fn new(config: &Config, token: Option<String>) -> Result<Self, StoreError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.api_url.clone(),
            token: Arc::new(RwLock::new(token)),
        })
    }

    /// Swap the token sent with every following request.
    pub fn set_token(&self, token: Option<String>) {
        let mut slot = self.token.write().unwrap_or_else(|e| e.into_inner());
        *slot = token;
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// First page of a collection, optionally filtered and sorted.
    pub fn list<T: DeserializeOwned>(
        &self,
        collection: &str,
        per_page: usize,
        filter: Option<&str>,
        sort: Option<&str>,
    ) -> Result<ListResponse<T>, StoreError> {
        let url = format!("{}/api/collections/{}/records", self.base_url, collection);

        let mut query = vec![
            ("page", "1".to_string()),
            ("perPage", per_page.to_string()),
            ("skipTotal", "1".to_string()),
        ];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        if let Some(sort) = sort {
            query.push(("sort", sort.to_string()));
        }

        let mut request = self.client.get(&url).query(&query);
        if let Some(token) = self.current_token() {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        log::debug!("GET {} filter={:?} sort={:?}", url, filter, sort);
        let response = check_status(request.send()?)?;
        decode(response)
    }
}

impl RecordStore for RestStore {
    fn find_exact(&self, serial_number: &str) -> Result<Option<SerialRecord>, StoreError> {
        let filter = format!("serial_number = {}", quote_filter_value(serial_number));
        let page: ListResponse<SerialRecord> = self.list(SERIAL_NUMBERS, 1, Some(&filter), None)?;
        Ok(page.items.into_iter().next())
    }

    fn find_partial(&self, fragment: &str, limit: usize) -> Result<Vec<SerialRecord>, StoreError> {
        let filter = format!("serial_number ~ {}", quote_filter_value(fragment));
        let page: ListResponse<SerialRecord> =
            self.list(SERIAL_NUMBERS, limit, Some(&filter), Some("serial_number"))?;
        Ok(page.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use sncheck_test_utils::MockStore;

    fn store_for(mock: &MockStore) -> RestStore {
        let config = Config {
            api_url: mock.url(),
            ..Config::default()
        };
        RestStore::new(&config, Some("token-123".to_string())).unwrap()
    }

    #[test]
    fn test_quote_filter_value() {
        assert_eq!(quote_filter_value("ABC123"), "\"ABC123\"");
        assert_eq!(quote_filter_value("A\"B"), "\"A\\\"B\"");
        assert_eq!(quote_filter_value("A\\B"), "\"A\\\\B\"");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let ts = parse_timestamp("2024-05-01 09:30:00.123Z").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 5, 1));
        assert_eq!((ts.hour(), ts.minute()), (9, 30));

        assert!(parse_timestamp("2024-05-01T09:30:00Z").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_find_exact_hit_and_miss() {
        let mock = MockStore::builder()
            .record("ABC123", true)
            .record("DEF456", false)
            .start();
        let store = store_for(&mock);

        let hit = store.find_exact("ABC123").unwrap().unwrap();
        assert_eq!(hit.serial_number, "ABC123");
        assert!(hit.is_insurance);
        assert!(hit.created.is_some());

        assert!(store.find_exact("abc123").unwrap().is_none());
        assert!(store.find_exact("XYZ").unwrap().is_none());
        assert_eq!(mock.last_authorization().as_deref(), Some("token-123"));
    }

    #[test]
    fn test_clones_follow_token_swap() {
        let mock = MockStore::builder().record("ABC123", true).start();
        let store = store_for(&mock);
        let worker_copy = store.clone();

        store.set_token(Some("token-456".to_string()));
        worker_copy.find_exact("ABC123").unwrap();
        assert_eq!(mock.last_authorization().as_deref(), Some("token-456"));

        store.set_token(None);
        worker_copy.find_exact("ABC123").unwrap();
        assert_eq!(mock.last_authorization(), None);
    }

    #[test]
    fn test_find_partial_sorted_and_limited() {
        let mut builder = MockStore::builder();
        for i in (0..15).rev() {
            builder = builder.record(&format!("SN-{:02}", i), i % 2 == 0);
        }
        let mock = builder.record("OTHER", true).start();
        let store = store_for(&mock);

        let items = store.find_partial("SN-", SUGGESTION_LIMIT).unwrap();
        let serials: Vec<_> = items.iter().map(|r| r.serial_number.as_str()).collect();
        assert_eq!(serials.len(), 10);
        assert_eq!(serials[0], "SN-00");
        assert_eq!(serials[9], "SN-09");
    }

    #[test]
    fn test_server_error_message_is_kept() {
        let mock = MockStore::builder().fail("BROKEN").start();
        let store = store_for(&mock);

        let err = store.find_exact("BROKEN").unwrap_err();
        match err {
            StoreError::Status { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Something went wrong while processing your request.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unreachable_store_is_transport_error() {
        let config = Config {
            api_url: "http://127.0.0.1:1".to_string(),
            ..Config::default()
        };
        let store = RestStore::new(&config, None).unwrap();
        assert!(matches!(
            store.find_exact("ABC123"),
            Err(StoreError::Transport(_))
        ));
    }
}
