//! In-process stand-in for the record store's REST API.
//!
//! Serves the handful of endpoints the client uses from an in-memory record
//! set on a loopback port, and records every request it sees.
//!
//! ```no_run
//! use sncheck_test_utils::MockStore;
//!
//! let mock = MockStore::builder()
//!     .record("ABC123", true)
//!     .fail("BROKEN")
//!     .start();
//! // point the client at mock.url()
//! ```

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

pub const MOCK_OAUTH_CODE: &str = "mock-auth-code";
pub const MOCK_OAUTH_STATE: &str = "mock-state";
pub const MOCK_CODE_VERIFIER: &str = "mock-verifier";
pub const MOCK_USER_ID: &str = "user_1";
pub const MOCK_USER_EMAIL: &str = "staff@example.com";
pub const MOCK_USER_NAME: &str = "Staff Member";

/// Expiry used for tokens issued by the mock (2100-01-01).
pub const FAR_FUTURE_EXP: i64 = 4_102_444_800;

/// Build an unsigned JWT-shaped token carrying `exp`.
pub fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        json!({ "id": MOCK_USER_ID, "type": "auth", "exp": exp }).to_string(),
    );
    let signature = URL_SAFE_NO_PAD.encode("mock-signature");
    format!("{header}.{payload}.{signature}")
}

pub fn mock_user() -> Value {
    json!({
        "id": MOCK_USER_ID,
        "collectionName": "users",
        "email": MOCK_USER_EMAIL,
        "name": MOCK_USER_NAME,
        "avatar": "",
    })
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<(String, bool)>,
    failing: HashSet<String>,
    tokens: HashSet<String>,
    require_auth: bool,
    settings: Option<Value>,
    requests: Vec<RecordedRequest>,
}

#[derive(Debug, Default)]
pub struct MockStoreBuilder {
    state: State,
}

impl MockStoreBuilder {
    pub fn record(mut self, serial_number: &str, is_insurance: bool) -> Self {
        self.state
            .records
            .push((serial_number.to_string(), is_insurance));
        self
    }

    /// Any query whose filter literal equals `serial_number` answers 400.
    pub fn fail(mut self, serial_number: &str) -> Self {
        self.state.failing.insert(serial_number.to_string());
        self
    }

    /// Accept `token` for refresh and authorized reads.
    pub fn valid_token(mut self, token: &str) -> Self {
        self.state.tokens.insert(token.to_string());
        self
    }

    /// Reject record queries that do not carry a valid token.
    pub fn require_auth(mut self) -> Self {
        self.state.require_auth = true;
        self
    }

    pub fn settings(mut self, settings: Value) -> Self {
        self.state.settings = Some(settings);
        self
    }

    pub fn start(self) -> MockStore {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock store");
        let addr = listener.local_addr().expect("mock store address");
        let state = Arc::new(Mutex::new(self.state));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let state = state.clone();
            let shutdown = shutdown.clone();
            let base_url = format!("http://{addr}");
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Ok(stream) = stream {
                        handle_connection(stream, &state, &base_url);
                    }
                }
            })
        };

        MockStore {
            addr,
            state,
            shutdown,
            handle: Some(handle),
        }
    }
}

pub struct MockStore {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockStore {
    pub fn builder() -> MockStoreBuilder {
        MockStoreBuilder::default()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of queries against the `serial_numbers` collection.
    pub fn lookup_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path == "/api/collections/serial_numbers/records")
            .count()
    }

    /// Filters of the `serial_numbers` queries, in arrival order.
    pub fn filters(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter(|r| r.path == "/api/collections/serial_numbers/records")
            .filter_map(|r| r.query.get("filter").cloned())
            .collect()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.requests().last().and_then(|r| r.authorization.clone())
    }

    pub fn revoke_token(&self, token: &str) {
        self.state.lock().unwrap().tokens.remove(token);
    }
}

impl Drop for MockStore {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(stream: TcpStream, state: &Mutex<State>, base_url: &str) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            match key.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).is_err() {
        return;
    }

    let Ok(url) = url::Url::parse(&format!("http://mock{target}")) else {
        return;
    };
    let request = RecordedRequest {
        method,
        path: url.path().to_string(),
        query: url.query_pairs().into_owned().collect(),
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let (status, payload) = {
        let mut state = state.lock().unwrap();
        state.requests.push(request.clone());
        route(&mut state, &request, base_url)
    };

    let body = payload.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Unknown",
    }
}

fn error_body(status: u16, message: &str) -> (u16, Value) {
    (
        status,
        json!({ "status": status, "message": message, "data": {} }),
    )
}

fn route(state: &mut State, request: &RecordedRequest, base_url: &str) -> (u16, Value) {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/api/collections/serial_numbers/records") => serial_numbers(state, request),
        ("GET", "/api/collections/organization_settings/records") => match &state.settings {
            Some(settings) => (200, list_envelope(vec![settings.clone()], 1)),
            None => error_body(404, "The requested resource wasn't found."),
        },
        ("POST", "/api/collections/users/auth-refresh") => {
            match request.authorization.as_deref() {
                Some(token) if state.tokens.contains(token) => (
                    200,
                    json!({ "token": token, "record": mock_user() }),
                ),
                _ => error_body(401, "The request requires valid record authorization token."),
            }
        }
        ("GET", "/api/collections/users/auth-methods") => (
            200,
            json!({
                "password": { "enabled": false, "identityFields": [] },
                "oauth2": {
                    "enabled": true,
                    "providers": [{
                        "name": "google",
                        "displayName": "Google",
                        "state": MOCK_OAUTH_STATE,
                        "authURL": format!("{base_url}/oauth2/authorize?client_id=mock&state={MOCK_OAUTH_STATE}&redirect_uri="),
                        "codeVerifier": MOCK_CODE_VERIFIER,
                        "codeChallenge": "mock-challenge",
                        "codeChallengeMethod": "S256",
                    }],
                },
            }),
        ),
        ("POST", "/api/collections/users/auth-with-oauth2") => {
            let body: Value = serde_json::from_str(&request.body).unwrap_or(Value::Null);
            if body["code"] == MOCK_OAUTH_CODE && body["codeVerifier"] == MOCK_CODE_VERIFIER {
                let token = make_token(FAR_FUTURE_EXP);
                state.tokens.insert(token.clone());
                (200, json!({ "token": token, "record": mock_user() }))
            } else {
                error_body(400, "Failed to authenticate.")
            }
        }
        _ => error_body(404, "The requested resource wasn't found."),
    }
}

fn list_envelope(items: Vec<Value>, per_page: usize) -> Value {
    let total = items.len();
    json!({
        "page": 1,
        "perPage": per_page,
        "totalItems": total,
        "totalPages": if total == 0 { 0 } else { 1 },
        "items": items,
    })
}

/// Split `serial_number = "X"` / `serial_number ~ "X"` into operator and literal.
fn parse_filter(filter: &str) -> Option<(char, String)> {
    let rest = filter.strip_prefix("serial_number ")?;
    let mut chars = rest.chars();
    let op = chars.next()?;
    let literal = chars.as_str().trim().strip_prefix('"')?.strip_suffix('"')?;

    let mut value = String::new();
    let mut escaped = false;
    for c in literal.chars() {
        if escaped {
            value.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            value.push(c);
        }
    }
    Some((op, value))
}

fn serial_numbers(state: &State, request: &RecordedRequest) -> (u16, Value) {
    if state.require_auth
        && !request
            .authorization
            .as_deref()
            .is_some_and(|t| state.tokens.contains(t))
    {
        return error_body(401, "The request requires valid record authorization token.");
    }

    let per_page: usize = request
        .query
        .get("perPage")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30);

    let mut matches: Vec<&(String, bool)> = match request.query.get("filter") {
        Some(filter) => {
            let Some((op, value)) = parse_filter(filter) else {
                return error_body(400, "Invalid filter parameters.");
            };
            if state.failing.contains(&value) {
                return error_body(400, "Something went wrong while processing your request.");
            }
            state
                .records
                .iter()
                .filter(|(serial, _)| match op {
                    '=' => *serial == value,
                    '~' => serial.contains(value.as_str()),
                    _ => false,
                })
                .collect()
        }
        None => state.records.iter().collect(),
    };

    if request.query.get("sort").map(String::as_str) == Some("serial_number") {
        matches.sort_by(|a, b| a.0.cmp(&b.0));
    }

    let items = matches
        .into_iter()
        .take(per_page)
        .enumerate()
        .map(|(i, (serial, insured))| {
            json!({
                "id": format!("rec{i:012}"),
                "collectionName": "serial_numbers",
                "serial_number": serial,
                "is_insurance": insured,
                "created": "2024-05-01 09:30:00.000Z",
                "updated": "2024-05-01 09:30:00.000Z",
            })
        })
        .collect();

    (200, list_envelope(items, per_page))
}
