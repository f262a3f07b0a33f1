use crate::config::{Config, config_dir};
use crate::error::{AuthError, StoreError};
use crate::store::{check_status, decode, http_client};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// How long to wait for the browser to hit the loopback callback.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// What gets written to `~/.sncheck/auth.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub identity: SessionIdentity,
}

/// Token and profile returned by a successful login or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub token: String,
    pub identity: SessionIdentity,
}

/// The identity provider as seen by the session manager.
pub trait IdentityProvider: Send + Sync {
    /// Run the interactive login flow.
    fn authenticate(&self) -> Result<AuthGrant, AuthError>;

    /// Validate `token` and obtain a fresh one.
    fn refresh(&self, token: &str) -> Result<AuthGrant, AuthError>;
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// `exp` claim of a JWT, without verifying the signature.
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<JwtClaims>(&bytes).ok()?.exp
}

/// Tokens without a readable `exp` count as expired.
pub fn is_token_expired(token: &str, now: i64) -> bool {
    token_expiry(token).is_none_or(|exp| exp <= now)
}

pub fn time_until_expiry(token: &str, now: i64) -> String {
    let Some(exp) = token_expiry(token) else {
        return "unknown".to_string();
    };
    let remaining = exp - now;

    if remaining <= 0 {
        "expired".to_string()
    } else if remaining < 3600 {
        format!("{} minutes", remaining / 60)
    } else if remaining < 86400 {
        format!("{} hours", remaining / 3600)
    } else {
        format!("{} days", remaining / 86400)
    }
}

/// Persisted session token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn default_location() -> anyhow::Result<Self> {
        Ok(Self::at(config_dir()?.join("auth.toml")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Option<StoredSession>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| AuthError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    pub fn save(&self, session: &StoredSession) -> Result<(), AuthError> {
        let contents =
            toml::to_string(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        AtomicFile::new(&self.path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(contents.as_bytes()))
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct AuthRecord {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar: Option<String>,
}

impl From<AuthRecord> for SessionIdentity {
    fn from(record: AuthRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
            avatar: record.avatar.filter(|a| !a.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    record: AuthRecord,
}

impl From<AuthResponse> for AuthGrant {
    fn from(response: AuthResponse) -> Self {
        Self {
            token: response.token,
            identity: response.record.into(),
        }
    }
}

#[derive(Deserialize)]
struct AuthMethods {
    #[serde(default)]
    oauth2: OAuth2Methods,
}

#[derive(Default, Deserialize)]
struct OAuth2Methods {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    providers: Vec<OAuth2Provider>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuth2Provider {
    name: String,
    state: String,
    #[serde(rename = "authURL")]
    auth_url: String,
    code_verifier: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OAuth2Request<'a> {
    provider: &'a str,
    code: &'a str,
    code_verifier: &'a str,
    #[serde(rename = "redirectURL")]
    redirect_url: &'a str,
}

/// Authorization code returned to the loopback listener.
#[derive(Debug, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

/// Parse `GET /callback?code=..&state=.. HTTP/1.1`.
pub fn parse_callback(request_line: &str) -> Result<CallbackParams, AuthError> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AuthError::Provider("Invalid HTTP request format".to_string()))?;
    let url = url::Url::parse(&format!("http://localhost{target}"))
        .map_err(|e| AuthError::Provider(format!("Invalid callback URL: {e}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::Canceled(value.into_owned())),
            _ => {}
        }
    }

    Ok(CallbackParams {
        code: code.ok_or_else(|| AuthError::Provider("Missing code".to_string()))?,
        state: state.ok_or_else(|| AuthError::Provider("Missing state".to_string()))?,
    })
}

type UrlHandler = Box<dyn Fn(&str) + Send + Sync>;

fn open_in_browser(url: &str) {
    eprintln!("Opening browser...");
    if let Err(e) = open::that(url) {
        eprintln!("Failed to open browser: {}", e);
        eprintln!("Please manually open: {}", url);
    }
}

/// OAuth2 login through the record store's provider proxy, with a loopback redirect.
pub struct OAuthProvider {
    client: Client,
    base_url: String,
    provider: String,
    timeout: Duration,
    on_url: UrlHandler,
}

impl OAuthProvider {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.api_url.clone(),
            provider: config.oauth_provider.clone(),
            timeout: LOGIN_TIMEOUT,
            on_url: Box::new(open_in_browser),
        })
    }

    /// Replace the default "open the browser" behaviour.
    pub fn with_url_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_url = Box::new(handler);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn users_url(&self, action: &str) -> String {
        format!("{}/api/collections/users/{}", self.base_url, action)
    }

    fn auth_methods(&self) -> Result<AuthMethods, StoreError> {
        let response = self.client.get(self.users_url("auth-methods")).send()?;
        decode(check_status(response)?)
    }

    fn wait_for_callback(&self, listener: &TcpListener) -> Result<TcpStream, AuthError> {
        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + self.timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(AuthError::Canceled("timed out waiting for login".to_string()));
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn respond(stream: &mut TcpStream, message: &str) -> std::io::Result<()> {
    let body = format!("<html><body><p>{message}</p></body></html>");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

impl IdentityProvider for OAuthProvider {
    fn authenticate(&self) -> Result<AuthGrant, AuthError> {
        let methods = self
            .auth_methods()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        let provider = methods
            .oauth2
            .providers
            .into_iter()
            .find(|p| p.name == self.provider)
            .filter(|_| methods.oauth2.enabled)
            .ok_or_else(|| AuthError::UnknownProvider(self.provider.clone()))?;

        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let redirect_url = format!("http://127.0.0.1:{}/callback", port);
        let auth_url = format!("{}{}", provider.auth_url, urlencoding::encode(&redirect_url));

        log::debug!("Waiting for OAuth callback on {}", redirect_url);
        (self.on_url)(&auth_url);

        let mut stream = self.wait_for_callback(&listener)?;
        let mut request_line = String::new();
        BufReader::new(&stream).read_line(&mut request_line)?;

        let params = match parse_callback(&request_line) {
            Ok(params) => params,
            Err(e) => {
                let _ = respond(&mut stream, "Login failed. You can close this tab.");
                return Err(e);
            }
        };
        if params.state != provider.state {
            let _ = respond(&mut stream, "Login failed. You can close this tab.");
            return Err(AuthError::StateMismatch);
        }
        let _ = respond(&mut stream, "Login complete. You can close this tab.");

        let response = self
            .client
            .post(self.users_url("auth-with-oauth2"))
            .json(&OAuth2Request {
                provider: &provider.name,
                code: &params.code,
                code_verifier: &provider.code_verifier,
                redirect_url: &redirect_url,
            })
            .send()
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        let response: AuthResponse = check_status(response)
            .and_then(decode)
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        Ok(response.into())
    }

    fn refresh(&self, token: &str) -> Result<AuthGrant, AuthError> {
        let response = self
            .client
            .post(self.users_url("auth-refresh"))
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .map_err(|e| AuthError::Refresh(e.into()))?;
        let response: AuthResponse = check_status(response)
            .and_then(decode)
            .map_err(AuthError::Refresh)?;
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sncheck_test_utils::mock_store::{
        FAR_FUTURE_EXP, MOCK_OAUTH_CODE, MOCK_OAUTH_STATE, MOCK_USER_EMAIL,
    };
    use sncheck_test_utils::{MockStore, make_token};

    fn config_for(mock: &MockStore) -> Config {
        Config {
            api_url: mock.url(),
            ..Config::default()
        }
    }

    /// Stand-in for the browser: follow the redirect back to the loopback listener.
    fn fake_browser(code: &'static str, state: &'static str) -> impl Fn(&str) + Send + Sync {
        move |auth_url: &str| {
            let url = url::Url::parse(auth_url).unwrap();
            let redirect = url
                .query_pairs()
                .find(|(k, _)| k == "redirect_uri")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            let callback = format!("{redirect}?code={code}&state={state}");
            thread::spawn(move || {
                let _ = reqwest::blocking::get(callback);
            });
        }
    }

    #[test]
    fn test_token_expiry() {
        let token = make_token(1_700_000_000);
        assert_eq!(token_expiry(&token), Some(1_700_000_000));
        assert!(is_token_expired(&token, 1_700_000_000));
        assert!(!is_token_expired(&token, 1_699_999_999));
        assert!(is_token_expired("not-a-jwt", 0));
        assert_eq!(time_until_expiry(&token, 1_700_000_000 - 7200), "2 hours");
        assert_eq!(time_until_expiry(&token, 1_700_000_001), "expired");
    }

    #[test]
    fn test_token_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::at(dir.path().join("nested/auth.toml"));
        assert_eq!(store.load().unwrap(), None);

        let session = StoredSession {
            token: "abc".to_string(),
            identity: SessionIdentity {
                id: "u1".to_string(),
                email: "a@example.com".to_string(),
                name: "A".to_string(),
                avatar: None,
            },
        };
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        store.clear().unwrap();
        assert!(!store.exists());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        fs::write(&path, "token = ").unwrap();
        assert!(matches!(
            TokenStore::at(path).load(),
            Err(AuthError::Storage(_))
        ));
    }

    #[test]
    fn test_parse_callback() {
        let params = parse_callback("GET /callback?code=abc%20d&state=xyz HTTP/1.1\r\n").unwrap();
        assert_eq!(
            params,
            CallbackParams {
                code: "abc d".to_string(),
                state: "xyz".to_string()
            }
        );
        assert!(matches!(
            parse_callback("GET /callback?error=access_denied HTTP/1.1"),
            Err(AuthError::Canceled(_))
        ));
        assert!(parse_callback("GET /callback?state=x HTTP/1.1").is_err());
        assert!(parse_callback("garbage").is_err());
    }

    #[test]
    fn test_oauth_login_against_mock() {
        let mock = MockStore::builder().start();
        let provider = OAuthProvider::new(&config_for(&mock))
            .unwrap()
            .with_url_handler(fake_browser(MOCK_OAUTH_CODE, MOCK_OAUTH_STATE))
            .with_timeout(Duration::from_secs(10));

        let grant = provider.authenticate().unwrap();
        assert_eq!(grant.identity.email, MOCK_USER_EMAIL);
        assert_eq!(grant.identity.avatar, None);
        assert_eq!(token_expiry(&grant.token), Some(FAR_FUTURE_EXP));

        let exchange = mock
            .requests()
            .into_iter()
            .find(|r| r.path.ends_with("auth-with-oauth2"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&exchange.body).unwrap();
        assert!(body["redirectURL"].as_str().unwrap().starts_with("http://127.0.0.1:"));
    }

    #[test]
    fn test_oauth_state_mismatch() {
        let mock = MockStore::builder().start();
        let provider = OAuthProvider::new(&config_for(&mock))
            .unwrap()
            .with_url_handler(fake_browser(MOCK_OAUTH_CODE, "forged"))
            .with_timeout(Duration::from_secs(10));

        assert!(matches!(
            provider.authenticate(),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_oauth_unknown_provider() {
        let mock = MockStore::builder().start();
        let config = Config {
            oauth_provider: "github".to_string(),
            ..config_for(&mock)
        };
        let provider = OAuthProvider::new(&config)
            .unwrap()
            .with_url_handler(|_| panic!("browser must not open"));

        assert!(matches!(
            provider.authenticate(),
            Err(AuthError::UnknownProvider(name)) if name == "github"
        ));
    }

    #[test]
    fn test_oauth_times_out_without_callback() {
        let mock = MockStore::builder().start();
        let provider = OAuthProvider::new(&config_for(&mock))
            .unwrap()
            .with_url_handler(|_| {})
            .with_timeout(Duration::from_millis(200));

        assert!(matches!(
            provider.authenticate(),
            Err(AuthError::Canceled(_))
        ));
    }

    #[test]
    fn test_refresh() {
        let token = make_token(FAR_FUTURE_EXP);
        let mock = MockStore::builder().valid_token(&token).start();
        let provider = OAuthProvider::new(&config_for(&mock)).unwrap();

        let grant = provider.refresh(&token).unwrap();
        assert_eq!(grant.token, token);

        mock.revoke_token(&token);
        assert!(matches!(
            provider.refresh(&token),
            Err(AuthError::Refresh(StoreError::Status { status: 401, .. }))
        ));
    }
}
