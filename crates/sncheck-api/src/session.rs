//! Session lifecycle: Anonymous -> Authenticating -> Authenticated -> Expired.
//!
//! The session is an explicit value owned by whoever drives the program (the
//! CLI command or the TUI loop). Every transition goes through a method here.

use crate::auth::{
    AuthGrant, IdentityProvider, OAuthProvider, SessionIdentity, StoredSession, TokenStore,
    is_token_expired,
};
use crate::config::Config;
use crate::error::AuthError;
use crate::store::RestStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(SessionIdentity),
    Expired,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Expired => "expired",
        }
    }
}

pub struct SessionContext {
    provider: Arc<dyn IdentityProvider>,
    tokens: TokenStore,
    state: SessionState,
    token: Option<String>,
    revalidate_interval: Duration,
    /// When the server last confirmed the token. `None` until the first check.
    last_validated: Option<Instant>,
}

impl SessionContext {
    /// A fresh anonymous session. Nothing is read from disk.
    pub fn new(
        provider: Box<dyn IdentityProvider>,
        tokens: TokenStore,
        revalidate_interval: Duration,
    ) -> Self {
        Self {
            provider: Arc::from(provider),
            tokens,
            state: SessionState::Anonymous,
            token: None,
            revalidate_interval,
            last_validated: None,
        }
    }

    /// Restore from the token file. An unexpired token is trusted until
    /// [`SessionContext::confirm`] checks it with the server; an expired one is discarded.
    pub fn restore(
        provider: Box<dyn IdentityProvider>,
        tokens: TokenStore,
        revalidate_interval: Duration,
    ) -> Result<Self, AuthError> {
        let mut session = Self::new(provider, tokens, revalidate_interval);
        let Some(stored) = session.tokens.load()? else {
            return Ok(session);
        };

        if is_token_expired(&stored.token, chrono::Utc::now().timestamp()) {
            log::debug!("Stored session token has expired, discarding it");
            session.tokens.clear()?;
            return Ok(session);
        }

        session.state = SessionState::Authenticated(stored.identity);
        session.token = Some(stored.token);
        Ok(session)
    }

    /// Restore using the configured server and the default token location.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = OAuthProvider::new(config)?;
        let tokens = TokenStore::default_location()?;
        Ok(Self::restore(
            Box::new(provider),
            tokens,
            config.revalidate_interval,
        )?)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Raw token of an authenticated session.
    pub fn token(&self) -> Option<&str> {
        match self.state {
            SessionState::Authenticated(_) => self.token.as_deref(),
            _ => None,
        }
    }

    pub fn require_token(&self) -> Result<&str, AuthError> {
        self.token().ok_or(AuthError::NotAuthenticated)
    }

    /// A record store client carrying this session's token.
    pub fn store(&self, config: &Config) -> Result<RestStore> {
        let token = self.require_token()?;
        Ok(RestStore::new(config, Some(token.to_string()))?)
    }

    fn invalid(&self, action: &'static str) -> AuthError {
        AuthError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    /// Anonymous or Expired -> Authenticating.
    pub fn begin_login(&mut self) -> Result<(), AuthError> {
        match self.state {
            SessionState::Anonymous => {}
            SessionState::Expired => {
                self.token = None;
                self.tokens.clear()?;
            }
            _ => return Err(self.invalid("log in")),
        }
        self.state = SessionState::Authenticating;
        Ok(())
    }

    /// Authenticating -> Authenticated on success, back to Anonymous on failure.
    pub fn complete_login(
        &mut self,
        result: Result<AuthGrant, AuthError>,
    ) -> Result<&SessionIdentity, AuthError> {
        if self.state != SessionState::Authenticating {
            return Err(self.invalid("complete login"));
        }

        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                log::debug!("Login failed: {e}");
                self.state = SessionState::Anonymous;
                return Err(e);
            }
        };
        if let Err(e) = self.accept(grant) {
            self.state = SessionState::Anonymous;
            self.token = None;
            return Err(e);
        }

        self.identity()
            .ok_or_else(|| AuthError::Provider("login produced no identity".to_string()))
    }

    /// Run the provider's interactive login. Logs out first when already authenticated.
    pub fn login(&mut self) -> Result<&SessionIdentity, AuthError> {
        if self.is_authenticated() {
            self.logout()?;
        }
        self.begin_login()?;
        let result = self.provider.authenticate();
        self.complete_login(result)
    }

    /// Authenticated or Expired -> Anonymous, clearing the stored token.
    pub fn logout(&mut self) -> Result<(), AuthError> {
        if self.state == SessionState::Authenticating {
            return Err(self.invalid("log out"));
        }
        self.tokens.clear()?;
        self.token = None;
        self.last_validated = None;
        self.state = SessionState::Anonymous;
        Ok(())
    }

    fn accept(&mut self, grant: AuthGrant) -> Result<(), AuthError> {
        self.tokens.save(&StoredSession {
            token: grant.token.clone(),
            identity: grant.identity.clone(),
        })?;
        self.token = Some(grant.token);
        self.state = SessionState::Authenticated(grant.identity);
        self.last_validated = Some(Instant::now());
        Ok(())
    }

    fn refresh(&mut self, on_failure: SessionState) -> Result<(), AuthError> {
        let Some(token) = self.token().map(str::to_string) else {
            return Err(self.invalid("revalidate"));
        };
        let result = self.provider.refresh(&token);
        self.apply_refresh(result, on_failure)
    }

    fn apply_refresh(
        &mut self,
        result: Result<AuthGrant, AuthError>,
        on_failure: SessionState,
    ) -> Result<(), AuthError> {
        match result {
            Ok(grant) => self.accept(grant),
            Err(e) => {
                log::warn!("Session revalidation failed: {e}");
                if on_failure == SessionState::Anonymous {
                    self.tokens.clear()?;
                    self.token = None;
                }
                self.state = on_failure;
                Err(e)
            }
        }
    }

    /// Startup check of a restored token. A rejected token is cleared and the
    /// session drops to Anonymous.
    pub fn confirm(&mut self) -> Result<(), AuthError> {
        self.refresh(SessionState::Anonymous)
    }

    /// Periodic revalidation. A rejected token moves the session to Expired.
    pub fn revalidate(&mut self) -> Result<(), AuthError> {
        self.refresh(SessionState::Expired)
    }

    pub fn is_revalidation_due(&self, now: Instant) -> bool {
        self.is_authenticated()
            && self
                .last_validated
                .is_none_or(|at| now.duration_since(at) >= self.revalidate_interval)
    }

    /// Claim a due revalidation for a caller that runs the refresh elsewhere.
    ///
    /// Returns the token to refresh and restarts the interval, so the check is
    /// handed out once while it is in flight. Pair with [`Self::finish_revalidation`].
    pub fn take_due_revalidation(&mut self, now: Instant) -> Option<String> {
        if !self.is_revalidation_due(now) {
            return None;
        }
        self.last_validated = Some(now);
        self.token.clone()
    }

    /// Apply the outcome of a refresh of `token`. An outcome for a token the
    /// session no longer holds is ignored.
    pub fn finish_revalidation(
        &mut self,
        token: &str,
        result: Result<AuthGrant, AuthError>,
    ) -> Result<(), AuthError> {
        if self.token() != Some(token) {
            log::debug!("Ignoring revalidation of a superseded token");
            return Ok(());
        }
        self.apply_refresh(result, SessionState::Expired)
    }

    /// The provider, for running refreshes off the caller's thread.
    pub fn provider(&self) -> Arc<dyn IdentityProvider> {
        self.provider.clone()
    }

    /// Expire the session when its token file has been removed out from under it.
    /// Returns true if the state changed.
    pub fn check_storage(&mut self) -> bool {
        if self.is_authenticated() && !self.tokens.exists() {
            log::debug!("Token file {} was removed", self.tokens.path().display());
            self.state = SessionState::Expired;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use sncheck_test_utils::mock_store::FAR_FUTURE_EXP;
    use sncheck_test_utils::{MockStore, make_token};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        login: Option<Result<AuthGrant, String>>,
        refresh_ok: bool,
        refreshes: usize,
    }

    /// Provider whose answers are set by the test.
    #[derive(Clone, Default)]
    struct ScriptedProvider(Arc<Mutex<Script>>);

    impl IdentityProvider for ScriptedProvider {
        fn authenticate(&self) -> Result<AuthGrant, AuthError> {
            match self.0.lock().unwrap().login.clone() {
                Some(Ok(grant)) => Ok(grant),
                Some(Err(message)) => Err(AuthError::Canceled(message)),
                None => Err(AuthError::Provider("no login scripted".to_string())),
            }
        }

        fn refresh(&self, token: &str) -> Result<AuthGrant, AuthError> {
            let mut script = self.0.lock().unwrap();
            script.refreshes += 1;
            if script.refresh_ok {
                Ok(grant(token))
            } else {
                Err(AuthError::Refresh(StoreError::Status {
                    status: 401,
                    message: "invalid token".to_string(),
                }))
            }
        }
    }

    fn identity() -> SessionIdentity {
        SessionIdentity {
            id: "u1".to_string(),
            email: "staff@example.com".to_string(),
            name: "Staff".to_string(),
            avatar: None,
        }
    }

    fn grant(token: &str) -> AuthGrant {
        AuthGrant {
            token: token.to_string(),
            identity: identity(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        tokens: TokenStore,
        provider: ScriptedProvider,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let tokens = TokenStore::at(dir.path().join("auth.toml"));
            Self {
                _dir: dir,
                tokens,
                provider: ScriptedProvider::default(),
            }
        }

        fn persist(&self, token: &str) {
            self.tokens
                .save(&StoredSession {
                    token: token.to_string(),
                    identity: identity(),
                })
                .unwrap();
        }

        fn restore(&self) -> SessionContext {
            SessionContext::restore(
                Box::new(self.provider.clone()),
                self.tokens.clone(),
                Duration::from_secs(300),
            )
            .unwrap()
        }
    }

    #[test]
    fn test_login_and_logout() {
        let fx = Fixture::new();
        fx.provider.0.lock().unwrap().login = Some(Ok(grant("tok")));

        let mut session = fx.restore();
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(matches!(
            session.require_token(),
            Err(AuthError::NotAuthenticated)
        ));

        let who = session.login().unwrap();
        assert_eq!(who.email, "staff@example.com");
        assert_eq!(session.token(), Some("tok"));
        assert_eq!(fx.tokens.load().unwrap().unwrap().token, "tok");

        session.logout().unwrap();
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(!fx.tokens.exists());
    }

    #[test]
    fn test_failed_login_returns_to_anonymous() {
        let fx = Fixture::new();
        fx.provider.0.lock().unwrap().login = Some(Err("popup closed".to_string()));

        let mut session = fx.restore();
        assert!(matches!(session.login(), Err(AuthError::Canceled(_))));
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(!fx.tokens.exists());
    }

    #[test]
    fn test_invalid_transitions() {
        let fx = Fixture::new();
        let mut session = fx.restore();

        assert!(matches!(
            session.complete_login(Ok(grant("tok"))),
            Err(AuthError::InvalidTransition { .. })
        ));
        assert!(matches!(
            session.revalidate(),
            Err(AuthError::InvalidTransition { .. })
        ));

        session.begin_login().unwrap();
        assert_eq!(session.state(), &SessionState::Authenticating);
        assert!(matches!(
            session.begin_login(),
            Err(AuthError::InvalidTransition { state: "authenticating", .. })
        ));
        assert!(matches!(
            session.logout(),
            Err(AuthError::InvalidTransition { .. })
        ));

        session.complete_login(Ok(grant("tok"))).unwrap();
        assert!(matches!(
            session.begin_login(),
            Err(AuthError::InvalidTransition { state: "authenticated", .. })
        ));
    }

    #[test]
    fn test_restore_trusts_unexpired_token() {
        let fx = Fixture::new();
        fx.persist(&make_token(FAR_FUTURE_EXP));

        let session = fx.restore();
        assert_eq!(session.identity(), Some(&identity()));
        assert!(session.is_revalidation_due(Instant::now()));
    }

    #[test]
    fn test_restore_discards_expired_token() {
        let fx = Fixture::new();
        fx.persist(&make_token(1_000));

        let session = fx.restore();
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(!fx.tokens.exists());
    }

    #[test]
    fn test_startup_confirmation_failure_clears_session() {
        let fx = Fixture::new();
        fx.persist(&make_token(FAR_FUTURE_EXP));

        let mut session = fx.restore();
        assert!(session.confirm().is_err());
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(!fx.tokens.exists());
    }

    /// Run a due revalidation inline, the way a worker thread would.
    fn revalidate_if_due(session: &mut SessionContext, now: Instant) -> Result<bool, AuthError> {
        let Some(token) = session.take_due_revalidation(now) else {
            return Ok(false);
        };
        let result = session.provider().refresh(&token);
        session.finish_revalidation(&token, result)?;
        Ok(true)
    }

    #[test]
    fn test_periodic_revalidation() {
        let fx = Fixture::new();
        fx.persist(&make_token(FAR_FUTURE_EXP));
        fx.provider.0.lock().unwrap().refresh_ok = true;

        let mut session = fx.restore();
        let t0 = Instant::now();
        assert!(revalidate_if_due(&mut session, t0).unwrap());
        assert!(!revalidate_if_due(&mut session, t0).unwrap());
        assert!(!revalidate_if_due(&mut session, t0 + Duration::from_secs(100)).unwrap());
        assert_eq!(fx.provider.0.lock().unwrap().refreshes, 1);

        fx.provider.0.lock().unwrap().refresh_ok = false;
        let later = Instant::now() + Duration::from_secs(301);
        assert!(revalidate_if_due(&mut session, later).is_err());
        assert_eq!(session.state(), &SessionState::Expired);
        assert_eq!(session.token(), None);
        assert!(fx.tokens.exists());

        session.logout().unwrap();
        assert_eq!(session.state(), &SessionState::Anonymous);
        assert!(!fx.tokens.exists());
    }

    #[test]
    fn test_due_revalidation_is_handed_out_once() {
        let fx = Fixture::new();
        let token = make_token(FAR_FUTURE_EXP);
        fx.persist(&token);

        let mut session = fx.restore();
        let t0 = Instant::now();
        assert_eq!(session.take_due_revalidation(t0).as_deref(), Some(token.as_str()));
        assert_eq!(session.take_due_revalidation(t0), None);
        assert!(session.is_authenticated());

        session.finish_revalidation(&token, Ok(grant("rotated"))).unwrap();
        assert_eq!(session.token(), Some("rotated"));
        assert_eq!(fx.tokens.load().unwrap().unwrap().token, "rotated");
    }

    #[test]
    fn test_revalidation_of_superseded_token_is_ignored() {
        let fx = Fixture::new();
        let token = make_token(FAR_FUTURE_EXP);
        fx.persist(&token);

        let mut session = fx.restore();
        let claimed = session.take_due_revalidation(Instant::now()).unwrap();
        fx.provider.0.lock().unwrap().login = Some(Ok(grant("fresh")));
        session.login().unwrap();

        let late = Err(AuthError::Refresh(StoreError::Status {
            status: 401,
            message: "invalid token".to_string(),
        }));
        session.finish_revalidation(&claimed, late).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.token(), Some("fresh"));
    }

    #[test]
    fn test_removed_token_file_expires_session() {
        let fx = Fixture::new();
        fx.persist(&make_token(FAR_FUTURE_EXP));

        let mut session = fx.restore();
        assert!(!session.check_storage());
        fx.tokens.clear().unwrap();
        assert!(session.check_storage());
        assert_eq!(session.state(), &SessionState::Expired);
        assert!(!session.check_storage());

        fx.provider.0.lock().unwrap().login = Some(Ok(grant("new")));
        session.login().unwrap();
        assert_eq!(session.token(), Some("new"));
    }

    #[test]
    fn test_confirm_against_mock_server() {
        let token = make_token(FAR_FUTURE_EXP);
        let mock = MockStore::builder().valid_token(&token).start();
        let config = Config {
            api_url: mock.url(),
            ..Config::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let tokens = TokenStore::at(dir.path().join("auth.toml"));
        tokens
            .save(&StoredSession {
                token: token.clone(),
                identity: identity(),
            })
            .unwrap();

        let provider = OAuthProvider::new(&config).unwrap();
        let mut session =
            SessionContext::restore(Box::new(provider), tokens, config.revalidate_interval)
                .unwrap();
        session.confirm().unwrap();
        assert_eq!(
            session.identity().map(|i| i.id.as_str()),
            Some(sncheck_test_utils::mock_store::MOCK_USER_ID)
        );
        assert_eq!(mock.last_authorization(), Some(token));
    }
}
