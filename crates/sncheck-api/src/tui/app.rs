//! Quick-lookup state and event loop

use super::input::TextInput;
use super::ui;
use crate::auth::{AuthGrant, IdentityProvider};
use crate::config::Config;
use crate::error::AuthError;
use crate::op::OpState;
use crate::search::{SearchResult, lookup};
use crate::session::{SessionContext, SessionState};
use crate::settings::OrganizationSettings;
use crate::store::{RecordStore, RestStore};
use crate::suggest::SuggestionFetcher;
use anyhow::Result;
use crossterm::{
    cursor::SetCursorStyle,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend, widgets::ListState};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

const HISTORY_LIMIT: usize = 50;

pub struct Toast {
    pub message: String,
    pub expires_at: Instant,
    pub is_error: bool,
}

impl Toast {
    fn new(message: impl Into<String>, is_error: bool) -> Self {
        Self {
            message: message.into(),
            expires_at: Instant::now() + Duration::from_secs(3),
            is_error,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

struct LookupRequest {
    id: u64,
    term: String,
}

struct LookupResponse {
    id: u64,
    result: SearchResult,
}

fn spawn_lookup_worker(
    store: Arc<dyn RecordStore>,
    request_rx: Receiver<LookupRequest>,
    response_tx: Sender<LookupResponse>,
) {
    thread::spawn(move || {
        while let Ok(request) = request_rx.recv() {
            let result = lookup(store.as_ref(), &request.term);
            if response_tx
                .send(LookupResponse {
                    id: request.id,
                    result,
                })
                .is_err()
            {
                break;
            }
        }
    });
}

struct RevalidationResponse {
    token: String,
    result: Result<AuthGrant, AuthError>,
}

/// Session refreshes run here so a slow identity provider never stalls a frame.
fn spawn_revalidation_worker(
    provider: Arc<dyn IdentityProvider>,
    request_rx: Receiver<String>,
    response_tx: Sender<RevalidationResponse>,
) {
    thread::spawn(move || {
        while let Ok(token) = request_rx.recv() {
            let result = provider.refresh(&token);
            if response_tx
                .send(RevalidationResponse { token, result })
                .is_err()
            {
                break;
            }
        }
    });
}

pub struct App {
    pub session: SessionContext,
    /// Shared by the workers; refreshed tokens are swapped in here
    store: RestStore,
    pub settings: OrganizationSettings,
    pub input: TextInput,
    pub suggestions: SuggestionFetcher,
    pub suggestion_state: ListState,
    pub lookup: OpState<SearchResult>,
    /// Term of the lookup currently in flight
    pub lookup_term: String,
    lookup_id: u64,
    lookup_tx: Sender<LookupRequest>,
    lookup_rx: Receiver<LookupResponse>,
    revalidation_tx: Sender<String>,
    revalidation_rx: Receiver<RevalidationResponse>,
    revalidation_pending: bool,
    /// Completed lookups, newest first
    pub history: Vec<SearchResult>,
    pub toast: Option<Toast>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        config: &Config,
        session: SessionContext,
        settings: OrganizationSettings,
    ) -> Result<Self> {
        let store = session.store(config)?;
        let shared: Arc<dyn RecordStore> = Arc::new(store.clone());
        let (lookup_tx, request_rx) = mpsc::channel();
        let (response_tx, lookup_rx) = mpsc::channel();
        spawn_lookup_worker(shared.clone(), request_rx, response_tx);

        let (revalidation_tx, request_rx) = mpsc::channel();
        let (response_tx, revalidation_rx) = mpsc::channel();
        spawn_revalidation_worker(session.provider(), request_rx, response_tx);

        Ok(Self {
            session,
            store,
            settings,
            input: TextInput::default(),
            suggestions: SuggestionFetcher::new(shared, config.debounce),
            suggestion_state: ListState::default(),
            lookup: OpState::Idle,
            lookup_term: String::new(),
            lookup_id: 0,
            lookup_tx,
            lookup_rx,
            revalidation_tx,
            revalidation_rx,
            revalidation_pending: false,
            history: Vec::new(),
            toast: None,
            should_quit: false,
        })
    }

    fn enabled(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn selected_suggestion(&self) -> Option<&str> {
        let index = self.suggestion_state.selected()?;
        self.suggestions
            .suggestions()
            .get(index)
            .map(|s| s.serial_number.as_str())
    }

    fn on_input_changed(&mut self, now: Instant) {
        let enabled = self.enabled();
        self.suggestions.input(&self.input.text, enabled, now);
        self.sync_selection();
    }

    fn sync_selection(&mut self) {
        let count = self.suggestions.suggestions().len();
        match self.suggestion_state.selected() {
            _ if count == 0 => self.suggestion_state.select(None),
            Some(i) if i < count => {}
            _ => self.suggestion_state.select(Some(0)),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let count = self.suggestions.suggestions().len();
        if count == 0 {
            return;
        }
        let current = self.suggestion_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, count as isize - 1);
        self.suggestion_state.select(Some(next as usize));
    }

    fn accept_suggestion(&mut self, now: Instant) {
        if let Some(serial) = self.selected_suggestion().map(str::to_string) {
            self.input.set(&serial);
            self.on_input_changed(now);
        }
    }

    fn start_lookup(&mut self) {
        let term = self.input.text.trim().to_string();
        if term.is_empty() {
            return;
        }
        if !self.enabled() {
            self.toast = Some(Toast::new(
                "Session expired. Run `sncheck auth login` to continue.",
                true,
            ));
            return;
        }

        self.lookup_id += 1;
        self.lookup_term = term.clone();
        self.lookup.start();
        if self
            .lookup_tx
            .send(LookupRequest {
                id: self.lookup_id,
                term,
            })
            .is_err()
        {
            self.lookup
                .finish::<&str>(Err("lookup worker stopped"));
        }
    }

    /// Apply the response to the latest lookup; older ones are dropped.
    fn poll_lookup(&mut self) {
        while let Ok(response) = self.lookup_rx.try_recv() {
            if response.id != self.lookup_id {
                continue;
            }
            match &response.result.error {
                Some(e) => self.lookup.finish(Err(e.as_str())),
                None => self.lookup.finish::<&str>(Ok(response.result.clone())),
            }
            self.history.insert(0, response.result);
            self.history.truncate(HISTORY_LIMIT);
        }
    }

    fn check_session(&mut self, now: Instant) {
        if self.session.check_storage() {
            self.store.set_token(None);
            self.toast = Some(Toast::new("Signed out in another process", true));
            self.on_input_changed(now);
            return;
        }
        if self.revalidation_pending {
            return;
        }
        if let Some(token) = self.session.take_due_revalidation(now) {
            self.revalidation_pending = self.revalidation_tx.send(token).is_ok();
        }
    }

    fn poll_revalidation(&mut self, now: Instant) {
        while let Ok(response) = self.revalidation_rx.try_recv() {
            self.revalidation_pending = false;
            let outcome = self
                .session
                .finish_revalidation(&response.token, response.result);
            self.store
                .set_token(self.session.token().map(str::to_string));
            if let Err(e) = outcome {
                self.toast = Some(Toast::new(format!("Session expired: {e}"), true));
                self.on_input_changed(now);
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                self.should_quit = true
            }
            (KeyCode::Enter, _) => self.start_lookup(),
            (KeyCode::Tab, _) => self.accept_suggestion(now),
            (KeyCode::Up, _) => self.move_selection(-1),
            (KeyCode::Down, _) => self.move_selection(1),
            (code, modifiers) => {
                if self.input.handle_key(code, modifiers) {
                    self.on_input_changed(now);
                }
            }
        }
    }

    /// Everything that is not driven by a key press.
    pub fn tick(&mut self, now: Instant) {
        self.poll_revalidation(now);
        self.check_session(now);
        self.suggestions.tick(now);
        if self.suggestions.poll() {
            self.sync_selection();
        }
        self.poll_lookup();
        if self.toast.as_ref().is_some_and(Toast::is_expired) {
            self.toast = None;
        }
    }

    pub fn session_label(&self) -> String {
        match self.session.state() {
            SessionState::Authenticated(identity) => identity.email.clone(),
            state => state.name().to_string(),
        }
    }
}

/// Run the quick-lookup UI until the user quits.
pub fn run(config: &Config, session: SessionContext, settings: OrganizationSettings) -> Result<()> {
    let mut app = App::new(config, session, settings)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, SetCursorStyle::BlinkingBar)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        SetCursorStyle::DefaultUserShape
    )?;
    terminal.show_cursor()?;

    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    const FRAME_TIME: Duration = Duration::from_millis(16);

    loop {
        let frame_start = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key, Instant::now());
            }
            if app.should_quit {
                return Ok(());
            }
        }

        app.tick(Instant::now());
        terminal.draw(|f| ui::render(f, app))?;

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME_TIME {
            thread::sleep(FRAME_TIME - elapsed);
        }
    }
}
