//! Realtime partial-match suggestions.
//!
//! Input changes are debounced on the caller side, a background worker runs
//! the queries, and every query carries an increasing id so a slow response
//! can never replace the result of a later one.

use crate::store::{RecordStore, SUGGESTION_LIMIT};
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Queries shorter than this never reach the store.
pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub serial_number: String,
    pub is_insurance: bool,
}

pub fn should_fetch(query: &str, enabled: bool) -> bool {
    enabled && query.chars().count() >= MIN_QUERY_CHARS
}

/// Single blocking fetch. Failures degrade to an empty list.
pub fn fetch_suggestions(store: &dyn RecordStore, query: &str, enabled: bool) -> Vec<Suggestion> {
    if !should_fetch(query, enabled) {
        return Vec::new();
    }
    run_query(store, query).unwrap_or_default()
}

fn run_query(store: &dyn RecordStore, query: &str) -> Result<Vec<Suggestion>, String> {
    match store.find_partial(query, SUGGESTION_LIMIT) {
        Ok(records) => Ok(records
            .into_iter()
            .take(SUGGESTION_LIMIT)
            .map(|r| Suggestion {
                serial_number: r.serial_number,
                is_insurance: r.is_insurance,
            })
            .collect()),
        Err(e) => {
            log::debug!("Suggestion query {query:?} failed: {e}");
            Err(e.to_string())
        }
    }
}

/// Query sent to the worker thread
#[derive(Debug, Clone)]
pub struct SuggestionQuery {
    pub id: u64,
    pub text: String,
}

/// Results from the worker thread
#[derive(Debug, Clone, Default)]
pub struct SuggestionResults {
    pub query_id: u64,
    pub suggestions: Vec<Suggestion>,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Spawn the suggestion worker thread
pub fn spawn_suggestion_worker(
    store: Arc<dyn RecordStore>,
    query_rx: Receiver<SuggestionQuery>,
    result_tx: Sender<SuggestionResults>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(mut query) = query_rx.recv() {
            // Drain pending queries, keep only the latest
            while let Ok(next) = query_rx.try_recv() {
                query = next;
            }

            let start = Instant::now();
            let (suggestions, error) = match run_query(store.as_ref(), &query.text) {
                Ok(suggestions) => (suggestions, None),
                Err(e) => (Vec::new(), Some(e)),
            };

            let sent = result_tx.send(SuggestionResults {
                query_id: query.id,
                suggestions,
                duration: start.elapsed(),
                error,
            });
            if sent.is_err() {
                break;
            }
        }
    })
}

/// Debounced, last-request-wins front end for the suggestion worker.
pub struct SuggestionFetcher {
    debounce: Duration,
    query_tx: Sender<SuggestionQuery>,
    result_rx: Receiver<SuggestionResults>,
    /// Latest input that has not been dispatched yet
    pending: Option<String>,
    last_input: Option<Instant>,
    last_dispatch: Option<Instant>,
    last_sent: Option<String>,
    /// Id of the most recently issued query
    query_counter: u64,
    /// Id of the query whose results are currently shown
    applied_id: u64,
    suggestions: Vec<Suggestion>,
}

impl SuggestionFetcher {
    pub fn new(store: Arc<dyn RecordStore>, debounce: Duration) -> Self {
        let (query_tx, query_rx) = mpsc::channel();
        let (result_tx, result_rx) = mpsc::channel();
        spawn_suggestion_worker(store, query_rx, result_tx);

        Self {
            debounce,
            query_tx,
            result_rx,
            pending: None,
            last_input: None,
            last_dispatch: None,
            last_sent: None,
            query_counter: 0,
            applied_id: 0,
            suggestions: Vec::new(),
        }
    }

    /// Record new input. Short or disabled input clears the list immediately
    /// and supersedes anything still in flight.
    pub fn input(&mut self, text: &str, enabled: bool, now: Instant) {
        if !should_fetch(text, enabled) {
            self.pending = None;
            self.last_sent = None;
            self.suggestions.clear();
            self.query_counter += 1;
            self.applied_id = self.query_counter;
            return;
        }
        self.pending = Some(text.to_string());
        self.last_input = Some(now);
    }

    /// Dispatch the pending input once it has been stable for the debounce
    /// window, at most once per window. Returns true if a query was sent.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(text) = self.pending.as_ref() else {
            return false;
        };
        let quiet = self
            .last_input
            .is_none_or(|t| now.duration_since(t) >= self.debounce);
        let cooled = self
            .last_dispatch
            .is_none_or(|t| now.duration_since(t) >= self.debounce);
        if !quiet || !cooled {
            return false;
        }

        let text = text.clone();
        self.pending = None;
        if self.last_sent.as_deref() == Some(text.as_str()) {
            return false;
        }

        self.query_counter += 1;
        self.last_dispatch = Some(now);
        self.last_sent = Some(text.clone());
        log::debug!("Suggestion query #{} {:?}", self.query_counter, text);
        self.query_tx
            .send(SuggestionQuery {
                id: self.query_counter,
                text,
            })
            .is_ok()
    }

    /// Accept results only if they are newer than the ones on display.
    pub fn apply(&mut self, results: SuggestionResults) -> bool {
        if results.query_id <= self.applied_id {
            log::debug!("Dropping stale suggestions for query #{}", results.query_id);
            return false;
        }
        match &results.error {
            Some(e) => log::warn!("Suggestion query #{} failed: {e}", results.query_id),
            None => log::debug!(
                "Suggestion query #{}: {} hits in {:?}",
                results.query_id,
                results.suggestions.len(),
                results.duration
            ),
        }
        self.applied_id = results.query_id;
        self.suggestions = results.suggestions;
        true
    }

    /// Poll for results from worker (non-blocking). Returns true if the list changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(results) = self.result_rx.try_recv() {
            changed |= self.apply(results);
        }
        changed
    }

    /// Block until the latest dispatched query has been answered or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_loading() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.result_rx.recv_timeout(remaining) {
                Ok(results) => {
                    self.apply(results);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
        true
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    /// A query newer than the displayed results is in flight.
    pub fn is_loading(&self) -> bool {
        self.query_counter > self.applied_id
    }
}
