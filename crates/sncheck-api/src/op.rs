use std::fmt::Display;
use std::time::{Duration, Instant};

/// Lifecycle of one asynchronous operation, driven explicitly by its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum OpState<T> {
    Idle,
    InFlight { started_at: Instant },
    Succeeded(T),
    Failed(String),
}

impl<T> Default for OpState<T> {
    fn default() -> Self {
        OpState::Idle
    }
}

impl<T> OpState<T> {
    pub fn start(&mut self) {
        *self = OpState::InFlight {
            started_at: Instant::now(),
        };
    }

    pub fn finish<E: Display>(&mut self, result: Result<T, E>) {
        *self = match result {
            Ok(value) => OpState::Succeeded(value),
            Err(e) => OpState::Failed(e.to_string()),
        };
    }

    pub fn reset(&mut self) {
        *self = OpState::Idle;
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, OpState::InFlight { .. })
    }

    /// Time spent in flight so far.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            OpState::InFlight { started_at } => Some(started_at.elapsed()),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            OpState::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            OpState::Failed(message) => Some(message),
            _ => None,
        }
    }
}
