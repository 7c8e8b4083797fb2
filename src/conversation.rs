use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

/// Default inactivity timeout for guided input, in seconds.
pub const CONVERSATION_TIMEOUT_SECS: u64 = 600;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Today,
    Day,
}

impl Flow {
    pub fn command(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Day => "day",
        }
    }
}

/// Explicit per-conversation state. `AwaitingSteps { date: None }` is the
/// submit-today flow, which resolves the calendar date at submission time;
/// `Some(date)` carries the stashed day of the submit-for-date flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowState {
    AwaitingDate,
    AwaitingSteps { date: Option<NaiveDate> },
}

#[derive(Clone, Debug)]
pub struct Session {
    pub flow: Flow,
    pub state: FlowState,
    touched: Instant,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionKey {
    pub chat_id: String,
    pub user_id: String,
}

impl SessionKey {
    pub fn new(chat_id: &str, user_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// Transient conversation state, scoped per (chat, user). Starting a new
/// flow replaces whatever the pair had running; expired sessions are
/// discarded silently.
pub struct ConversationManager {
    sessions: HashMap<SessionKey, Session>,
    timeout: Duration,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(CONVERSATION_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            timeout,
        }
    }

    pub fn begin(&mut self, key: SessionKey, flow: Flow, state: FlowState) {
        self.sessions.insert(
            key,
            Session {
                flow,
                state,
                touched: Instant::now(),
            },
        );
    }

    /// Removes and returns the live session for the key. The caller
    /// re-inserts via [`Self::resume`]-then-[`Self::begin`] when the flow
    /// stays open after the turn. An expired session is dropped here.
    pub fn resume(&mut self, key: &SessionKey) -> Option<Session> {
        let session = self.sessions.remove(key)?;
        if session.touched.elapsed() > self.timeout {
            return None;
        }
        Some(session)
    }

    /// Drops every expired session. Called opportunistically from the
    /// scheduler loop so abandoned conversations do not pile up.
    pub fn sweep(&mut self) {
        let timeout = self.timeout;
        self.sessions
            .retain(|_, session| session.touched.elapsed() <= timeout);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new()
    }
}
