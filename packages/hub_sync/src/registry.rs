//! In-memory view of the server's session list.
//!
//! The registry is the only owner of [`Session`] values. Broadcast events are
//! applied to entries matched by id; entries the client has never heard of are
//! left alone so a stale broadcast cannot resurrect a deleted session.

use crate::models::Session;

/// Liveness reported by a `process_update` broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Exited,
    Alive(String),
}

impl ProcessStatus {
    /// Parse `process_exit` or `process_alive:<state>`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == "process_exit" {
            return Some(Self::Exited);
        }
        raw.strip_prefix("process_alive:")
            .map(|state| Self::Alive(state.to_string()))
    }
}

/// Result of applying a `session_update` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingTransition {
    pub was_streaming: bool,
    pub is_streaming: bool,
}

impl StreamingTransition {
    pub fn finished(&self) -> bool {
        self.was_streaming && !self.is_streaming
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list with a fresh fetch.
    pub fn replace_all(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    pub fn get(&self, id: i64) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: i64) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Insert a broadcast session at the front unless its id is already known.
    /// Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, session: Session) -> bool {
        if self.contains(session.id) {
            return false;
        }
        self.sessions.insert(0, session);
        true
    }

    pub fn set_title(&mut self, id: i64, title: &str) -> bool {
        match self.get_mut(id) {
            Some(session) => {
                session.title = title.to_string();
                true
            }
            None => false,
        }
    }

    /// Apply a streaming flag change and derive the process fields from it.
    pub fn apply_streaming(&mut self, id: i64, streaming: bool) -> Option<StreamingTransition> {
        let session = self.get_mut(id)?;
        let was_streaming = session.streaming;
        session.streaming = streaming;
        if streaming {
            session.process_alive = true;
            session.process_state = "busy".to_string();
        } else if session.process_alive {
            session.process_state = "idle".to_string();
        }
        Some(StreamingTransition {
            was_streaming,
            is_streaming: streaming,
        })
    }

    pub fn apply_process(&mut self, id: i64, status: ProcessStatus) -> bool {
        let Some(session) = self.get_mut(id) else {
            return false;
        };
        match status {
            ProcessStatus::Exited => {
                session.process_alive = false;
                session.process_state.clear();
            }
            ProcessStatus::Alive(state) => {
                session.process_alive = true;
                session.process_state = state;
            }
        }
        true
    }

    pub fn remove(&mut self, id: i64) -> Option<Session> {
        let idx = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(idx))
    }
}
