use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;

use super::Session;
use crate::error::{CoreError, Result};

/// Shared in-memory collection of sessions.
///
/// Cloning the store clones the handle, not the data. Every read-modify-write
/// happens under a single lock so the watcher and orchestrators never
/// interleave on one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<BTreeMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a session. Rejects duplicate ids and invalid cycle settings.
    pub fn add(&self, session: Session) -> Result<()> {
        if session.total_cycles < 1 || session.cycle_duration_secs == 0 {
            return Err(CoreError::InvalidSpec(format!(
                "session {} has {} cycles of {}s",
                session.id, session.total_cycles, session.cycle_duration_secs
            )));
        }
        let mut sessions = self.lock();
        if sessions.contains_key(&session.id) {
            return Err(CoreError::InvalidSpec(format!(
                "duplicate session id {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Session> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(id))
    }

    /// All sessions, earliest scheduled first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.lock().values().cloned().collect();
        sort_by_due(&mut sessions);
        sessions
    }

    pub fn remove(&self, id: &str) -> Result<Session> {
        self.lock()
            .remove(id)
            .ok_or_else(|| CoreError::not_found(id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending sessions whose time has come, in firing order.
    pub fn due(&self, now: NaiveDateTime) -> Vec<Session> {
        let mut due: Vec<Session> = self
            .lock()
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        sort_by_due(&mut due);
        due
    }

    /// Record that a session was raised as due (or started by hand).
    ///
    /// Returns the updated session the first time, `None` if it had already
    /// fired or completed. Fired state is sticky.
    pub fn mark_fired(&self, id: &str, at: NaiveDateTime) -> Result<Option<Session>> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(id).ok_or_else(|| CoreError::not_found(id))?;
        if session.fired_at.is_some() || session.completed {
            return Ok(None);
        }
        session.fired_at = Some(at);
        Ok(Some(session.clone()))
    }

    /// Flag a session as completed. Only valid once, and only after it fired.
    pub fn mark_completed(&self, id: &str) -> Result<Session> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(id).ok_or_else(|| CoreError::not_found(id))?;
        if session.completed {
            return Err(CoreError::AlreadyCompleted { id: id.to_string() });
        }
        if session.fired_at.is_none() {
            return Err(CoreError::invalid_transition("complete", "not started"));
        }
        session.completed = true;
        session.abandoned_at_cycle = None;
        Ok(session.clone())
    }

    /// Remember where the user stopped. Leaves `completed` untouched.
    pub fn mark_abandoned(&self, id: &str, cycle_index: u32) -> Result<Session> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(id).ok_or_else(|| CoreError::not_found(id))?;
        session.abandoned_at_cycle = Some(cycle_index);
        Ok(session.clone())
    }
}

fn sort_by_due(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
