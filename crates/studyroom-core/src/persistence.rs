//! Boundary to durable storage.
//!
//! The scheduler never reads from storage on its own; the surrounding
//! application calls `load_sessions()` once at startup and seeds the store.
//! After each session change the runtime hands the record to `persist()` and
//! carries on whatever the outcome.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::session::Session;

pub trait SessionPersistence: Send + Sync {
    fn load_sessions(&self) -> Result<Vec<Session>>;

    /// Insert or replace the stored copy of `session`.
    fn persist(&self, session: &Session) -> Result<()>;

    fn delete(&self, id: &str) -> Result<()>;
}

/// Keeps persisted sessions in process memory. Useful when embedding the
/// scheduler without a database, and in tests.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    sessions: Mutex<BTreeMap<String, Session>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored copy of a session, if any.
    pub fn stored(&self, id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(sessions.values().cloned().collect())
    }

    fn persist(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;
    use chrono::NaiveDate;

    #[test]
    fn memory_persistence_upserts_and_deletes() {
        let at = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let p = MemoryPersistence::new();
        let mut s = test_session("a", at, 2);
        p.persist(&s).unwrap();
        s.completed = true;
        p.persist(&s).unwrap();
        assert_eq!(p.load_sessions().unwrap().len(), 1);
        assert!(p.stored("a").unwrap().completed);
        p.delete("a").unwrap();
        assert!(p.load_sessions().unwrap().is_empty());
    }
}
