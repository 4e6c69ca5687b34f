use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::CyclePhase;

/// Every state change in the scheduler produces an Event.
/// The presentation layer subscribes; it never drives ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The watcher noticed a session's scheduled time has arrived.
    SessionDue {
        session_id: String,
        scheduled_at: NaiveDateTime,
        at: DateTime<Utc>,
    },
    CycleStarted {
        session_id: String,
        cycle_index: u32,
        total_cycles: u32,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    CycleTick {
        session_id: String,
        cycle_index: u32,
        remaining_secs: u64,
        phase: CyclePhase,
        at: DateTime<Utc>,
    },
    CyclePaused {
        session_id: String,
        cycle_index: u32,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    CycleResumed {
        session_id: String,
        cycle_index: u32,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    CycleExpired {
        session_id: String,
        cycle_index: u32,
        at: DateTime<Utc>,
    },
    /// All cycles ran; the session is now completed in the store.
    SessionFinished {
        session_id: String,
        at: DateTime<Utc>,
    },
    /// The user stopped before the last cycle expired.
    SessionAbandoned {
        session_id: String,
        cycle_index: u32,
        at: DateTime<Utc>,
    },
    /// The persistence collaborator rejected a write. In-memory state stands.
    PersistenceFailed {
        session_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::SessionDue { session_id, .. }
            | Event::CycleStarted { session_id, .. }
            | Event::CycleTick { session_id, .. }
            | Event::CyclePaused { session_id, .. }
            | Event::CycleResumed { session_id, .. }
            | Event::CycleExpired { session_id, .. }
            | Event::SessionFinished { session_id, .. }
            | Event::SessionAbandoned { session_id, .. }
            | Event::PersistenceFailed { session_id, .. } => session_id,
        }
    }

    /// Events after which the session record changed and should be persisted.
    pub fn changes_session(&self) -> bool {
        matches!(
            self,
            Event::SessionDue { .. } | Event::SessionFinished { .. } | Event::SessionAbandoned { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::CycleExpired {
            session_id: "a".into(),
            cycle_index: 2,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CycleExpired");
        assert_eq!(json["cycle_index"], 2);
        assert_eq!(event.session_id(), "a");
        assert!(!event.changes_session());
    }

    #[test]
    fn tick_phase_is_lowercase() {
        let event = Event::CycleTick {
            session_id: "a".into(),
            cycle_index: 1,
            remaining_secs: 10,
            phase: CyclePhase::Running,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "running");
    }
}
