//! Study session records and the in-memory store that owns them.

mod store;

pub use store::SessionStore;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A scheduled study activity.
///
/// `scheduled_at` and `fired_at` are host-local wall-clock times; the
/// scheduler does not model timezones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub topic: String,
    pub scheduled_at: NaiveDateTime,
    pub cycle_duration_secs: u64,
    pub total_cycles: u32,
    #[serde(default)]
    pub completed: bool,
    /// When the session was first raised as due or started by hand.
    #[serde(default)]
    pub fired_at: Option<NaiveDateTime>,
    /// Cycle the user stopped at, for the most recent abandoned run.
    #[serde(default)]
    pub abandoned_at_cycle: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Whether the due-time watcher should still consider this session.
    pub fn is_pending(&self) -> bool {
        !self.completed && self.fired_at.is_none()
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.is_pending() && self.scheduled_at <= now
    }
}

/// User-supplied definition for `create_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub subject: String,
    #[serde(default)]
    pub topic: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub cycle_duration_secs: u64,
    pub total_cycles: u32,
}

impl NewSession {
    /// Check the definition without building a session.
    ///
    /// # Errors
    /// Returns `InvalidSpec` when the cycle count or duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.total_cycles < 1 {
            return Err(CoreError::InvalidSpec(format!(
                "total_cycles must be at least 1 (got {})",
                self.total_cycles
            )));
        }
        if self.cycle_duration_secs == 0 {
            return Err(CoreError::InvalidSpec(
                "cycle_duration_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Validate and turn the definition into a fresh, unfired session.
    pub fn into_session(self) -> Result<Session> {
        self.validate()?;
        Ok(Session {
            id: Uuid::new_v4().to_string(),
            subject: self.subject,
            topic: self.topic,
            scheduled_at: self.date.and_time(self.time),
            cycle_duration_secs: self.cycle_duration_secs,
            total_cycles: self.total_cycles,
            completed: false,
            fired_at: None,
            abandoned_at_cycle: None,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_session(id: &str, scheduled_at: NaiveDateTime, cycles: u32) -> Session {
    Session {
        id: id.to_string(),
        subject: "Math".into(),
        topic: String::new(),
        scheduled_at,
        cycle_duration_secs: 3,
        total_cycles: cycles,
        completed: false,
        fired_at: None,
        abandoned_at_cycle: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cycles: u32, duration: u64) -> NewSession {
        NewSession {
            subject: "Physics".into(),
            topic: "Optics".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            cycle_duration_secs: duration,
            total_cycles: cycles,
        }
    }

    #[test]
    fn into_session_combines_date_and_time() {
        let session = spec(4, 1500).into_session().unwrap();
        assert_eq!(
            session.scheduled_at,
            NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap()
        );
        assert!(!session.completed);
        assert!(session.fired_at.is_none());
        assert_eq!(session.cycle_duration_secs, 1500);
    }

    #[test]
    fn zero_cycles_is_invalid() {
        let err = spec(0, 1500).into_session().unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn zero_duration_is_invalid() {
        let err = spec(1, 0).validate().unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn fired_session_is_never_due_again() {
        let at = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut session = test_session("a", at, 1);
        assert!(session.is_due(at));
        session.fired_at = Some(at);
        assert!(!session.is_due(at));
    }
}
