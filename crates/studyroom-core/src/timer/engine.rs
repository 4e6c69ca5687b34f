//! Cycle timer engine.
//!
//! A per-cycle countdown state machine. It does not own a thread or a clock:
//! whoever drives it calls `tick()` once per tick interval and each call
//! removes exactly one second. Pausing therefore loses or gains nothing, no
//! matter how much wall-clock time passes before `resume()`.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running <-> Paused
//! Running | Paused -> Idle      (stop)
//! Running -> Expired            (remaining reaches 0, terminal)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut timer = CycleTimer::new("session-id", 1);
//! timer.start(1500)?;
//! // Once per second:
//! for event in timer.tick() { /* CycleTick, then CycleExpired at 0 */ }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Running,
    Paused,
    /// Countdown reached zero. A new timer is needed for the next cycle.
    Expired,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Running => "running",
            CyclePhase::Paused => "paused",
            CyclePhase::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Countdown for one cycle of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleTimer {
    session_id: String,
    cycle_index: u32,
    phase: CyclePhase,
    duration_secs: u64,
    remaining_secs: u64,
}

impl CycleTimer {
    /// Create an idle timer for cycle `cycle_index` (1-based) of a session.
    pub fn new(session_id: impl Into<String>, cycle_index: u32) -> Self {
        Self {
            session_id: session_id.into(),
            cycle_index,
            phase: CyclePhase::Idle,
            duration_secs: 0,
            remaining_secs: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn cycle_index(&self) -> u32 {
        self.cycle_index
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, duration_secs: u64) -> Result<()> {
        if self.phase != CyclePhase::Idle {
            return Err(CoreError::invalid_transition("start", self.phase));
        }
        if duration_secs == 0 {
            return Err(CoreError::InvalidSpec(
                "cycle duration must be greater than 0".into(),
            ));
        }
        self.duration_secs = duration_secs;
        self.remaining_secs = duration_secs;
        self.phase = CyclePhase::Running;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<Event> {
        if self.phase != CyclePhase::Running {
            return Err(CoreError::invalid_transition("pause", self.phase));
        }
        self.phase = CyclePhase::Paused;
        Ok(Event::CyclePaused {
            session_id: self.session_id.clone(),
            cycle_index: self.cycle_index,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    pub fn resume(&mut self) -> Result<Event> {
        if self.phase != CyclePhase::Paused {
            return Err(CoreError::invalid_transition("resume", self.phase));
        }
        self.phase = CyclePhase::Running;
        Ok(Event::CycleResumed {
            session_id: self.session_id.clone(),
            cycle_index: self.cycle_index,
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Abort the countdown. Remaining time is discarded.
    pub fn stop(&mut self) -> Result<()> {
        match self.phase {
            CyclePhase::Running | CyclePhase::Paused => {
                self.phase = CyclePhase::Idle;
                self.remaining_secs = 0;
                Ok(())
            }
            CyclePhase::Idle | CyclePhase::Expired => {
                Err(CoreError::invalid_transition("stop", self.phase))
            }
        }
    }

    /// Advance one second.
    ///
    /// Only does anything while `Running`. Returns a `CycleTick`, followed by
    /// `CycleExpired` on the tick that reaches zero; the phase is already
    /// `Expired` by the time the events are returned.
    pub fn tick(&mut self) -> Vec<Event> {
        if self.phase != CyclePhase::Running {
            return Vec::new();
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.phase = CyclePhase::Expired;
        }

        let now = Utc::now();
        let mut events = vec![Event::CycleTick {
            session_id: self.session_id.clone(),
            cycle_index: self.cycle_index,
            remaining_secs: self.remaining_secs,
            phase: self.phase,
            at: now,
        }];
        if self.phase == CyclePhase::Expired {
            events.push(Event::CycleExpired {
                session_id: self.session_id.clone(),
                cycle_index: self.cycle_index,
                at: now,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn start_pause_resume() {
        let mut timer = CycleTimer::new("s", 1);
        assert_eq!(timer.phase(), CyclePhase::Idle);

        timer.start(5).unwrap();
        assert_eq!(timer.phase(), CyclePhase::Running);
        assert_eq!(timer.remaining_secs(), 5);

        assert!(matches!(timer.pause().unwrap(), Event::CyclePaused { remaining_secs: 5, .. }));
        assert_eq!(timer.phase(), CyclePhase::Paused);

        assert!(matches!(timer.resume().unwrap(), Event::CycleResumed { .. }));
        assert_eq!(timer.phase(), CyclePhase::Running);
    }

    #[test]
    fn pause_while_idle_is_invalid_and_changes_nothing() {
        let mut timer = CycleTimer::new("s", 1);
        let err = timer.pause().unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(timer.phase(), CyclePhase::Idle);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn commands_after_expiry_are_invalid() {
        let mut timer = CycleTimer::new("s", 1);
        timer.start(1).unwrap();
        timer.tick();
        assert_eq!(timer.phase(), CyclePhase::Expired);
        assert!(timer.pause().is_err());
        assert!(timer.resume().is_err());
        assert!(timer.stop().is_err());
        assert!(timer.start(10).is_err());
        assert!(timer.tick().is_empty());
    }

    #[test]
    fn expiry_is_reported_with_the_last_tick() {
        let mut timer = CycleTimer::new("s", 3);
        timer.start(2).unwrap();

        let first = timer.tick();
        assert_eq!(first.len(), 1);
        assert_eq!(timer.remaining_secs(), 1);

        let last = timer.tick();
        assert_eq!(last.len(), 2);
        assert!(matches!(
            last[0],
            Event::CycleTick { remaining_secs: 0, phase: CyclePhase::Expired, .. }
        ));
        assert!(matches!(last[1], Event::CycleExpired { cycle_index: 3, .. }));
    }

    #[test]
    fn paused_timer_ignores_ticks() {
        let mut timer = CycleTimer::new("s", 1);
        timer.start(10).unwrap();
        timer.tick();
        timer.pause().unwrap();
        for _ in 0..100 {
            assert!(timer.tick().is_empty());
        }
        assert_eq!(timer.remaining_secs(), 9);
    }

    #[test]
    fn stop_discards_remaining_time() {
        let mut timer = CycleTimer::new("s", 1);
        timer.start(10).unwrap();
        timer.pause().unwrap();
        timer.stop().unwrap();
        assert_eq!(timer.phase(), CyclePhase::Idle);
        assert_eq!(timer.remaining_secs(), 0);
        assert!(timer.stop().is_err());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut timer = CycleTimer::new("s", 1);
        assert_eq!(timer.start(0).unwrap_err().code(), "invalid_spec");
        assert_eq!(timer.phase(), CyclePhase::Idle);
    }

    proptest! {
        #[test]
        fn pause_resume_preserves_remaining(duration in 2u64..5_000, ticks in 0u64..5_000, idle in 0usize..50) {
            let mut timer = CycleTimer::new("s", 1);
            timer.start(duration).unwrap();
            for _ in 0..ticks.min(duration - 1) {
                timer.tick();
            }
            let before = timer.remaining_secs();
            timer.pause().unwrap();
            for _ in 0..idle {
                timer.tick();
            }
            timer.resume().unwrap();
            prop_assert_eq!(timer.remaining_secs(), before);
        }

        #[test]
        fn expires_after_exactly_duration_ticks(duration in 1u64..2_000) {
            let mut timer = CycleTimer::new("s", 1);
            timer.start(duration).unwrap();
            let mut expired_at = None;
            for n in 1..=duration + 5 {
                let events = timer.tick();
                if events.iter().any(|e| matches!(e, Event::CycleExpired { .. })) {
                    prop_assert!(expired_at.is_none());
                    expired_at = Some(n);
                }
            }
            prop_assert_eq!(expired_at, Some(duration));
        }
    }
}
