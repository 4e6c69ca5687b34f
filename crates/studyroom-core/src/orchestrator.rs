//! Sequences the cycles of one session.
//!
//! The orchestrator is synchronous: it is handed ticks by the runtime and
//! answers with the events those ticks produced. Each cycle gets a fresh
//! [`CycleTimer`]; an expired timer is dropped, never restarted.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::session::SessionStore;
use crate::timer::{CyclePhase, CycleTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    /// Every cycle expired and the session was marked completed.
    Finished,
    /// Stopped by the user (or lost its session) before the last cycle.
    Abandoned,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunStatus::Active => "active",
            RunStatus::Finished => "finished",
            RunStatus::Abandoned => "abandoned",
        })
    }
}

/// Point-in-time view of a running session, for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub session_id: String,
    pub cycle_index: u32,
    pub total_cycles: u32,
    pub phase: CyclePhase,
    pub remaining_secs: u64,
    pub duration_secs: u64,
    pub status: RunStatus,
}

#[derive(Debug)]
pub struct CycleOrchestrator {
    session_id: String,
    cycle_duration_secs: u64,
    total_cycles: u32,
    timer: CycleTimer,
    status: RunStatus,
}

impl CycleOrchestrator {
    /// Bind to a session and start its first cycle.
    ///
    /// A session started before the watcher raised it (manual "start now")
    /// gets `fired_at = now` so it is never raised as due afterwards.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `AlreadyCompleted` if the session has
    /// already run all of its cycles.
    pub fn start(
        store: &SessionStore,
        session_id: &str,
        now: NaiveDateTime,
    ) -> Result<(Self, Vec<Event>)> {
        let session = store.get(session_id)?;
        if session.completed {
            return Err(CoreError::AlreadyCompleted {
                id: session_id.to_string(),
            });
        }
        if store.mark_fired(session_id, now)?.is_some() {
            info!(session_id = %session_id, "session started before it was due");
        }

        let mut orchestrator = Self {
            session_id: session.id,
            cycle_duration_secs: session.cycle_duration_secs,
            total_cycles: session.total_cycles,
            timer: CycleTimer::new(session_id, 1),
            status: RunStatus::Active,
        };
        orchestrator.timer.start(orchestrator.cycle_duration_secs)?;
        let started = orchestrator.cycle_started();
        Ok((orchestrator, vec![started]))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn cycle_index(&self) -> u32 {
        self.timer.cycle_index()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Active
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            session_id: self.session_id.clone(),
            cycle_index: self.timer.cycle_index(),
            total_cycles: self.total_cycles,
            phase: self.timer.phase(),
            remaining_secs: self.timer.remaining_secs(),
            duration_secs: self.timer.duration_secs(),
            status: self.status,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Feed one tick to the current cycle.
    ///
    /// A stopped or finished orchestrator ignores the tick, so a stop that
    /// lands between two ticks is always honoured before the next one.
    pub fn tick(&mut self, store: &SessionStore) -> Result<Vec<Event>> {
        if !self.is_active() {
            return Ok(Vec::new());
        }
        let mut events = self.timer.tick();
        if self.timer.phase() != CyclePhase::Expired {
            return Ok(events);
        }

        let finished_cycle = self.timer.cycle_index();
        info!(session_id = %self.session_id, cycle = finished_cycle, total = self.total_cycles, "cycle expired");

        if finished_cycle < self.total_cycles {
            self.timer = CycleTimer::new(self.session_id.clone(), finished_cycle + 1);
            self.timer.start(self.cycle_duration_secs)?;
            events.push(self.cycle_started());
            return Ok(events);
        }

        if let Err(e) = store.mark_completed(&self.session_id) {
            self.status = RunStatus::Abandoned;
            return Err(e);
        }
        self.status = RunStatus::Finished;
        info!(session_id = %self.session_id, "session finished");
        events.push(Event::SessionFinished {
            session_id: self.session_id.clone(),
            at: Utc::now(),
        });
        Ok(events)
    }

    pub fn pause(&mut self) -> Result<Event> {
        self.ensure_active("pause")?;
        self.timer.pause()
    }

    pub fn resume(&mut self) -> Result<Event> {
        self.ensure_active("resume")?;
        self.timer.resume()
    }

    /// Abandon the session at the current cycle. The session stays
    /// incomplete; a new start is needed to try again.
    pub fn stop(&mut self, store: &SessionStore) -> Result<Event> {
        self.ensure_active("stop")?;
        self.timer.stop()?;
        self.status = RunStatus::Abandoned;

        let cycle_index = self.timer.cycle_index();
        if let Err(e) = store.mark_abandoned(&self.session_id, cycle_index) {
            warn!(session_id = %self.session_id, error = %e, "could not record abandoned cycle");
        }
        info!(session_id = %self.session_id, cycle = cycle_index, "session abandoned");
        Ok(Event::SessionAbandoned {
            session_id: self.session_id.clone(),
            cycle_index,
            at: Utc::now(),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn ensure_active(&self, action: &'static str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(action, self.status))
        }
    }

    fn cycle_started(&self) -> Event {
        Event::CycleStarted {
            session_id: self.session_id.clone(),
            cycle_index: self.timer.cycle_index(),
            total_cycles: self.total_cycles,
            duration_secs: self.cycle_duration_secs,
            at: Utc::now(),
        }
    }
}
