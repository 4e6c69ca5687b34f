//! Command surface of the scheduler.
//!
//! [`StudyScheduler`] is what a presentation layer talks to: it owns the
//! session store, runs the due-time watcher and one tick task per running
//! session, queues changed sessions for the persistence writer, and fans
//! every event out to subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Local, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::orchestrator::{CycleOrchestrator, CycleSnapshot};
use crate::persistence::SessionPersistence;
use crate::session::{NewSession, Session, SessionStore};
use crate::storage::SchedulerConfig;
use crate::watcher::DueWatcher;
use crate::writer::PersistWriter;

type SharedOrchestrator = Arc<Mutex<CycleOrchestrator>>;

struct ActiveRun {
    orchestrator: SharedOrchestrator,
    task: JoinHandle<()>,
}

struct Inner {
    store: SessionStore,
    writer: PersistWriter,
    events: broadcast::Sender<Event>,
    config: SchedulerConfig,
    active: Mutex<HashMap<String, ActiveRun>>,
}

/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct StudyScheduler {
    inner: Arc<Inner>,
}

impl StudyScheduler {
    /// Build a scheduler and start its persistence writer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `Config` if an interval or the event buffer is zero.
    pub fn new(config: SchedulerConfig, persistence: Arc<dyn SessionPersistence>) -> Result<Self> {
        config.validate()?;
        let store = SessionStore::new();
        let (events, _) = broadcast::channel(config.event_buffer);
        let writer = PersistWriter::spawn(store.clone(), persistence, events.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                writer,
                events,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Ids of sessions whose cycles are currently running or paused.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self, session_id: &str) -> Option<CycleSnapshot> {
        let orchestrator = self.active().get(session_id)?.orchestrator.clone();
        let snapshot = lock(&orchestrator).snapshot();
        Some(snapshot)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Seed the store with sessions loaded from persistence at startup.
    ///
    /// Invalid or duplicate records are skipped with a warning. Returns the
    /// number of sessions added.
    pub fn restore(&self, sessions: Vec<Session>) -> usize {
        let mut added = 0;
        for session in sessions {
            let id = session.id.clone();
            match self.inner.store.add(session) {
                Ok(()) => added += 1,
                Err(e) => warn!(session_id = %id, error = %e, "skipping stored session"),
            }
        }
        info!(count = added, "sessions restored");
        added
    }

    /// Validate and store a new session.
    ///
    /// # Errors
    /// `InvalidSpec` if the cycle count or duration is zero; nothing is stored.
    pub fn create_session(&self, new_session: NewSession) -> Result<Session> {
        let session = new_session.into_session()?;
        self.inner.store.add(session.clone())?;
        info!(session_id = %session.id, scheduled_at = %session.scheduled_at, "session created");
        self.persist(&session.id);
        Ok(session)
    }

    /// Remove a session that is not currently running.
    pub fn delete_session(&self, session_id: &str) -> Result<Session> {
        if self.active().contains_key(session_id) {
            return Err(CoreError::invalid_transition("delete", "running"));
        }
        let session = self.inner.store.remove(session_id)?;
        info!(session_id = %session_id, "session deleted");
        self.inner.writer.delete(session_id);
        Ok(session)
    }

    /// Start the first cycle of a session and begin ticking it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// `NotFound`, `AlreadyCompleted`, or `InvalidTransition` when the
    /// session is already running.
    pub fn start_session(&self, session_id: &str) -> Result<()> {
        let mut active = self.active();
        if active.contains_key(session_id) {
            return Err(CoreError::invalid_transition("start", "running"));
        }

        let now = Local::now().naive_local();
        let (orchestrator, events) = CycleOrchestrator::start(&self.inner.store, session_id, now)?;
        self.persist(session_id);
        for event in events {
            self.dispatch(event);
        }

        let orchestrator = Arc::new(Mutex::new(orchestrator));
        let task = tokio::spawn(
            self.clone()
                .drive(session_id.to_string(), orchestrator.clone()),
        );
        active.insert(
            session_id.to_string(),
            ActiveRun { orchestrator, task },
        );
        info!(session_id = %session_id, "session started");
        Ok(())
    }

    pub fn pause(&self, session_id: &str) -> Result<()> {
        let orchestrator = self.running(session_id, "pause")?;
        let mut orch = lock(&orchestrator);
        let event = orch.pause()?;
        self.dispatch(event);
        Ok(())
    }

    pub fn resume(&self, session_id: &str) -> Result<()> {
        let orchestrator = self.running(session_id, "resume")?;
        let mut orch = lock(&orchestrator);
        let event = orch.resume()?;
        self.dispatch(event);
        Ok(())
    }

    /// Stop a running session early. Takes effect before its next tick.
    pub fn stop(&self, session_id: &str) -> Result<()> {
        let orchestrator = self.running(session_id, "stop")?;
        {
            let mut orch = lock(&orchestrator);
            let event = orch.stop(&self.inner.store)?;
            self.dispatch(event);
        }
        self.retire(session_id, &orchestrator, true);
        Ok(())
    }

    /// Same as [`stop`](Self::stop).
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        self.stop(session_id)
    }

    /// Wait until every persistence write queued so far has been attempted.
    ///
    /// Failures surface as `PersistenceFailed` events, not here.
    pub async fn flush(&self) {
        self.inner.writer.flush().await;
    }

    /// Spawn the due-time watcher. It runs until `shutdown` flips to `true`.
    ///
    /// With `auto_start_due` set, each due session is started immediately.
    pub fn spawn_watcher(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let watcher = DueWatcher::new(self.inner.store.clone(), self.inner.config.poll_interval());
        let scheduler = self.clone();
        tokio::spawn(watcher.run(shutdown, move |event| {
            let session_id = event.session_id().to_string();
            scheduler.dispatch(event);
            if scheduler.inner.config.auto_start_due {
                if let Err(e) = scheduler.start_session(&session_id) {
                    warn!(session_id = %session_id, error = %e, "auto-start failed");
                }
            }
        }))
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running(&self, session_id: &str, action: &'static str) -> Result<SharedOrchestrator> {
        if let Some(run) = self.active().get(session_id) {
            return Ok(run.orchestrator.clone());
        }
        self.inner.store.get(session_id)?;
        Err(CoreError::invalid_transition(action, "not running"))
    }

    /// Tick loop for one session.
    ///
    /// Ticks count down from where they left off: missed ticks (host
    /// suspended) are delayed, not replayed.
    async fn drive(self, session_id: String, orchestrator: SharedOrchestrator) {
        let period = self.inner.config.tick_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !self.tick_once(&session_id, &orchestrator) {
                break;
            }
        }
        self.retire(&session_id, &orchestrator, false);
    }

    /// Deliver one tick. Returns whether the session is still running.
    ///
    /// Cancellation is checked first, under the same lock `stop` takes.
    fn tick_once(&self, session_id: &str, orchestrator: &SharedOrchestrator) -> bool {
        let mut orch = lock(orchestrator);
        if !orch.is_active() {
            debug!(session_id = %session_id, "tick loop cancelled");
            return false;
        }
        match orch.tick(&self.inner.store) {
            Ok(events) => {
                for event in events {
                    self.dispatch(event);
                }
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "cycle tick failed");
                self.dispatch(Event::SessionAbandoned {
                    session_id: session_id.to_string(),
                    cycle_index: orch.cycle_index(),
                    at: Utc::now(),
                });
            }
        }
        orch.is_active()
    }

    /// Drop the active entry for `session_id` if it still belongs to
    /// `orchestrator` (a new run may have replaced it).
    fn retire(&self, session_id: &str, orchestrator: &SharedOrchestrator, abort: bool) {
        let mut active = self.active();
        let owned = active
            .get(session_id)
            .is_some_and(|run| Arc::ptr_eq(&run.orchestrator, orchestrator));
        if owned {
            if let Some(run) = active.remove(session_id) {
                if abort {
                    run.task.abort();
                }
            }
        }
    }

    /// Publish an event, then persist the session if the event changed it.
    fn dispatch(&self, event: Event) {
        let persist_id = event
            .changes_session()
            .then(|| event.session_id().to_string());
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
        if let Some(id) = persist_id {
            self.persist(&id);
        }
    }

    fn persist(&self, session_id: &str) {
        self.inner.writer.upsert(session_id);
    }
}

impl std::fmt::Debug for StudyScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudyScheduler")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.store.len())
            .field("active", &self.active_sessions())
            .finish()
    }
}

fn lock(orchestrator: &SharedOrchestrator) -> MutexGuard<'_, CycleOrchestrator> {
    orchestrator.lock().unwrap_or_else(|e| e.into_inner())
}
