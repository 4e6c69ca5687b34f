//! # Studyroom Core Library
//!
//! Schedules timed study sessions and runs a focus-cycle countdown for each.
//! The library is UI-agnostic: it only emits events. A CLI (or any other
//! presentation layer) subscribes to those events and issues commands.
//!
//! ## Architecture
//!
//! - **Session Store**: shared, mutex-guarded collection of sessions
//! - **Due-Time Watcher**: polls wall-clock time once a minute and raises
//!   `SessionDue` at most once per session
//! - **Cycle Timer Engine**: per-cycle countdown state machine driven by a
//!   one-second tick
//! - **Cycle Orchestrator**: sequences cycle `i` of `n` for one session and
//!   marks it completed after the last expiry
//! - **Runtime**: command surface tying the above to tokio tasks, a
//!   persistence writer, and an event broadcast channel
//!
//! ## Key Components
//!
//! - [`StudyScheduler`]: commands and event subscription
//! - [`SessionStore`]: in-memory source of truth
//! - [`CycleTimer`]: countdown state machine
//! - [`SessionDb`]: SQLite persistence used by the CLI
//! - [`Config`]: TOML configuration

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod timer;
pub mod watcher;
mod writer;

pub use error::{ConfigError, CoreError, DatabaseError};
pub use events::Event;
pub use orchestrator::{CycleOrchestrator, CycleSnapshot, RunStatus};
pub use persistence::{MemoryPersistence, SessionPersistence};
pub use runtime::StudyScheduler;
pub use session::{NewSession, Session, SessionStore};
pub use storage::{Config, SchedulerConfig, SessionDb, SessionDefaults};
pub use timer::{CyclePhase, CycleTimer};
pub use watcher::DueWatcher;
