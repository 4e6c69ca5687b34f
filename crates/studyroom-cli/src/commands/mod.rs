pub mod config;
pub mod session;
pub mod start;
pub mod watch;

use std::error::Error;
use std::sync::Arc;

use studyroom_core::persistence::SessionPersistence;
use studyroom_core::{Config, CoreError, Event, SessionDb, StudyScheduler};

pub type CmdResult = Result<(), Box<dyn Error>>;

/// Build a scheduler over the on-disk database, seeded with stored sessions.
///
/// Must be called from within the command's tokio runtime.
pub fn open_scheduler(config: &Config) -> Result<StudyScheduler, Box<dyn Error>> {
    let db = Arc::new(SessionDb::open()?);
    let sessions = db.load_sessions()?;
    let scheduler = StudyScheduler::new(config.scheduler.clone(), db)?;
    scheduler.restore(sessions);
    Ok(scheduler)
}

/// One event per line, as JSON.
pub fn print_event(event: &Event) -> CmdResult {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

pub fn report_error(e: &(dyn Error + 'static)) {
    match e.downcast_ref::<CoreError>() {
        Some(core) => eprintln!("error[{}]: {core}", core.code()),
        None => eprintln!("error: {e}"),
    }
}
