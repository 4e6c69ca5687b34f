//! Session management commands for CLI.

use chrono::{NaiveDate, NaiveTime};
use clap::Subcommand;
use studyroom_core::{Config, CoreError, Event, NewSession, Session, StudyScheduler};

use super::{open_scheduler, CmdResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Schedule a new study session
    Add {
        /// Subject label
        #[arg(long)]
        subject: String,
        /// Topic label
        #[arg(long, default_value = "")]
        topic: String,
        /// Date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        /// Time of day (HH:MM or HH:MM:SS)
        #[arg(long, value_parser = parse_time)]
        time: NaiveTime,
        /// Length of one cycle in seconds (default from config)
        #[arg(long)]
        duration: Option<u64>,
        /// Number of cycles (default from config)
        #[arg(long)]
        cycles: Option<u32>,
    },
    /// List sessions, earliest first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one session as JSON
    Show {
        /// Session ID
        id: String,
    },
    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("expected HH:MM or HH:MM:SS: {e}"))
}

fn status(session: &Session) -> String {
    if session.completed {
        "completed".into()
    } else if let Some(cycle) = session.abandoned_at_cycle {
        format!("stopped at cycle {cycle}/{}", session.total_cycles)
    } else if session.fired_at.is_some() {
        "due".into()
    } else {
        "scheduled".into()
    }
}

pub fn run(action: SessionAction) -> CmdResult {
    let config = Config::load()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_with_scheduler(&config, action))
}

/// Apply the action, then wait for its writes and fail if any was rejected.
async fn run_with_scheduler(config: &Config, action: SessionAction) -> CmdResult {
    let scheduler = open_scheduler(config)?;
    let mut events = scheduler.subscribe();
    apply(&scheduler, config, action)?;
    scheduler.flush().await;
    while let Ok(event) = events.try_recv() {
        if let Event::PersistenceFailed { reason, .. } = event {
            return Err(CoreError::PersistenceFailed(reason).into());
        }
    }
    Ok(())
}

fn apply(scheduler: &StudyScheduler, config: &Config, action: SessionAction) -> CmdResult {
    match action {
        SessionAction::Add {
            subject,
            topic,
            date,
            time,
            duration,
            cycles,
        } => {
            let session = scheduler.create_session(NewSession {
                subject,
                topic,
                date,
                time,
                cycle_duration_secs: duration.unwrap_or(config.defaults.cycle_duration_secs),
                total_cycles: cycles.unwrap_or(config.defaults.total_cycles),
            })?;
            eprintln!("Session created: {}", session.id);
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        SessionAction::List { json } => {
            let sessions = scheduler.store().list();
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions scheduled.");
            } else {
                for s in &sessions {
                    println!(
                        "{}  {}  {:<20}  {}x{}s  {}",
                        s.id,
                        s.scheduled_at.format("%Y-%m-%d %H:%M"),
                        s.subject,
                        s.total_cycles,
                        s.cycle_duration_secs,
                        status(s)
                    );
                }
            }
        }
        SessionAction::Show { id } => {
            let session = scheduler.store().get(&id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        SessionAction::Delete { id } => {
            scheduler.delete_session(&id)?;
            println!("Session deleted: {id}");
        }
    }
    Ok(())
}
