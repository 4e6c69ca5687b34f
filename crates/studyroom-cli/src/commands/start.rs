//! Foreground session runner.
//!
//! Prints every event as a JSON line. While running, stdin accepts
//! `p` (pause), `r` (resume) and `s` (stop); Ctrl-C stops the session.

use clap::Args;
use studyroom_core::{Config, Event, StudyScheduler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::{open_scheduler, print_event, report_error, CmdResult};

#[derive(Args)]
pub struct StartArgs {
    /// Session ID
    pub id: String,
}

pub fn run(args: StartArgs) -> CmdResult {
    let config = Config::load()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(&config, &args.id))
}

/// Apply a single-letter control command read from stdin.
fn handle_command(scheduler: &StudyScheduler, id: &str, command: &str) {
    let result = match command {
        "p" | "pause" => scheduler.pause(id),
        "r" | "resume" => scheduler.resume(id),
        "s" | "stop" => scheduler.stop(id),
        "" => return,
        other => {
            eprintln!("unknown command '{other}' (use p, r or s)");
            return;
        }
    };
    if let Err(e) = result {
        report_error(&e);
    }
}

fn is_terminal_for(event: &Event, id: &str) -> bool {
    event.session_id() == id
        && matches!(
            event,
            Event::SessionFinished { .. } | Event::SessionAbandoned { .. }
        )
}

async fn run_session(config: &Config, id: &str) -> CmdResult {
    let scheduler = open_scheduler(config)?;
    let mut events = scheduler.subscribe();
    scheduler.start_session(id)?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    print_event(&event)?;
                    if is_terminal_for(&event, id) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(command) => handle_command(&scheduler, id, command.trim()),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = scheduler.stop(id) {
                    report_error(&e);
                    break;
                }
            }
        }
    }

    // Let a trailing PersistenceFailed reach the user.
    scheduler.flush().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event)?;
    }
    Ok(())
}
