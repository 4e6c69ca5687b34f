use clap::Args;
use studyroom_core::Config;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{open_scheduler, print_event, report_error, CmdResult};

#[derive(Args)]
pub struct WatchArgs {
    /// Start each session's cycles as soon as it becomes due
    #[arg(long)]
    pub auto_start: bool,
}

pub fn run(args: WatchArgs) -> CmdResult {
    let mut config = Config::load()?;
    config.scheduler.auto_start_due |= args.auto_start;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(watch_sessions(&config))
}

async fn watch_sessions(config: &Config) -> CmdResult {
    let scheduler = open_scheduler(config)?;
    let mut events = scheduler.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = scheduler.spawn_watcher(shutdown_rx);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
        }
    }

    for id in scheduler.active_sessions() {
        if let Err(e) = scheduler.stop(&id) {
            report_error(&e);
        }
    }
    let _ = shutdown_tx.send(true);
    watcher.await?;
    scheduler.flush().await;

    while let Ok(event) = events.try_recv() {
        print_event(&event)?;
    }
    Ok(())
}
