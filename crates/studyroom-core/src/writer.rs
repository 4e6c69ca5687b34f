//! Background writer for the persistence collaborator.
//!
//! Session changes are queued by id and written on a blocking thread in
//! queue order. Tick loops and command handlers only enqueue, so a slow or
//! locked database never holds up a countdown.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::events::Event;
use crate::persistence::SessionPersistence;
use crate::session::SessionStore;

#[derive(Debug)]
enum WriteOp {
    /// Write the store's current copy of the session.
    Upsert(String),
    Delete(String),
    /// Acknowledged once every earlier op has been attempted.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub(crate) struct PersistWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl PersistWriter {
    /// Start the writer thread. Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        store: SessionStore,
        persistence: Arc<dyn SessionPersistence>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || write_loop(rx, &store, persistence.as_ref(), &events));
        Self { tx }
    }

    pub(crate) fn upsert(&self, session_id: &str) {
        self.send(WriteOp::Upsert(session_id.to_string()));
    }

    pub(crate) fn delete(&self, session_id: &str) {
        self.send(WriteOp::Delete(session_id.to_string()));
    }

    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn send(&self, op: WriteOp) {
        if let Err(e) = self.tx.send(op) {
            warn!(op = ?e.0, "persistence writer has stopped");
        }
    }
}

fn write_loop(
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    store: &SessionStore,
    persistence: &dyn SessionPersistence,
    events: &broadcast::Sender<Event>,
) {
    while let Some(op) = rx.blocking_recv() {
        match op {
            WriteOp::Upsert(id) => {
                // Latest state wins; a session deleted since was queued is skipped.
                let Ok(session) = store.get(&id) else {
                    continue;
                };
                if let Err(e) = persistence.persist(&session) {
                    report_failure(events, &id, e);
                }
            }
            WriteOp::Delete(id) => {
                if let Err(e) = persistence.delete(&id) {
                    report_failure(events, &id, e);
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("persistence writer stopped");
}

fn report_failure(events: &broadcast::Sender<Event>, session_id: &str, e: CoreError) {
    warn!(session_id = %session_id, error = %e, "persisting session failed");
    let _ = events.send(Event::PersistenceFailed {
        session_id: session_id.to_string(),
        reason: e.to_string(),
        at: Utc::now(),
    });
}
