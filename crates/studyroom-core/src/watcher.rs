//! Due-time watcher.
//!
//! Polls the session store on a fixed interval and raises `SessionDue` once
//! per session when its scheduled time has arrived. A session that became due
//! while the process was asleep fires on the next poll, once.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::events::Event;
use crate::session::SessionStore;

pub struct DueWatcher {
    store: SessionStore,
    poll_interval: Duration,
}

impl DueWatcher {
    pub fn new(store: SessionStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Run one poll against `now`.
    ///
    /// Returns a `SessionDue` for every pending session scheduled at or
    /// before `now`, earliest first and by id on ties. Each session is marked
    /// fired under the store lock before its event is produced, so a second
    /// poll (or a concurrent manual start) can never fire it again.
    pub fn poll(&self, now: NaiveDateTime) -> Vec<Event> {
        let mut events = Vec::new();
        for session in self.store.due(now) {
            match self.store.mark_fired(&session.id, now) {
                Ok(Some(fired)) => {
                    info!(session_id = %fired.id, scheduled_at = %fired.scheduled_at, "session due");
                    events.push(Event::SessionDue {
                        session_id: fired.id,
                        scheduled_at: fired.scheduled_at,
                        at: Utc::now(),
                    });
                }
                // Started by hand between the scan and the mark.
                Ok(None) => {}
                // Deleted between the scan and the mark.
                Err(e) => debug!(session_id = %session.id, error = %e, "skipping vanished session"),
            }
        }
        events
    }

    /// Poll loop. Runs until `shutdown` broadcasts `true` or its sender drops.
    ///
    /// The first poll happens immediately. Polls missed while the host was
    /// suspended are skipped, not replayed; the next poll re-evaluates every
    /// pending session against the current time.
    pub async fn run<F>(self, mut shutdown: watch::Receiver<bool>, mut on_event: F)
    where
        F: FnMut(Event) + Send,
    {
        info!(interval_secs = self.poll_interval.as_secs(), "due-time watcher started");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Local::now().naive_local();
                    for event in self.poll(now) {
                        on_event(event);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("due-time watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for DueWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DueWatcher")
            .field("poll_interval", &self.poll_interval)
            .field("sessions", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn due_ids(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::SessionDue { session_id, .. } => Some(session_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn watcher(store: &SessionStore) -> DueWatcher {
        DueWatcher::new(store.clone(), Duration::from_secs(60))
    }

    #[test]
    fn due_session_fires_once_and_is_marked() {
        let store = SessionStore::new();
        store.add(test_session("a", at(9, 0, 0), 1)).unwrap();
        let w = watcher(&store);

        assert_eq!(due_ids(&w.poll(at(9, 0, 0))), ["a"]);
        assert_eq!(store.get("a").unwrap().fired_at, Some(at(9, 0, 0)));
        assert!(w.poll(at(9, 0, 0)).is_empty());
        assert!(w.poll(at(9, 5, 0)).is_empty());
    }

    #[test]
    fn future_sessions_wait() {
        let store = SessionStore::new();
        store.add(test_session("a", at(9, 1, 0), 1)).unwrap();
        let w = watcher(&store);
        assert!(w.poll(at(9, 0, 59)).is_empty());
        assert_eq!(due_ids(&w.poll(at(9, 1, 0))), ["a"]);
    }

    #[test]
    fn ties_fire_in_id_order() {
        let store = SessionStore::new();
        store.add(test_session("b", at(9, 0, 0), 1)).unwrap();
        store.add(test_session("a", at(9, 0, 0), 1)).unwrap();
        store.add(test_session("c", at(8, 59, 0), 1)).unwrap();
        let w = watcher(&store);
        assert_eq!(due_ids(&w.poll(at(9, 0, 0))), ["c", "a", "b"]);
    }

    #[test]
    fn overdue_session_fires_once_after_long_sleep() {
        let store = SessionStore::new();
        store.add(test_session("a", at(7, 0, 0), 1)).unwrap();
        let w = watcher(&store);
        assert_eq!(w.poll(at(12, 0, 0)).len(), 1);
        assert!(w.poll(at(12, 1, 0)).is_empty());
    }

    #[test]
    fn clock_jump_backward_does_not_unfire() {
        let store = SessionStore::new();
        store.add(test_session("a", at(9, 0, 0), 1)).unwrap();
        let w = watcher(&store);
        w.poll(at(9, 0, 0));
        assert!(w.poll(at(8, 0, 0)).is_empty());
        assert!(w.poll(at(9, 30, 0)).is_empty());
        assert!(store.get("a").unwrap().fired_at.is_some());
    }

    #[test]
    fn completed_sessions_are_ignored() {
        let store = SessionStore::new();
        let mut done = test_session("a", at(9, 0, 0), 1);
        done.completed = true;
        done.fired_at = Some(at(9, 0, 0));
        store.add(done).unwrap();
        assert!(watcher(&store).poll(at(10, 0, 0)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let store = SessionStore::new();
        store
            .add(test_session("a", Local::now().naive_local() - chrono::Duration::minutes(1), 1))
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(watcher(&store).run(rx, move |e| {
            let _ = event_tx.send(e);
        }));

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.session_id(), "a");

        tokio::time::sleep(Duration::from_secs(600)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(event_rx.recv().await.is_none());
    }

    proptest! {
        #[test]
        fn repeated_polls_fire_each_session_once(
            offsets in proptest::collection::vec(0i64..120, 1..20),
            polls in 1usize..5,
        ) {
            let store = SessionStore::new();
            for (i, off) in offsets.iter().enumerate() {
                store.add(test_session(&format!("s{i:02}"), at(9, 0, 0) + chrono::Duration::minutes(*off), 1)).unwrap();
            }
            let w = watcher(&store);
            let now = at(11, 0, 0);
            let mut fired = Vec::new();
            for _ in 0..polls {
                fired.extend(due_ids(&w.poll(now)));
            }
            let mut dedup = fired.clone();
            dedup.sort();
            dedup.dedup();
            prop_assert_eq!(fired.len(), dedup.len());
            prop_assert_eq!(fired.len(), offsets.len());
        }
    }
}
