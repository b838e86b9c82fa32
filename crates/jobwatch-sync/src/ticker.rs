use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use jobwatch_common::{JobId, time};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::store::{StatusStore, StoreChange};

/// Ticking `now - startedAt` for a job in the processing state. The task
/// ends, and the value drops to `None`, as soon as the job leaves that state
/// or loses its start time.
#[derive(Debug)]
pub struct ElapsedTicker {
    rx: watch::Receiver<Option<Duration>>,
    handle: JoinHandle<()>,
}

impl ElapsedTicker {
    /// A ticker is single-use: once it has reported `None` it does not come
    /// back when the job later enters processing. Start a new one for that.
    pub fn start(store: Arc<StatusStore>, job_id: JobId, period: Duration) -> Self {
        let (tx, rx) = watch::channel(current_elapsed(&store, &job_id, time::now()));
        let changes = store.subscribe_changes();
        let handle = tokio::spawn(run(store, changes, job_id, period, tx));
        Self { rx, handle }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        *self.rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Duration>> {
        self.rx.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    store: Arc<StatusStore>,
    mut changes: broadcast::Receiver<StoreChange>,
    job_id: JobId,
    period: Duration,
    tx: watch::Sender<Option<Duration>>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let elapsed = current_elapsed(&store, &job_id, time::now());
        tx.send_replace(elapsed);
        if elapsed.is_none() {
            return;
        }

        tokio::select! {
            _ = interval.tick() => {}
            change = changes.recv() => match change {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    tx.send_replace(None);
                    return;
                }
            },
        }
    }
}

pub fn current_elapsed(
    store: &StatusStore,
    job_id: &JobId,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let snapshot = store.status(job_id)?;
    if !snapshot.status.is_processing() {
        return None;
    }
    snapshot
        .started_at
        .map(|started_at| time::elapsed_since(started_at, now))
}
