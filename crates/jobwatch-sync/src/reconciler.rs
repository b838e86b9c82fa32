use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use jobwatch_common::{EntityId, JobId, JobStatusSnapshot, SourceErrorKind, StatusEvent};
use tracing::{debug, error, warn};

use crate::{source::StatusSource, store::StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Applied,
    Defaulted(SourceErrorKind),
}

/// Folds pull-fetch results and push events into the store, last write wins.
pub struct Reconciler {
    store: Arc<StatusStore>,
    source: Arc<dyn StatusSource>,
    entity_fetches: Mutex<HashSet<(JobId, EntityId)>>,
}

impl Reconciler {
    pub fn new(store: Arc<StatusStore>, source: Arc<dyn StatusSource>) -> Self {
        Self {
            store,
            source,
            entity_fetches: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    pub async fn pull(self: &Arc<Self>, job_id: &JobId) -> PullOutcome {
        match self.source.fetch_status(job_id).await {
            Ok(mut snapshot) => {
                snapshot.job_id = job_id.clone();
                self.apply(snapshot);
                PullOutcome::Applied
            }
            Err(err) => {
                let kind = err.kind();
                match kind {
                    SourceErrorKind::ExpectedAbsence => {
                        debug!(job_id = %job_id, "no status for job yet, using default");
                    }
                    SourceErrorKind::Transport => {
                        debug!(job_id = %job_id, error = %err, "status fetch unreachable, using default");
                    }
                    SourceErrorKind::Unexpected => {
                        error!(job_id = %job_id, error = %err, "status fetch failed");
                    }
                }
                self.store.reset_to_default(job_id);
                PullOutcome::Defaulted(kind)
            }
        }
    }

    /// Callers must have checked that the event belongs to the channel it came from.
    pub fn apply_push(self: &Arc<Self>, event: StatusEvent) {
        self.apply(JobStatusSnapshot::from(event));
    }

    fn apply(self: &Arc<Self>, snapshot: JobStatusSnapshot) {
        let job_id = snapshot.job_id.clone();
        let entity_id = snapshot.entity_ref().cloned();
        self.store.apply_status(snapshot);

        if let Some(entity_id) = entity_id {
            self.ensure_entity(job_id, entity_id);
        }
    }

    fn ensure_entity(self: &Arc<Self>, job_id: JobId, entity_id: EntityId) {
        if self.store.has_entity(&job_id, &entity_id) {
            return;
        }
        if !self
            .lock_fetches()
            .insert((job_id.clone(), entity_id.clone()))
        {
            return;
        }

        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            reconciler.fetch_entity(&job_id, &entity_id).await;
            reconciler.lock_fetches().remove(&(job_id, entity_id));
        });
    }

    async fn fetch_entity(&self, job_id: &JobId, entity_id: &EntityId) {
        match self.source.fetch_entity(entity_id).await {
            Ok(mut entity) => {
                entity.id = entity_id.clone();
                if !self.store.merge_entity(job_id, entity) {
                    debug!(
                        job_id = %job_id,
                        entity_id = %entity_id,
                        "job no longer references fetched entity"
                    );
                }
            }
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    entity_id = %entity_id,
                    error = %err,
                    "dependent entity fetch failed"
                );
            }
        }
    }

    fn lock_fetches(&self) -> MutexGuard<'_, HashSet<(JobId, EntityId)>> {
        match self.entity_fetches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
