use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use jobwatch_common::{DependentEntitySnapshot, EntityId, JobId, JobStatusSnapshot};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSlot {
    pub snapshot: JobStatusSnapshot,
    pub entity: Option<DependentEntitySnapshot>,
    pub is_loading: bool,
}

impl JobSlot {
    fn placeholder(job_id: JobId) -> Self {
        Self {
            snapshot: JobStatusSnapshot::queued(job_id),
            entity: None,
            is_loading: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Loading,
    Status,
    Entity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub job_id: JobId,
    pub kind: ChangeKind,
}

/// Job-id keyed snapshots read by every observer. Entries are never removed.
#[derive(Debug)]
pub struct StatusStore {
    slots: RwLock<HashMap<JobId, JobSlot>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            slots: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn slot(&self, job_id: &JobId) -> Option<JobSlot> {
        self.read().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatusSnapshot> {
        self.read().get(job_id).map(|slot| slot.snapshot.clone())
    }

    pub fn entity(&self, job_id: &JobId) -> Option<DependentEntitySnapshot> {
        self.read().get(job_id).and_then(|slot| slot.entity.clone())
    }

    pub fn is_loading(&self, job_id: &JobId) -> bool {
        self.read().get(job_id).is_some_and(|slot| slot.is_loading)
    }

    pub fn has_entity(&self, job_id: &JobId, entity_id: &EntityId) -> bool {
        self.read()
            .get(job_id)
            .and_then(|slot| slot.entity.as_ref())
            .is_some_and(|entity| &entity.id == entity_id)
    }

    /// Creates a queued placeholder if needed and flags the slot as loading.
    pub fn mark_loading(&self, job_id: &JobId) {
        {
            let mut slots = self.write();
            slots
                .entry(job_id.clone())
                .and_modify(|slot| slot.is_loading = true)
                .or_insert_with(|| JobSlot::placeholder(job_id.clone()));
        }
        self.publish(job_id, ChangeKind::Loading);
    }

    /// Overwrites the status fields of a slot. Dependent entity data is kept
    /// unless the snapshot now references a different entity.
    pub fn apply_status(&self, snapshot: JobStatusSnapshot) {
        let job_id = snapshot.job_id.clone();
        {
            let mut slots = self.write();
            match slots.get_mut(&job_id) {
                Some(slot) => {
                    if let Some(entity_id) = snapshot.entity_ref()
                        && slot.entity.as_ref().is_some_and(|entity| &entity.id != entity_id)
                    {
                        slot.entity = None;
                    }
                    slot.snapshot = snapshot;
                    slot.is_loading = false;
                }
                None => {
                    slots.insert(
                        job_id.clone(),
                        JobSlot {
                            snapshot,
                            entity: None,
                            is_loading: false,
                        },
                    );
                }
            }
        }
        self.publish(&job_id, ChangeKind::Status);
    }

    pub fn reset_to_default(&self, job_id: &JobId) {
        self.apply_status(JobStatusSnapshot::queued(job_id.clone()));
    }

    /// Stores a fetched entity, but only while the slot still references it.
    pub fn merge_entity(&self, job_id: &JobId, entity: DependentEntitySnapshot) -> bool {
        let merged = {
            let mut slots = self.write();
            match slots.get_mut(job_id) {
                Some(slot) if slot.snapshot.entity_ref() == Some(&entity.id) => {
                    slot.entity = Some(entity);
                    true
                }
                _ => false,
            }
        };
        if merged {
            self.publish(job_id, ChangeKind::Entity);
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn publish(&self, job_id: &JobId, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            job_id: job_id.clone(),
            kind,
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobSlot>> {
        match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobSlot>> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
