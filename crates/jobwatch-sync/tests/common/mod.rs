#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use jobwatch_common::{
    DependentEntitySnapshot, EntityId, JobId, JobStatus, JobStatusSnapshot, SourceError,
    StatusEvent,
};
use jobwatch_sync::{MemoryTransport, RebuildStrategy, StatusSource, StatusSync, SyncConfig};
use tokio::sync::Semaphore;

/// Status source answering from fixed tables and counting calls. With a gate,
/// every status fetch waits for a permit before answering.
#[derive(Default)]
pub struct FakeSource {
    statuses: Mutex<HashMap<JobId, Result<JobStatusSnapshot, SourceError>>>,
    entities: Mutex<HashMap<EntityId, Result<DependentEntitySnapshot, SourceError>>>,
    status_calls: AtomicUsize,
    entity_calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let source = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (source, gate)
    }

    pub fn with_status(self, job: &str, status: JobStatus) -> Self {
        let mut snapshot = JobStatusSnapshot::queued(JobId::from(job));
        snapshot.status = status;
        self.with_snapshot(snapshot)
    }

    pub fn with_snapshot(self, snapshot: JobStatusSnapshot) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(snapshot.job_id.clone(), Ok(snapshot));
        self
    }

    pub fn with_status_error(self, job: &str, err: SourceError) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(JobId::from(job), Err(err));
        self
    }

    pub fn with_entity(self, id: &str, finalized: bool) -> Self {
        self.entities.lock().unwrap().insert(
            EntityId::from(id),
            Ok(DependentEntitySnapshot {
                id: EntityId::from(id),
                finalized,
                updated_at: None,
            }),
        );
        self
    }

    pub fn with_entity_error(self, id: &str, err: SourceError) -> Self {
        self.entities
            .lock()
            .unwrap()
            .insert(EntityId::from(id), Err(err));
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn entity_calls(&self) -> usize {
        self.entity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for FakeSource {
    async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, SourceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.statuses
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(job_id.to_string())))
    }

    async fn fetch_entity(
        &self,
        entity_id: &EntityId,
    ) -> Result<DependentEntitySnapshot, SourceError> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        self.entities
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(entity_id.to_string())))
    }
}

pub struct Harness {
    pub sync: StatusSync,
    pub source: Arc<FakeSource>,
    pub transport: Arc<MemoryTransport>,
}

pub fn harness(source: FakeSource) -> Harness {
    harness_with(source, RebuildStrategy::Full)
}

pub fn harness_with(source: FakeSource, strategy: RebuildStrategy) -> Harness {
    let source = Arc::new(source);
    let transport = Arc::new(MemoryTransport::new());
    let config = SyncConfig {
        ticker_interval: Duration::from_millis(10),
        rebuild_strategy: strategy,
        ..SyncConfig::default()
    };
    let sync = StatusSync::new(config, source.clone(), transport.clone());
    Harness {
        sync,
        source,
        transport,
    }
}

pub fn event(job: &str, status: JobStatus) -> StatusEvent {
    StatusEvent {
        job_id: JobId::from(job),
        status,
        dependent_entity_id: None,
        error_detail: None,
        started_at: None,
        updated_at: None,
    }
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Waits until the multiplexer has caught up with the tracked set.
pub async fn wait_channels_settled(harness: &Harness) {
    for _ in 0..1_000 {
        let tracked = harness.sync.tracked_jobs();
        let open = harness.sync.open_channels().await;
        let transport_open = harness.transport.open_channels();
        let expected: Vec<String> = tracked.iter().map(JobId::channel_name).collect();
        if open == tracked && transport_open == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("push channels never matched the tracked set");
}
