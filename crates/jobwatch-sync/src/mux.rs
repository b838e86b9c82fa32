use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use jobwatch_common::{JobId, StatusEvent};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{config::RebuildStrategy, reconciler::Reconciler, source::PushTransport};

const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Keeps one open push channel per tracked job.
pub struct ChannelMultiplexer {
    transport: Arc<dyn PushTransport>,
    reconciler: Arc<Reconciler>,
    channels: Mutex<HashMap<JobId, JoinHandle<()>>>,
    strategy: RebuildStrategy,
    buffer: usize,
}

impl ChannelMultiplexer {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        reconciler: Arc<Reconciler>,
        strategy: RebuildStrategy,
        buffer: usize,
    ) -> Self {
        Self {
            transport,
            reconciler,
            channels: Mutex::new(HashMap::new()),
            strategy,
            buffer,
        }
    }

    /// Follows the tracked set until `stop` fires or is dropped. States that
    /// change faster than a rebuild are coalesced; a rebuild is never cut short.
    pub fn spawn(
        self: Arc<Self>,
        mut tracked: watch::Receiver<BTreeSet<JobId>>,
        mut stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let target = tracked.borrow_and_update().clone();
                self.rebuild(&target).await;

                tokio::select! {
                    changed = tracked.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut stop => break,
                }
            }
            debug!("multiplexer stopped following tracked set");
        })
    }

    pub async fn rebuild(&self, tracked: &BTreeSet<JobId>) {
        let mut channels = self.channels.lock().await;
        match self.strategy {
            RebuildStrategy::Full => {
                for (job_id, pump) in channels.drain() {
                    self.close_channel(&job_id, pump).await;
                }
                for job_id in tracked {
                    self.open_into(&mut channels, job_id).await;
                }
            }
            RebuildStrategy::Delta => {
                let stale: Vec<JobId> = channels
                    .keys()
                    .filter(|job_id| !tracked.contains(*job_id))
                    .cloned()
                    .collect();
                for job_id in stale {
                    if let Some(pump) = channels.remove(&job_id) {
                        self.close_channel(&job_id, pump).await;
                    }
                }
                for job_id in tracked {
                    if !channels.contains_key(job_id) {
                        self.open_into(&mut channels, job_id).await;
                    }
                }
            }
        }
        debug!(open = channels.len(), strategy = ?self.strategy, "push channels rebuilt");
    }

    pub async fn close_all(&self) {
        let mut channels = self.channels.lock().await;
        let count = channels.len();
        for (job_id, pump) in channels.drain() {
            self.close_channel(&job_id, pump).await;
        }
        if count > 0 {
            info!(count, "closed all push channels");
        }
    }

    pub async fn open_channels(&self) -> Vec<JobId> {
        let mut open: Vec<JobId> = self.channels.lock().await.keys().cloned().collect();
        open.sort_unstable();
        open
    }

    async fn open_into(&self, channels: &mut HashMap<JobId, JoinHandle<()>>, job_id: &JobId) {
        match self.transport.open(job_id, self.buffer).await {
            Ok(rx) => {
                let pump = tokio::spawn(pump_events(
                    job_id.clone(),
                    rx,
                    Arc::clone(&self.reconciler),
                ));
                channels.insert(job_id.clone(), pump);
            }
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    channel = %job_id.channel_name(),
                    error = %err,
                    "failed to open push channel"
                );
            }
        }
    }

    /// Closing the transport side drops the sender, so the pump applies
    /// whatever is still buffered and then exits on its own.
    async fn close_channel(&self, job_id: &JobId, mut pump: JoinHandle<()>) {
        self.transport.close(job_id).await;
        if time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump).await.is_err() {
            warn!(
                job_id = %job_id,
                channel = %job_id.channel_name(),
                "push channel did not drain in time, aborting pump"
            );
            pump.abort();
        }
    }
}

async fn pump_events(
    job_id: JobId,
    mut rx: mpsc::Receiver<StatusEvent>,
    reconciler: Arc<Reconciler>,
) {
    while let Some(event) = rx.recv().await {
        if !belongs_to_channel(&job_id, &event) {
            warn!(
                channel = %job_id.channel_name(),
                event_job_id = %event.job_id,
                "discarding push event addressed to another job"
            );
            continue;
        }
        reconciler.apply_push(event);
    }
    debug!(job_id = %job_id, "push channel ended by transport");
}

fn belongs_to_channel(job_id: &JobId, event: &StatusEvent) -> bool {
    &event.job_id == job_id
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use async_trait::async_trait;
    use jobwatch_common::{
        DependentEntitySnapshot, EntityId, JobId, JobStatus, JobStatusSnapshot, SourceError,
        StatusEvent,
    };

    use super::{ChannelMultiplexer, belongs_to_channel};
    use crate::{
        config::RebuildStrategy, memory::MemoryTransport, reconciler::Reconciler,
        source::StatusSource, store::StatusStore,
    };

    struct AbsentSource;

    #[async_trait]
    impl StatusSource for AbsentSource {
        async fn fetch_status(&self, job_id: &JobId) -> Result<JobStatusSnapshot, SourceError> {
            Err(SourceError::NotFound(job_id.to_string()))
        }

        async fn fetch_entity(
            &self,
            entity_id: &EntityId,
        ) -> Result<DependentEntitySnapshot, SourceError> {
            Err(SourceError::NotFound(entity_id.to_string()))
        }
    }

    fn event(job: &str) -> StatusEvent {
        StatusEvent {
            job_id: JobId::from(job),
            status: JobStatus::Active,
            dependent_entity_id: None,
            error_detail: None,
            started_at: None,
            updated_at: None,
        }
    }

    fn jobs(ids: &[&str]) -> BTreeSet<JobId> {
        ids.iter().map(|id| JobId::from(*id)).collect()
    }

    fn multiplexer(
        strategy: RebuildStrategy,
    ) -> (ChannelMultiplexer, Arc<MemoryTransport>, Arc<StatusStore>) {
        let store = Arc::new(StatusStore::new());
        let reconciler = Arc::new(Reconciler::new(store.clone(), Arc::new(AbsentSource)));
        let transport = Arc::new(MemoryTransport::new());
        let mux = ChannelMultiplexer::new(transport.clone(), reconciler, strategy, 8);
        (mux, transport, store)
    }

    #[test]
    fn mismatched_event_does_not_belong() {
        assert!(belongs_to_channel(&JobId::from("job-1"), &event("job-1")));
        assert!(!belongs_to_channel(&JobId::from("job-1"), &event("job-2")));
    }

    #[tokio::test]
    async fn full_rebuild_reopens_every_channel() {
        let (mux, transport, _) = multiplexer(RebuildStrategy::Full);

        mux.rebuild(&jobs(&["a", "b"])).await;
        mux.rebuild(&jobs(&["a", "b", "c"])).await;

        let expected: Vec<JobId> = jobs(&["a", "b", "c"]).into_iter().collect();
        assert_eq!(mux.open_channels().await, expected);
        assert_eq!(transport.opened_total(), 5);
        assert_eq!(transport.closed_total(), 2);
        assert_eq!(transport.open_channels().len(), 3);
    }

    #[tokio::test]
    async fn delta_rebuild_touches_only_changes() {
        let (mux, transport, _) = multiplexer(RebuildStrategy::Delta);

        mux.rebuild(&jobs(&["a", "b"])).await;
        mux.rebuild(&jobs(&["b", "c"])).await;

        assert_eq!(
            mux.open_channels().await,
            vec![JobId::from("b"), JobId::from("c")]
        );
        assert_eq!(transport.opened_total(), 3);
        assert_eq!(transport.closed_total(), 1);
        assert!(!transport.is_open(&JobId::from("a")));
    }

    #[tokio::test]
    async fn close_all_leaves_nothing_open() {
        let (mux, transport, _) = multiplexer(RebuildStrategy::Full);
        mux.rebuild(&jobs(&["a", "b"])).await;

        mux.close_all().await;
        assert!(mux.open_channels().await.is_empty());
        assert!(transport.open_channels().is_empty());
    }

    #[tokio::test]
    async fn full_rebuild_applies_buffered_events_of_kept_jobs() {
        let (mux, transport, store) = multiplexer(RebuildStrategy::Full);
        let job = JobId::from("a");
        mux.rebuild(&jobs(&["a"])).await;

        assert!(transport.publish(&job, event("a")).await);
        mux.rebuild(&jobs(&["a", "b"])).await;

        assert_eq!(store.status(&job).unwrap().status, JobStatus::Active);
        assert!(transport.is_open(&job));
    }

    #[tokio::test]
    async fn closing_a_dropped_job_drains_its_buffer() {
        let (mux, transport, store) = multiplexer(RebuildStrategy::Delta);
        let job = JobId::from("a");
        mux.rebuild(&jobs(&["a"])).await;

        assert!(transport.publish(&job, event("a")).await);
        mux.rebuild(&jobs(&[])).await;

        assert_eq!(store.status(&job).unwrap().status, JobStatus::Active);
        assert!(transport.open_channels().is_empty());
    }

    #[tokio::test]
    async fn pump_applies_matching_events_only() {
        let (mux, transport, store) = multiplexer(RebuildStrategy::Full);
        let job = JobId::from("a");
        mux.rebuild(&jobs(&["a"])).await;

        assert!(transport.publish(&job, event("b")).await);
        assert!(transport.publish(&job, event("a")).await);

        for _ in 0..100 {
            if store.status(&job).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.status(&job).unwrap().status, JobStatus::Active);
        assert!(store.status(&JobId::from("b")).is_none());
    }
}
