use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use jobwatch_common::{DependentEntitySnapshot, JobId, JobStatusSnapshot};
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::SyncConfig,
    mux::ChannelMultiplexer,
    reconciler::{PullOutcome, Reconciler},
    registry::{Claim, SubscriptionRegistry},
    source::{PushTransport, StatusSource},
    store::{StatusStore, StoreChange},
    ticker::ElapsedTicker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A pull-fetch was started and the job joined the tracked set.
    Started,
    /// Another subscribe sequence for this job has not finished yet.
    InFlight,
    AlreadyTracked,
    SessionClosed,
}

struct Inner {
    config: SyncConfig,
    store: Arc<StatusStore>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<Reconciler>,
    mux: Arc<ChannelMultiplexer>,
    mux_task: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
    closed: AtomicBool,
}

/// One status-sync session: owns the store, the subscription registry and
/// the push channels. Cheap to clone; every clone shares the same session.
/// Must be created and used inside a Tokio runtime.
#[derive(Clone)]
pub struct StatusSync {
    inner: Arc<Inner>,
}

impl StatusSync {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn StatusSource>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let store = Arc::new(StatusStore::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&store), source));
        let mux = Arc::new(ChannelMultiplexer::new(
            transport,
            Arc::clone(&reconciler),
            config.rebuild_strategy,
            config.channel_buffer,
        ));
        let (stop_tx, stop_rx) = oneshot::channel();
        let mux_task = Arc::clone(&mux).spawn(registry.watch_tracked(), stop_rx);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                registry,
                reconciler,
                mux,
                mux_task: Mutex::new(Some((stop_tx, mux_task))),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Idempotent. The guard check and claim happen before anything is
    /// awaited, so concurrent callers for one job start a single fetch.
    pub fn subscribe(&self, job_id: impl Into<JobId>) -> SubscribeOutcome {
        if self.is_closed() {
            return SubscribeOutcome::SessionClosed;
        }

        let job_id = job_id.into();
        let ticket = match self.inner.registry.claim(&job_id) {
            Claim::Claimed(ticket) => ticket,
            Claim::InFlight => return SubscribeOutcome::InFlight,
            Claim::Tracked => return SubscribeOutcome::AlreadyTracked,
        };

        self.inner.store.mark_loading(&job_id);

        let reconciler = Arc::clone(&self.inner.reconciler);
        let registry = Arc::clone(&self.inner.registry);
        let fetch_job = job_id.clone();
        tokio::spawn(async move {
            let outcome = reconciler.pull(&fetch_job).await;
            registry.release(&fetch_job, ticket);
            debug!(job_id = %fetch_job, ?outcome, "initial status fetch finished");
        });

        self.inner.registry.track(&job_id);
        SubscribeOutcome::Started
    }

    /// Stops tracking; the last known snapshot stays readable.
    pub fn unsubscribe(&self, job_id: &JobId) {
        self.inner.registry.untrack(job_id);
    }

    /// Out-of-band pull-fetch that leaves subscription state untouched.
    pub async fn refresh(&self, job_id: &JobId) -> PullOutcome {
        self.inner.reconciler.pull(job_id).await
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobStatusSnapshot> {
        self.inner.store.status(job_id)
    }

    pub fn dependent_entity(&self, job_id: &JobId) -> Option<DependentEntitySnapshot> {
        self.inner.store.entity(job_id)
    }

    pub fn is_loading(&self, job_id: &JobId) -> bool {
        self.inner.store.is_loading(job_id)
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.store.subscribe_changes()
    }

    pub fn elapsed_ticker(&self, job_id: &JobId) -> ElapsedTicker {
        ElapsedTicker::start(
            Arc::clone(&self.inner.store),
            job_id.clone(),
            self.inner.config.ticker_interval,
        )
    }

    pub fn tracked_jobs(&self) -> Vec<JobId> {
        self.inner.registry.tracked().into_iter().collect()
    }

    pub fn is_tracked(&self, job_id: &JobId) -> bool {
        self.inner.registry.is_tracked(job_id)
    }

    pub fn is_in_flight(&self, job_id: &JobId) -> bool {
        self.inner.registry.is_in_flight(job_id)
    }

    pub async fn open_channels(&self) -> Vec<JobId> {
        self.inner.mux.open_channels().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Ends the session: stops following the tracked set and closes every
    /// push channel. Snapshots stay readable.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mux_task = match self.inner.mux_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((stop, task)) = mux_task {
            let _ = stop.send(());
            if let Err(err) = task.await {
                warn!(error = %err, "multiplexer task ended abnormally");
            }
        }

        self.inner.registry.clear();
        self.inner.mux.close_all().await;
        info!("status sync session shut down");
    }
}
