use async_trait::async_trait;
use jobwatch_common::{
    DependentEntitySnapshot, EntityId, JobId, JobStatusSnapshot, SourceError, StatusEvent,
    error::Result,
};
use tokio::sync::mpsc;

/// Pull side: one-shot queries for the current state of a job or entity.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(
        &self,
        job_id: &JobId,
    ) -> std::result::Result<JobStatusSnapshot, SourceError>;

    async fn fetch_entity(
        &self,
        entity_id: &EntityId,
    ) -> std::result::Result<DependentEntitySnapshot, SourceError>;
}

/// Push side: one named channel per job, addressed as `status-stream:{jobId}`.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, job_id: &JobId, buffer: usize) -> Result<mpsc::Receiver<StatusEvent>>;

    async fn close(&self, job_id: &JobId);
}
