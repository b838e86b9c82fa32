use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use jobwatch_common::{JobId, StatusEvent, error::Result};
use tokio::sync::mpsc;

use crate::source::PushTransport;

/// In-process push transport. Events published to a channel name reach the
/// receiver opened for it, if any.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    channels: Mutex<HashMap<String, mpsc::Sender<StatusEvent>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` on the channel of `channel_job`, whatever job the
    /// event itself names. Returns false when no channel is open.
    pub async fn publish(&self, channel_job: &JobId, event: StatusEvent) -> bool {
        let sender = self.lock().get(&channel_job.channel_name()).cloned();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn is_open(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(&job_id.channel_name())
    }

    pub fn opened_total(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_total(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<StatusEvent>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn open(&self, job_id: &JobId, buffer: usize) -> Result<mpsc::Receiver<StatusEvent>> {
        let (tx, rx) = mpsc::channel(buffer);
        self.lock().insert(job_id.channel_name(), tx);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn close(&self, job_id: &JobId) {
        if self.lock().remove(&job_id.channel_name()).is_some() {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
