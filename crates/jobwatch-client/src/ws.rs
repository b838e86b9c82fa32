use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use jobwatch_common::{
    JobId, StatusEvent,
    error::{Result, SyncError},
};
use jobwatch_sync::PushTransport;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message as WsMessage};
use tracing::{debug, warn};
use url::Url;

use crate::config::{ClientConfig, endpoint};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Reader {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Push transport with one WebSocket per channel at `{stream}/status-stream:{jobId}`.
pub struct WsPushTransport {
    base: Url,
    connect_timeout: Duration,
    readers: Mutex<HashMap<JobId, Reader>>,
}

impl WsPushTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base: config.stream_base.clone(),
            connect_timeout: config.request_timeout,
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel_url(&self, job_id: &JobId) -> Url {
        endpoint(&self.base, &[&job_id.channel_name()])
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Reader>> {
        match self.readers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn open(&self, job_id: &JobId, buffer: usize) -> Result<mpsc::Receiver<StatusEvent>> {
        let url = self.channel_url(job_id);
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _) = match time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(err)) => {
                return Err(SyncError::ChannelOpen {
                    channel: job_id.channel_name(),
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                return Err(SyncError::ChannelOpen {
                    channel: job_id.channel_name(),
                    reason: format!("connect timed out after {:?}", self.connect_timeout),
                });
            }
        };

        let (tx, rx) = mpsc::channel(buffer);
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(read_channel(job_id.clone(), stream, tx, stop_rx));

        if let Some(previous) = self.lock().insert(job_id.clone(), Reader { stop, handle }) {
            previous.handle.abort();
        }
        debug!(channel = %job_id.channel_name(), "push channel opened");
        Ok(rx)
    }

    async fn close(&self, job_id: &JobId) {
        let reader = self.lock().remove(job_id);
        let Some(reader) = reader else {
            return;
        };
        let _ = reader.stop.send(());
        if let Err(err) = reader.handle.await
            && !err.is_cancelled()
        {
            warn!(channel = %job_id.channel_name(), error = %err, "push channel reader failed");
        }
    }
}

async fn read_channel(
    job_id: JobId,
    stream: WsStream,
    tx: mpsc::Sender<StatusEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
            incoming = ws_rx.next() => {
                let payload = match incoming {
                    Some(Ok(WsMessage::Text(text))) => decode_event(text.as_bytes()),
                    Some(Ok(WsMessage::Binary(bytes))) => decode_event(&bytes),
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if ws_tx.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(channel = %job_id.channel_name(), error = %err, "push channel read failed");
                        break;
                    }
                };

                match payload {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(channel = %job_id.channel_name(), error = %err, "undecodable push event");
                    }
                }
            }
        }
    }
    debug!(channel = %job_id.channel_name(), "push channel reader stopped");
}

fn decode_event(bytes: &[u8]) -> serde_json::Result<StatusEvent> {
    serde_json::from_slice(bytes)
}
