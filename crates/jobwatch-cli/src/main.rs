use std::{collections::HashMap, sync::Arc, time::Duration};

use clap::Parser;
use jobwatch_client::{ClientConfig, HttpStatusSource, WsPushTransport};
use jobwatch_common::{JobId, time::format_elapsed};
use jobwatch_sync::{
    ChangeKind, ElapsedTicker, RebuildStrategy, StatusSync, StoreChange, SubscribeOutcome,
    SyncConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobwatch", about = "Follow the live status of background jobs")]
struct Cli {
    #[arg(long, env = "JOBWATCH_API_URL", default_value = "http://127.0.0.1:8080/api/")]
    api_url: String,

    #[arg(long, env = "JOBWATCH_STREAM_URL", default_value = "ws://127.0.0.1:8080/realtime/")]
    stream_url: String,

    /// Channel rebuild strategy: full or delta.
    #[arg(long)]
    rebuild: Option<RebuildStrategy>,

    /// Seconds between elapsed-time reports for processing jobs.
    #[arg(long, default_value_t = 5)]
    report_every: u64,

    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(required = true)]
    jobs: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("jobwatch=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let mut sync_config = SyncConfig::from_env()?;
    if let Some(strategy) = cli.rebuild {
        sync_config.rebuild_strategy = strategy;
    }
    let client_config = ClientConfig::new(&cli.api_url, &cli.stream_url)?.with_env_timeout()?;

    let sync = StatusSync::new(
        sync_config,
        Arc::new(HttpStatusSource::new(&client_config)),
        Arc::new(WsPushTransport::new(&client_config)),
    );
    let mut changes = sync.changes();

    for job in &cli.jobs {
        match sync.subscribe(job.as_str()) {
            SubscribeOutcome::Started => info!(job_id = %job, "watching job"),
            outcome => warn!(job_id = %job, ?outcome, "job not subscribed"),
        }
    }

    let mut tickers: HashMap<JobId, ElapsedTicker> = HashMap::new();
    let mut report = tokio::time::interval(Duration::from_secs(cli.report_every.max(1)));

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => handle_change(&sync, &mut tickers, change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed store notifications");
                }
                Err(RecvError::Closed) => break,
            },
            _ = report.tick() => {
                tickers.retain(|_, ticker| ticker.is_running());
                for (job_id, ticker) in &tickers {
                    if let Some(elapsed) = ticker.elapsed() {
                        info!(job_id = %job_id, elapsed = %format_elapsed(elapsed), "processing");
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!(error = %err, "failed to listen for interrupt");
                }
                break;
            }
        }
    }

    sync.shutdown().await;
    Ok(())
}

fn handle_change(
    sync: &StatusSync,
    tickers: &mut HashMap<JobId, ElapsedTicker>,
    change: StoreChange,
) {
    let job_id = change.job_id;
    match change.kind {
        ChangeKind::Loading => {}
        ChangeKind::Status => {
            let Some(snapshot) = sync.status(&job_id) else {
                return;
            };
            match snapshot.visible_error() {
                Some(detail) => {
                    warn!(job_id = %job_id, status = %snapshot.status, error = detail, "job failed");
                }
                None => info!(job_id = %job_id, status = %snapshot.status, "job status"),
            }

            if snapshot.status.is_processing() && snapshot.started_at.is_some() {
                let running = tickers
                    .get(&job_id)
                    .is_some_and(|ticker| ticker.is_running());
                if !running {
                    tickers.insert(job_id.clone(), sync.elapsed_ticker(&job_id));
                }
            } else {
                tickers.remove(&job_id);
            }
        }
        ChangeKind::Entity => {
            if let Some(entity) = sync.dependent_entity(&job_id) {
                info!(
                    job_id = %job_id,
                    entity_id = %entity.id,
                    finalized = entity.finalized,
                    "dependent entity loaded"
                );
            }
        }
    }
}
