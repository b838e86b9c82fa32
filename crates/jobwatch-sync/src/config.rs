use std::{str::FromStr, time::Duration};

use jobwatch_common::error::{Result, SyncError};

const DEFAULT_TICKER_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_CHANNEL_BUFFER: usize = 64;

/// How the multiplexer reacts to a change of the tracked set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RebuildStrategy {
    /// Close every open channel, then reopen one per tracked job.
    #[default]
    Full,
    /// Close channels for removed jobs and open channels for added ones.
    Delta,
}

impl FromStr for RebuildStrategy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "delta" => Ok(Self::Delta),
            other => Err(SyncError::InvalidConfig(format!(
                "unknown rebuild strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ticker_interval: Duration,
    pub channel_buffer: usize,
    pub rebuild_strategy: RebuildStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ticker_interval: DEFAULT_TICKER_INTERVAL,
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            rebuild_strategy: RebuildStrategy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = non_empty(lookup("JOBWATCH_TICK_MS")) {
            let millis = value.parse::<u64>().map_err(|err| {
                SyncError::InvalidConfig(format!("JOBWATCH_TICK_MS={value}: {err}"))
            })?;
            config.ticker_interval = Duration::from_millis(millis);
        }

        if let Some(value) = non_empty(lookup("JOBWATCH_CHANNEL_BUFFER")) {
            config.channel_buffer = value.parse::<usize>().map_err(|err| {
                SyncError::InvalidConfig(format!("JOBWATCH_CHANNEL_BUFFER={value}: {err}"))
            })?;
        }

        if let Some(value) = non_empty(lookup("JOBWATCH_REBUILD")) {
            config.rebuild_strategy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ticker_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "ticker interval must be greater than zero".to_string(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(SyncError::InvalidConfig(
                "channel buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
