use std::time::Duration;

use jobwatch_common::error::{Result, SyncError};
use url::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api/";
const DEFAULT_STREAM_URL: &str = "ws://127.0.0.1:8080/realtime/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: Url,
    pub stream_base: Url,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn local() -> Result<Self> {
        Self::new(DEFAULT_API_URL, DEFAULT_STREAM_URL)
    }

    pub fn new(api_base: &str, stream_base: &str) -> Result<Self> {
        let config = Self {
            api_base: parse_base(api_base, &["http", "https"])?,
            stream_base: parse_base(stream_base, &["ws", "wss"])?,
            request_timeout: DEFAULT_TIMEOUT,
        };
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let api = env_or("JOBWATCH_API_URL", DEFAULT_API_URL);
        let stream = env_or("JOBWATCH_STREAM_URL", DEFAULT_STREAM_URL);
        Self::new(&api, &stream)?.with_env_timeout()
    }

    pub fn with_env_timeout(mut self) -> Result<Self> {
        let value = env_or("JOBWATCH_TIMEOUT_MS", "");
        if !value.is_empty() {
            let millis = value.parse::<u64>().map_err(|err| {
                SyncError::InvalidConfig(format!("JOBWATCH_TIMEOUT_MS={value}: {err}"))
            })?;
            self.request_timeout = Duration::from_millis(millis);
        }
        Ok(self)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_base(raw: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|err| SyncError::InvalidConfig(format!("invalid url {raw}: {err}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(SyncError::InvalidConfig(format!(
            "url {raw} must use one of {schemes:?}"
        )));
    }
    if url.cannot_be_a_base() {
        return Err(SyncError::InvalidConfig(format!(
            "url {raw} cannot be used as a base"
        )));
    }
    Ok(url)
}

/// Appends escaped path segments to `base`, keeping its existing path.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}
