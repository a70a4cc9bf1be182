//! The process-wide HTTP client used for remote sources and translation.

use std::time::Duration;

use ds_core::config::StreamConfig;
use ds_core::{Error, Result};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// Build the shared client: HTTP/1 only, pooled, with a read timeout so a
/// stalled upstream body ends the proxy tee.
pub fn build_client(config: &StreamConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .read_timeout(config.proxy_idle_timeout())
        .http1_only()
        .user_agent(concat!("directstream/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(build_client(&StreamConfig::default()).is_ok());
    }
}
