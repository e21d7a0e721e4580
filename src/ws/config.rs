use std::time::Duration;

use bon::Builder;

use crate::PROTOCOL_VERSION;

const DEFAULT_KEEPALIVE_INTERVAL_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_DELAY_DURATION: Duration = Duration::from_millis(20);
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Interval between keepalive pings; must be non-zero
    #[builder(default = DEFAULT_KEEPALIVE_INTERVAL_DURATION)]
    pub keepalive_interval: Duration,
    /// Pause after a failed receive before reading again
    #[builder(default = DEFAULT_RETRY_DELAY_DURATION)]
    pub retry_delay: Duration,
    /// Protocol revision appended to the endpoint as `?protocol=`
    #[builder(default = PROTOCOL_VERSION)]
    pub protocol: u8,
    /// Messages buffered per channel for slow stream consumers
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Build the endpoint URL for `key` on `host`.
    ///
    /// The key is embedded verbatim.
    #[must_use]
    pub fn endpoint(&self, host: &str, key: &str) -> String {
        let host = host.trim_end_matches('/');
        format!("{host}/app/{key}?protocol={}", self.protocol)
    }
}
