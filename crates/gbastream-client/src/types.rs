use std::time::Duration;

use gbastream_common::helpers::{env_list, env_u32, env_u64};
use gbastream_common::{Error, Result};

use crate::reconnect::{ReconnectPolicy, DEFAULT_RECONNECT_BACKOFF, DEFAULT_RECONNECT_CEILING};

pub const DEFAULT_INIT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub init_delay: Duration,
    pub ping_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub ice_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_delay: DEFAULT_INIT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `GBASTREAM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            init_delay: Duration::from_secs(env_u64(
                "GBASTREAM_INIT_DELAY_SECS",
                DEFAULT_INIT_DELAY.as_secs(),
            )),
            ping_interval: Duration::from_millis(env_u64(
                "GBASTREAM_PING_INTERVAL_MS",
                DEFAULT_PING_INTERVAL.as_millis() as u64,
            )),
            reconnect: ReconnectPolicy {
                ceiling: env_u32("GBASTREAM_RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_CEILING),
                backoff: Duration::from_millis(env_u64(
                    "GBASTREAM_RECONNECT_BACKOFF_MS",
                    DEFAULT_RECONNECT_BACKOFF.as_millis() as u64,
                )),
            },
            ice_servers: env_list("GBASTREAM_ICE_SERVERS", DEFAULT_ICE_SERVERS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ping_interval.is_zero() {
            return Err(Error::config("ping interval must be greater than zero"));
        }
        Ok(())
    }
}
