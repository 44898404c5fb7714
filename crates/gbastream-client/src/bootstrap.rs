use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use gbastream_common::{Error, Result};

use crate::signaling::validate_address;

/// The two addresses a session needs. Immutable once handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    pub media_signaling_address: String,
    pub input_address: String,
}

impl SessionEndpoints {
    pub fn new(media: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            media_signaling_address: media.into(),
            input_address: input.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (what, address) in [
            ("media signaling", &self.media_signaling_address),
            ("input", &self.input_address),
        ] {
            if address.trim().is_empty() {
                return Err(Error::config(format!("{what} address is empty")));
            }
            validate_address(address).map_err(|e| Error::config(format!("{what}: {e}")))?;
        }
        Ok(())
    }
}

/// Whatever produces the session record; in a full deployment this is the
/// match service.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn fetch(&self) -> Result<SessionEndpoints>;
}

/// Addresses known up front.
#[derive(Debug, Clone)]
pub struct StaticEndpoints(pub SessionEndpoints);

#[async_trait]
impl EndpointSource for StaticEndpoints {
    async fn fetch(&self) -> Result<SessionEndpoints> {
        Ok(self.0.clone())
    }
}

/// Gates link start-up: nothing connects until the source has answered and
/// the initialization delay has passed.
pub struct SessionBootstrap<S> {
    source: S,
    init_delay: Duration,
}

impl<S: EndpointSource> SessionBootstrap<S> {
    pub fn new(source: S, init_delay: Duration) -> Self {
        Self { source, init_delay }
    }

    /// Fetches, waits, validates. Safe to call again after a failure.
    pub async fn endpoints(&self) -> Result<SessionEndpoints> {
        let endpoints = self.source.fetch().await?;
        if !self.init_delay.is_zero() {
            info!("session record received; starting links in {:?}", self.init_delay);
            tokio::time::sleep(self.init_delay).await;
        }
        endpoints.validate()?;
        Ok(endpoints)
    }
}
