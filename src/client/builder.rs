use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ClientConfig;
use super::ClientTransport;
use super::ConfClient;
use super::ConfrSession;
use super::ConnectionManager;
use super::ConnectionState;
use crate::Result;

pub struct ClientBuilder {
    config: ClientConfig,
    keys: BTreeSet<String>,
}

impl ClientBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            keys: BTreeSet::new(),
        }
    }

    /// Server host (default: 127.0.0.1)
    pub fn address(
        mut self,
        address: impl Into<String>,
    ) -> Self {
        self.config.address = address.into();
        self
    }

    /// Server port (default: 8844)
    pub fn port(
        mut self,
        port: u16,
    ) -> Self {
        self.config.port = port;
        self
    }

    /// Adds a key to watch from the first connection on
    pub fn watch(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.keys.insert(key.into());
        self
    }

    pub fn watch_keys<I, K>(
        mut self,
        keys: I,
    ) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Keepalive ping cadence (default: 5s)
    pub fn idle_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.config.idle_interval = interval;
        self
    }

    /// Delay between reconnect attempts (default: 1s)
    pub fn reconnect_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set connection timeout (default: 3s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Bound the wait for a watch response (default: unbounded)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn outbound_capacity(
        mut self,
        capacity: usize,
    ) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub fn max_frame_length(
        mut self,
        length: usize,
    ) -> Self {
        self.config.max_frame_length = length;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// Settings applied earlier through the individual methods are discarded;
    /// keys added with [`watch`](ClientBuilder::watch) are kept.
    pub fn config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and starts the background connection
    /// manager. The returned client is usable right away; watches issued
    /// before the first connection is up fail with a not-open error.
    pub async fn start(self) -> Result<ConfClient> {
        self.config.validate()?;

        let transport = ClientTransport::new();
        let session = Arc::new(ConfrSession::new(
            Arc::new(transport.clone()),
            self.keys,
            self.config.request_timeout,
        ));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shutdown = CancellationToken::new();

        let manager = ConnectionManager::new(
            self.config.clone(),
            session.clone(),
            transport,
            state_tx,
            shutdown.clone(),
        );
        let task = tokio::spawn(manager.run());

        Ok(ConfClient::new(self.config, session, state_rx, shutdown, task))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
