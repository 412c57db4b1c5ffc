//! Client facade over one session and its connection manager.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ClientBuilder;
use super::ClientConfig;
use super::ConfigChange;
use super::ConfrSession;
use super::ConnectionState;
use crate::NetworkError;
use crate::Result;
use crate::SystemError;

/// Watches configuration keys on a config server and keeps their latest
/// values in a local cache.
///
/// Created through [`builder()`](ConfClient::builder).
///
/// ```rust,ignore
/// let client = ConfClient::builder().address("10.0.0.5").watch("db.host").start().await?;
/// client.wait_until_connected(Duration::from_secs(3)).await?;
/// let host = client.watch_config("db.host").await?;
/// ```
pub struct ConfClient {
    config: ClientConfig,
    session: Arc<ConfrSession>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfClient {
    pub(super) fn new(
        config: ClientConfig,
        session: Arc<ConfrSession>,
        state: watch::Receiver<ConnectionState>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            config,
            session,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stable for the lifetime of the client, reconnects included
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// See [`ConfrSession::watch_config`]
    pub async fn watch_config(
        &self,
        key: &str,
    ) -> Result<String> {
        self.session.watch_config(key).await
    }

    /// Cached value without network traffic
    pub fn get_config(
        &self,
        key: &str,
    ) -> Option<String> {
        self.session.get_config(key)
    }

    pub fn watched_keys(&self) -> BTreeSet<String> {
        self.session.watched_keys()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConfigChange> {
        self.session.subscribe_changes()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn session(&self) -> &Arc<ConfrSession> {
        &self.session
    }

    /// Waits until a connection is up, or fails after `limit`.
    pub async fn wait_until_connected(
        &self,
        limit: Duration,
    ) -> Result<()> {
        let mut state = self.state.clone();
        let outcome = match tokio::time::timeout(limit, state.wait_for(|s| *s == ConnectionState::Connected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(NetworkError::ChannelNotOpen.into()),
            Err(_) => Err(NetworkError::Timeout(limit).into()),
        };
        outcome
    }

    /// Stops reconnecting, closes the connection and waits for the manager.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(SystemError::TaskFailed)?;
        }
        debug!(session_id = %self.session_id(), "Client shut down");
        Ok(())
    }
}

impl Drop for ConfClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
