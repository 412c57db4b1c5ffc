//! Client session: identity, request correlation and the local value cache.
//!
//! The session id is generated once and reused across reconnects. The set of
//! watched keys is the desired state; it survives disconnects and is
//! resubscribed in one request every time a connection comes up.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Transport;
use crate::constants::CHANGE_BROADCAST_CAPACITY;
use crate::metrics::CLIENT_PROTOCOL_VIOLATIONS;
use crate::metrics::CLIENT_SESSION_MISMATCHES;
use crate::Header;
use crate::Message;
use crate::NetworkError;
use crate::Payload;
use crate::Result;
use crate::WatchError;

type WatchData = BTreeMap<String, String>;
type PendingWatch = oneshot::Sender<Result<WatchData>>;

/// A value applied to the local cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub key: String,
    pub value: String,
}

pub struct ConfrSession {
    session_id: String,
    next_request_id: AtomicI64,
    watched: RwLock<BTreeSet<String>>,
    cache: DashMap<String, String>,
    inflight: DashMap<i64, PendingWatch>,
    transport: Arc<dyn Transport>,
    request_timeout: Option<Duration>,
    changes: broadcast::Sender<ConfigChange>,
    session_mismatches: AtomicU64,
    protocol_violations: AtomicU64,
}

impl ConfrSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        initial_keys: BTreeSet<String>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BROADCAST_CAPACITY);
        Self {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            next_request_id: AtomicI64::new(0),
            watched: RwLock::new(initial_keys),
            cache: DashMap::new(),
            inflight: DashMap::new(),
            transport,
            request_timeout,
            changes,
            session_mismatches: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last known value of `key`, `""` meaning the key does not exist
    pub fn get_config(
        &self,
        key: &str,
    ) -> Option<String> {
        self.cache.get(key).map(|v| v.value().clone())
    }

    pub fn watched_keys(&self) -> BTreeSet<String> {
        self.watched.read().clone()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Responses dropped because they carried another session's id
    pub fn session_mismatch_count(&self) -> u64 {
        self.session_mismatches.load(Ordering::Relaxed)
    }

    /// Values dropped because their key was never watched
    pub fn protocol_violation_count(&self) -> u64 {
        self.protocol_violations.load(Ordering::Relaxed)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Returns the value of `key`, watching it first if it is not cached yet.
    ///
    /// A cached key returns immediately without touching the network.
    /// Otherwise the key joins the watched set and the call waits for the
    /// server's answer, a disconnect, or the configured request timeout.
    pub async fn watch_config(
        &self,
        key: &str,
    ) -> Result<String> {
        if let Some(value) = self.get_config(key) {
            trace!(key, "Served from cache");
            return Ok(value);
        }

        self.watched.write().insert(key.to_string());
        let data = self.request_watch(BTreeSet::from([key.to_string()])).await?;
        data.get(key)
            .cloned()
            .ok_or_else(|| WatchError::NotConfirmed(key.to_string()).into())
    }

    /// Resubscribes the full watched set after a (re)connect.
    pub fn on_connected(&self) {
        let keys = self.watched_keys();
        if keys.is_empty() {
            return;
        }
        debug!(session_id = %self.session_id, count = keys.len(), "Rewatching keys");
        // Nobody waits on the resubscription; its response refreshes the cache.
        if let Err(e) = self.send_watch(keys) {
            warn!(session_id = %self.session_id, error = %e, "Failed to rewatch keys");
        }
    }

    /// Fails every pending request with a connectivity error.
    pub fn on_disconnected(&self) {
        let ids: Vec<i64> = self.inflight.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.inflight.remove(&id) {
                let _ = pending.send(Err(NetworkError::ConnectionLost.into()));
            }
        }
        debug!(session_id = %self.session_id, "Pending requests failed after disconnect");
    }

    pub fn handle_message(
        &self,
        message: Message,
    ) {
        let kind = message.kind();
        match message.payload {
            Payload::WatchResponse { data } => self.handle_watch_response(&message.header, data),
            Payload::ConfigChange { data } => self.handle_config_change(&message.header, data),
            Payload::Pong => trace!(session_id = %self.session_id, "Pong received"),
            Payload::Ping | Payload::WatchRequest { .. } => {
                warn!(session_id = %self.session_id, %kind, "Unexpected message from server, ignoring");
            }
        }
    }

    async fn request_watch(
        &self,
        keys: BTreeSet<String>,
    ) -> Result<WatchData> {
        let (id, response) = self.send_watch(keys)?;

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.inflight.remove(&id);
                    return Err(NetworkError::Timeout(limit).into());
                }
            },
            None => response.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(NetworkError::ConnectionLost.into()),
        }
    }

    fn send_watch(
        &self,
        keys: BTreeSet<String>,
    ) -> Result<(i64, oneshot::Receiver<Result<WatchData>>)> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(id, tx);

        let request = Message::watch_request(id, self.session_id.clone(), keys);
        if let Err(e) = self.transport.send(request) {
            self.inflight.remove(&id);
            return Err(e);
        }
        trace!(session_id = %self.session_id, correlation_id = id, "Watch request sent");
        Ok((id, rx))
    }

    fn handle_watch_response(
        &self,
        header: &Header,
        data: WatchData,
    ) {
        if !self.owns(header) {
            return;
        }

        let applied = self.apply(data);
        match self.inflight.remove(&header.correlation_id) {
            Some((_, pending)) => {
                if pending.send(Ok(applied)).is_err() {
                    trace!(correlation_id = header.correlation_id, "Watch response for an abandoned request");
                }
            }
            None => debug!(correlation_id = header.correlation_id, "Watch response without pending request"),
        }
    }

    fn handle_config_change(
        &self,
        header: &Header,
        data: WatchData,
    ) {
        if !self.owns(header) {
            return;
        }
        self.apply(data);
    }

    /// Session id check; a mismatch is counted and the message dropped.
    fn owns(
        &self,
        header: &Header,
    ) -> bool {
        if header.client_id == self.session_id {
            return true;
        }
        self.session_mismatches.fetch_add(1, Ordering::Relaxed);
        CLIENT_SESSION_MISMATCHES.inc();
        warn!(
            session_id = %self.session_id,
            received = %header.client_id,
            correlation_id = header.correlation_id,
            "Session id mismatch, dropping message"
        );
        false
    }

    /// Caches values of watched keys and returns what was applied. Values for
    /// keys outside the watched set are protocol violations and are dropped.
    fn apply(
        &self,
        data: WatchData,
    ) -> WatchData {
        let watched = self.watched.read();
        let mut applied = BTreeMap::new();
        for (key, value) in data {
            if !watched.contains(&key) {
                self.protocol_violations.fetch_add(1, Ordering::Relaxed);
                CLIENT_PROTOCOL_VIOLATIONS.inc();
                error!(session_id = %self.session_id, key = %key, "Received value for a key that is not watched");
                continue;
            }
            trace!(key = %key, value = %value, "Config updated");
            self.cache.insert(key.clone(), value.clone());
            let _ = self.changes.send(ConfigChange {
                key: key.clone(),
                value: value.clone(),
            });
            applied.insert(key, value);
        }
        applied
    }
}
