use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::ConnectionHandle;
use super::ConnectionId;
use super::RequestResponseChannel;
use super::ResponseInfo;
use crate::metrics::ACTIVE_SESSIONS;
use crate::Listener;
use crate::Message;
use crate::ValueChanged;
use crate::ValueDispatcher;

struct SessionState {
    /// Keys registered with the dispatcher under this session's listener
    watched: BTreeSet<String>,
    closed: bool,
}

/// Watch registry of one connection.
///
/// All watch and teardown operations run under the session lock, so a
/// connection close can never interleave with an in-flight watch.
pub struct ServerSession {
    connection: ConnectionHandle,
    listener: Listener,
    /// Client id from the latest watch request, stamped on notifications
    client_id: Arc<ArcSwap<String>>,
    state: Mutex<SessionState>,
    forwarder: JoinHandle<()>,
}

impl ServerSession {
    pub(crate) fn open(
        connection: ConnectionHandle,
        dispatcher: &ValueDispatcher,
        channel: Arc<RequestResponseChannel>,
    ) -> Self {
        let (sink, changes) = mpsc::unbounded_channel();
        let listener = Listener::new(dispatcher.next_listener_id(), sink);
        let client_id = Arc::new(ArcSwap::from_pointee(String::new()));
        let forwarder = tokio::spawn(forward_changes(
            connection.clone(),
            client_id.clone(),
            changes,
            channel,
        ));
        ACTIVE_SESSIONS.inc();
        debug!(conn_id = connection.id(), listener_id = listener.id(), "Session created");

        Self {
            connection,
            listener,
            client_id,
            state: Mutex::new(SessionState {
                watched: BTreeSet::new(),
                closed: false,
            }),
            forwarder,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Registers every key and returns the value known for each. Keys whose
    /// registration fails are logged and left out of the result.
    pub async fn watch(
        &self,
        dispatcher: &ValueDispatcher,
        client_id: &str,
        keys: BTreeSet<String>,
    ) -> BTreeMap<String, String> {
        let mut state = self.state.lock().await;
        let mut data = BTreeMap::new();
        if state.closed {
            debug!(conn_id = self.connection.id(), "Watch on a closed session ignored");
            return data;
        }
        self.client_id.store(Arc::new(client_id.to_string()));

        for key in keys {
            match dispatcher.register(&key, self.listener.clone()).await {
                Ok(value) => {
                    trace!(conn_id = self.connection.id(), key = %key, "Key watched");
                    state.watched.insert(key.clone());
                    data.insert(key, value);
                }
                Err(e) => {
                    error!(conn_id = self.connection.id(), key = %key, error = %e, "Failed to watch key");
                }
            }
        }
        data
    }

    /// Deregisters every watched key and stops forwarding. Idempotent.
    pub async fn close(
        &self,
        dispatcher: &ValueDispatcher,
    ) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        for key in std::mem::take(&mut state.watched) {
            if let Err(e) = dispatcher.deregister(&key, self.listener.id()).await {
                error!(conn_id = self.connection.id(), key = %key, error = %e, "Failed to deregister key");
            }
        }
        self.forwarder.abort();
        ACTIVE_SESSIONS.dec();
        debug!(conn_id = self.connection.id(), "Session cleared");
    }

    pub async fn watched_keys(&self) -> BTreeSet<String> {
        self.state.lock().await.watched.clone()
    }
}

async fn forward_changes(
    connection: ConnectionHandle,
    client_id: Arc<ArcSwap<String>>,
    mut changes: mpsc::UnboundedReceiver<ValueChanged>,
    channel: Arc<RequestResponseChannel>,
) {
    while let Some(change) = changes.recv().await {
        let data = BTreeMap::from([(change.key, change.value)]);
        let notification = Message::config_change(client_id.load().as_str(), data);
        if channel
            .send_response(ResponseInfo::message(connection.clone(), notification))
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Sessions indexed by connection id, created on first watch and removed on
/// connection close.
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<ConnectionId, Arc<ServerSession>>,
}

impl SessionTable {
    pub fn get_or_open(
        &self,
        connection: &ConnectionHandle,
        dispatcher: &ValueDispatcher,
        channel: &Arc<RequestResponseChannel>,
    ) -> Arc<ServerSession> {
        self.sessions
            .entry(connection.id())
            .or_insert_with(|| {
                Arc::new(ServerSession::open(connection.clone(), dispatcher, channel.clone()))
            })
            .clone()
    }

    pub fn get(
        &self,
        id: ConnectionId,
    ) -> Option<Arc<ServerSession>> {
        self.sessions.get(&id).map(|s| s.value().clone())
    }

    pub fn remove(
        &self,
        id: ConnectionId,
    ) -> Option<Arc<ServerSession>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn drain(&self) -> Vec<Arc<ServerSession>> {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
