use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ConnectionHandle;
use super::RequestInfo;
use super::RequestResponseChannel;
use super::ResponseInfo;
use super::SessionTable;
use crate::metrics::REQUESTS_HANDLED;
use crate::Header;
use crate::Message;
use crate::Payload;
use crate::ValueDispatcher;

/// Protocol semantics applied by the handler workers.
pub struct ConfRequests {
    dispatcher: Arc<ValueDispatcher>,
    channel: Arc<RequestResponseChannel>,
    sessions: SessionTable,
}

impl ConfRequests {
    pub fn new(
        dispatcher: Arc<ValueDispatcher>,
        channel: Arc<RequestResponseChannel>,
    ) -> Self {
        Self {
            dispatcher,
            channel,
            sessions: SessionTable::default(),
        }
    }

    pub async fn handle(
        &self,
        request: RequestInfo,
    ) {
        let RequestInfo { connection, message } = request;
        if !connection.is_active() {
            debug!(conn_id = connection.id(), "Request from a closed connection, clearing session");
            self.clear_session(&connection).await;
            return;
        }

        let kind = message.kind();
        REQUESTS_HANDLED.with_label_values(&[kind.as_str()]).inc();

        let response = match message.payload {
            Payload::Ping => Some(Message::pong_for(&message.header)),
            Payload::WatchRequest { keys } => Some(self.watch(&connection, &message.header, keys).await),
            _ => {
                warn!(conn_id = connection.id(), %kind, "Unexpected message kind from client, ignoring");
                None
            }
        };

        if let Some(response) = response {
            if let Err(e) = self
                .channel
                .send_response(ResponseInfo::message(connection.clone(), response))
                .await
            {
                warn!(conn_id = connection.id(), error = %e, "Failed to queue response");
            }
        }
    }

    async fn watch(
        &self,
        connection: &ConnectionHandle,
        header: &Header,
        keys: BTreeSet<String>,
    ) -> Message {
        trace!(conn_id = connection.id(), client_id = %header.client_id, ?keys, "Watch request");
        let session = self
            .sessions
            .get_or_open(connection, &self.dispatcher, &self.channel);
        let data = session.watch(&self.dispatcher, &header.client_id, keys).await;
        Message::watch_response(header.correlation_id, header.client_id.clone(), data)
    }

    /// Drops the session of `connection`, deregistering all its listeners.
    pub async fn clear_session(
        &self,
        connection: &ConnectionHandle,
    ) {
        if let Some(session) = self.sessions.remove(connection.id()) {
            session.close(&self.dispatcher).await;
        }
    }

    /// Closes every remaining session
    pub async fn clear_all_sessions(&self) {
        for session in self.sessions.drain() {
            session.close(&self.dispatcher).await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }
}
