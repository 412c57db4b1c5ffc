use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::RequestResponseChannel;
use super::ResponseInfo;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// Single writer draining the response queue, so no two workers ever write
/// to the same connection concurrently.
pub struct ResponseHandler {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl ResponseHandler {
    pub fn start(channel: &RequestResponseChannel) -> Result<Self> {
        let responses = channel
            .take_response_receiver()
            .ok_or_else(|| Error::Fatal("response queue already consumed by another writer".into()))?;
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(drain_responses(responses, shutdown.clone()));
        Ok(Self { task, shutdown })
    }

    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.map_err(SystemError::TaskFailed)?;
        debug!("Response handler stopped");
        Ok(())
    }
}

async fn drain_responses(
    mut responses: mpsc::Receiver<ResponseInfo>,
    shutdown: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = shutdown.cancelled() => break,
            response = responses.recv() => match response {
                Some(response) => response,
                None => break,
            },
        };
        write_response(response);
    }
}

fn write_response(response: ResponseInfo) {
    let ResponseInfo { connection, message } = response;
    let Some(message) = message else {
        debug!(conn_id = connection.id(), "Closing connection on request");
        connection.close();
        return;
    };

    if !connection.is_active() {
        trace!(conn_id = connection.id(), kind = %message.kind(), "Dropping response for closed connection");
        return;
    }
    trace!(conn_id = connection.id(), kind = %message.kind(), correlation_id = message.correlation_id(), "Writing response");
    if let Err(e) = connection.write(message) {
        warn!(conn_id = connection.id(), error = %e, "Failed to write response");
    }
}
