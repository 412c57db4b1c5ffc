use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use super::ChannelCommand;
use super::ConfRequests;
use super::RequestResponseChannel;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// Fixed set of workers, one per request lane.
pub struct RequestHandlerPool {
    channel: Arc<RequestResponseChannel>,
    workers: Vec<JoinHandle<()>>,
}

impl RequestHandlerPool {
    pub fn start(
        channel: Arc<RequestResponseChannel>,
        requests: Arc<ConfRequests>,
    ) -> Result<Self> {
        let lanes = channel
            .take_lane_receivers()
            .ok_or_else(|| Error::Fatal("request lanes already consumed by another pool".into()))?;

        let workers = lanes
            .into_iter()
            .enumerate()
            .map(|(worker_id, lane)| tokio::spawn(run_worker(worker_id, lane, requests.clone())))
            .collect::<Vec<_>>();
        debug!(workers = workers.len(), "Request handler pool started");

        Ok(Self { channel, workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Sends one shutdown sentinel per worker and waits for all of them.
    pub async fn shutdown(self) -> Result<()> {
        self.channel.send_shutdown().await?;
        for worker in self.workers {
            worker.await.map_err(SystemError::TaskFailed)?;
        }
        debug!("Request handler pool stopped");
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    mut lane: mpsc::Receiver<ChannelCommand>,
    requests: Arc<ConfRequests>,
) {
    while let Some(command) = lane.recv().await {
        match command {
            ChannelCommand::Request(request) => requests.handle(request).await,
            ChannelCommand::ClearSession(connection) => requests.clear_session(&connection).await,
            ChannelCommand::Shutdown => {
                trace!(worker_id, "Shutdown sentinel received");
                break;
            }
        }
    }
    debug!(worker_id, "Request handler stopped");
}
