//! Request/response channel between connection I/O and request processing.
//!
//! Inbound commands are split into one bounded FIFO lane per handler worker.
//! A connection always maps to the same lane, so its commands are processed
//! in the order its reader queued them even with several workers. Producers
//! wait when a lane is full, throttling the readers of that lane.
//!
//! Responses go through a single bounded queue drained by the response
//! writer.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::ConnectionHandle;
use crate::Message;
use crate::Result;
use crate::SystemError;

/// A decoded message together with the connection it arrived on
#[derive(Debug)]
pub struct RequestInfo {
    pub connection: ConnectionHandle,
    pub message: Message,
}

/// A message to write, or `None` to close the destination connection
#[derive(Debug)]
pub struct ResponseInfo {
    pub connection: ConnectionHandle,
    pub message: Option<Message>,
}

impl ResponseInfo {
    pub fn message(
        connection: ConnectionHandle,
        message: Message,
    ) -> Self {
        Self {
            connection,
            message: Some(message),
        }
    }

    pub fn close(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            message: None,
        }
    }
}

#[derive(Debug)]
pub enum ChannelCommand {
    Request(RequestInfo),
    /// The connection is gone; drop its session
    ClearSession(ConnectionHandle),
    /// Stops the worker that receives it
    Shutdown,
}

pub struct RequestResponseChannel {
    lanes: Vec<mpsc::Sender<ChannelCommand>>,
    lane_receivers: Mutex<Option<Vec<mpsc::Receiver<ChannelCommand>>>>,
    responses: mpsc::Sender<ResponseInfo>,
    response_receiver: Mutex<Option<mpsc::Receiver<ResponseInfo>>>,
}

impl RequestResponseChannel {
    /// `request_capacity` is split evenly across `lanes`, each lane holding at
    /// least one command.
    pub fn new(
        lanes: usize,
        request_capacity: usize,
        response_capacity: usize,
    ) -> Self {
        let lanes = lanes.max(1);
        let lane_capacity = request_capacity.div_ceil(lanes).max(1);

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..lanes).map(|_| mpsc::channel(lane_capacity)).unzip();
        let (responses, response_receiver) = mpsc::channel(response_capacity.max(1));

        Self {
            lanes: senders,
            lane_receivers: Mutex::new(Some(receivers)),
            responses,
            response_receiver: Mutex::new(Some(response_receiver)),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Queues a request, waiting while its lane is full.
    pub async fn send_request(
        &self,
        request: RequestInfo,
    ) -> Result<()> {
        let lane = self.lane_for(request.connection.id());
        lane.send(ChannelCommand::Request(request))
            .await
            .map_err(|_| SystemError::QueueClosed("request").into())
    }

    pub async fn send_clear_session(
        &self,
        connection: ConnectionHandle,
    ) -> Result<()> {
        let lane = self.lane_for(connection.id());
        lane.send(ChannelCommand::ClearSession(connection))
            .await
            .map_err(|_| SystemError::QueueClosed("request").into())
    }

    /// Queues one shutdown sentinel per lane.
    pub async fn send_shutdown(&self) -> Result<()> {
        for lane in &self.lanes {
            lane.send(ChannelCommand::Shutdown)
                .await
                .map_err(|_| SystemError::QueueClosed("request"))?;
        }
        Ok(())
    }

    pub async fn send_response(
        &self,
        response: ResponseInfo,
    ) -> Result<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| SystemError::QueueClosed("response").into())
    }

    /// Asks the response writer to close `connection` after the responses
    /// already queued for it.
    pub async fn close_connection(
        &self,
        connection: ConnectionHandle,
    ) -> Result<()> {
        self.send_response(ResponseInfo::close(connection)).await
    }

    /// Commands waiting across all lanes
    pub fn pending_requests(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.max_capacity() - lane.capacity())
            .sum()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.max_capacity() - self.responses.capacity()
    }

    /// Hands the lane receivers to the handler pool. Returns `None` once taken.
    pub(crate) fn take_lane_receivers(&self) -> Option<Vec<mpsc::Receiver<ChannelCommand>>> {
        self.lane_receivers.lock().take()
    }

    pub(crate) fn take_response_receiver(&self) -> Option<mpsc::Receiver<ResponseInfo>> {
        self.response_receiver.lock().take()
    }

    fn lane_for(
        &self,
        connection_id: u64,
    ) -> &mpsc::Sender<ChannelCommand> {
        &self.lanes[(connection_id % self.lanes.len() as u64) as usize]
    }
}
