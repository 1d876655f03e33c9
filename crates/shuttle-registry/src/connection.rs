//! Handles to live realtime connections.
//!
//! A connection's socket is owned by its own task. Everyone else talks
//! to it through a [`LiveConnection`]: a cheap, cloneable handle with two
//! lanes into that task.
//!
//! ```text
//! send_frame() ──→ bounded frame queue ──┐
//!                                        ├──→ OutboundReceiver::recv()
//! close()      ──→ one-shot close ───────┘     (close first)
//! ```
//!
//! The frame queue is bounded. A peer that stops reading fills its own
//! queue and further frames to it fail with
//! [`RegistryError::QueueFull`]; broadcasters log that and move on, so
//! memory per connection stays capped. Close travels on its own lane and
//! is seen ahead of any frames still queued, so a full queue can never
//! hold back a supersession.

use std::sync::{Arc, Mutex, PoisonError};

use shuttle_protocol::{GroupKey, Identity};
use shuttle_transport::ConnectionId;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

use crate::RegistryError;

/// Frames a connection may have queued before sends to it fail.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Something queued for a connection task to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame to write to the socket. Shared so one broadcast
    /// serializes once.
    Frame(Arc<str>),
    /// Close the socket and end the task.
    Close(String),
}

/// Receiving half of a connection's outbound lanes.
#[derive(Debug)]
pub struct OutboundReceiver {
    frames: mpsc::Receiver<Arc<str>>,
    close: oneshot::Receiver<String>,
    close_done: bool,
}

impl OutboundReceiver {
    /// Waits for the next thing to act on. A pending close wins over
    /// queued frames.
    ///
    /// Returns `None` once every handle is gone and the queue is drained.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            reason = &mut self.close, if !self.close_done => {
                self.close_done = true;
                match reason {
                    Ok(reason) => Some(Outbound::Close(reason)),
                    Err(_) => self.frames.recv().await.map(Outbound::Frame),
                }
            }
            frame = self.frames.recv() => frame.map(Outbound::Frame),
        }
    }

    /// Non-blocking [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        if !self.close_done {
            match self.close.try_recv() {
                Ok(reason) => {
                    self.close_done = true;
                    return Ok(Outbound::Close(reason));
                }
                Err(oneshot::error::TryRecvError::Closed) => self.close_done = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.frames.try_recv().map(Outbound::Frame)
    }
}

/// A registry's view of one live connection.
#[derive(Debug, Clone)]
pub struct LiveConnection {
    identity: Arc<Identity>,
    conn_id: ConnectionId,
    group: Option<GroupKey>,
    frames: mpsc::Sender<Arc<str>>,
    close: Arc<Mutex<Option<oneshot::Sender<String>>>>,
}

impl LiveConnection {
    /// Creates a handle and the receiver its connection task drains,
    /// with room for [`OUTBOUND_CAPACITY`] frames.
    pub fn channel(
        identity: Identity,
        conn_id: ConnectionId,
        group: Option<GroupKey>,
    ) -> (Self, OutboundReceiver) {
        Self::with_capacity(identity, conn_id, group, OUTBOUND_CAPACITY)
    }

    /// Like [`channel`](Self::channel) with a custom queue size.
    /// `capacity` must be nonzero.
    pub fn with_capacity(
        identity: Identity,
        conn_id: ConnectionId,
        group: Option<GroupKey>,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Self {
            identity: Arc::new(identity),
            conn_id,
            group,
            frames: frames_tx,
            close: Arc::new(Mutex::new(Some(close_tx))),
        };
        let receiver = OutboundReceiver {
            frames: frames_rx,
            close: close_rx,
            close_done: false,
        };
        (handle, receiver)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// The group this connection joined, if it is a group connection.
    pub fn group(&self) -> Option<&GroupKey> {
        self.group.as_ref()
    }

    /// Queues a text frame without waiting.
    ///
    /// # Errors
    /// - [`RegistryError::QueueFull`] if the peer is not keeping up.
    /// - [`RegistryError::ChannelClosed`] once the connection task is gone.
    pub fn send_frame(&self, frame: impl Into<Arc<str>>) -> Result<(), RegistryError> {
        self.frames.try_send(frame.into()).map_err(|e| match e {
            TrySendError::Full(_) => RegistryError::QueueFull(self.conn_id),
            TrySendError::Closed(_) => RegistryError::ChannelClosed(self.conn_id),
        })
    }

    /// Asks the connection task to close its socket. Only the first
    /// close of a connection takes effect; closing one that is already
    /// gone is a no-op.
    pub fn close(&self, reason: impl Into<String>) {
        let sender = self
            .close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(reason.into());
        }
    }

    /// `true` once the connection task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}
