//! Channel bridge between the listener thread and its owner
//!
//! Commands flow into the blocking listener thread, events flow out. Events
//! make every per-candidate and per-transfer failure observable to the caller
//! instead of only showing up in the log.

use crate::descriptors::Candidate;
use crate::error::ListenerError;
use crate::event_loop::StopReason;
use crate::usb::TransferStatus;
use async_channel::{Receiver, Sender, TryRecvError, bounded};
use tracing::debug;

/// Commands from the owner to the listener thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCommand {
    /// Stop the event loop and tear the session down
    Shutdown,
}

/// Events from the listener thread
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// A transfer is armed on this candidate
    Attached { candidate: Candidate },

    /// Kernel driver auto-detach could not be enabled; attachment continued
    AutoDetachFailed {
        candidate: Candidate,
        error: rusb::Error,
    },

    /// Attachment to this candidate was abandoned
    AttachFailed {
        candidate: Candidate,
        error: ListenerError,
    },

    /// A transfer completed with a non-success status and went inert
    TransferFailed {
        candidate: Candidate,
        status: TransferStatus,
    },

    /// Re-arming failed; the record was retired and its resources freed
    ResubmissionFailed {
        candidate: Candidate,
        error: rusb::Error,
    },

    /// The event loop exited
    Stopped { reason: StopReason },
}

/// Handle for the owning side (async)
#[derive(Clone)]
pub struct ListenerBridge {
    cmd_tx: Sender<ListenerCommand>,
    event_rx: Receiver<ListenerEvent>,
}

impl ListenerBridge {
    /// Send a command to the listener thread
    pub async fn send_command(&self, cmd: ListenerCommand) -> common::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Ask the listener to stop
    pub async fn shutdown(&self) -> common::Result<()> {
        self.send_command(ListenerCommand::Shutdown).await
    }

    /// Receive an event from the listener thread
    pub async fn recv_event(&self) -> common::Result<ListenerEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| common::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without waiting
    pub fn try_recv_event(&self) -> Option<ListenerEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Handle for the listener thread (blocking)
pub struct ListenerWorker {
    pub(crate) cmd_rx: Receiver<ListenerCommand>,
    pub event_tx: Sender<ListenerEvent>,
}

impl ListenerWorker {
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(self.cmd_rx.clone())
    }

    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.event_tx.clone())
    }
}

/// Create the channel bridge between the owner and the listener thread
///
/// Returns (ListenerBridge for the owner, ListenerWorker for the listener thread)
pub fn create_listener_bridge() -> (ListenerBridge, ListenerWorker) {
    let (cmd_tx, cmd_rx) = bounded(16);
    let (event_tx, event_rx) = bounded(256);

    (
        ListenerBridge { cmd_tx, event_rx },
        ListenerWorker { cmd_rx, event_tx },
    )
}

/// Cooperative stop flag checked once per event-loop iteration
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    rx: Option<Receiver<ListenerCommand>>,
}

impl ShutdownSignal {
    pub fn new(rx: Receiver<ListenerCommand>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Whether a shutdown was requested or the owner went away
    pub fn should_stop(&self) -> bool {
        let Some(rx) = &self.rx else {
            return false;
        };

        match rx.try_recv() {
            Ok(ListenerCommand::Shutdown) => true,
            Err(TryRecvError::Closed) => {
                debug!("Command channel closed, stopping");
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Non-blocking event publisher; a missing or full channel only drops the event
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<ListenerEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<ListenerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ListenerEvent) {
        if let Some(tx) = &self.tx
            && let Err(e) = tx.try_send(event)
        {
            debug!("Dropped listener event: {}", e);
        }
    }
}
