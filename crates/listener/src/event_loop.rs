//! Event loop
//!
//! Blocks on the host's dispatch primitive with a short timeout, over and
//! over. Completion handling runs synchronously inside each dispatch round on
//! the calling thread. The loop ends on a shutdown request, checked before
//! every round, or on a dispatch failure. Running out of armed transfers does
//! not end it.

use crate::error::ListenerError;
use crate::events::ShutdownSignal;
use crate::session::Session;
use crate::usb::UsbHost;
use std::fmt;
use tracing::{debug, error, info};

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested or the command channel closed
    Shutdown,
    /// The dispatch primitive failed
    Dispatch(rusb::Error),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Shutdown => f.write_str("shutdown requested"),
            StopReason::Dispatch(e) => write!(f, "dispatch failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

pub struct EventLoop {
    shutdown: ShutdownSignal,
    state: LoopState,
    iterations: u64,
}

impl EventLoop {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            state: LoopState::Running,
            iterations: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Dispatch rounds performed so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run until stopped
    pub fn run<H: UsbHost>(&mut self, session: &mut Session<H>) -> StopReason {
        info!(
            "Event loop running with {} outstanding transfer(s)",
            session.outstanding().len()
        );

        loop {
            if let Some(reason) = self.step(session) {
                info!(
                    "Event loop stopped after {} rounds: {}",
                    self.iterations, reason
                );
                return reason;
            }
        }
    }

    /// One iteration; `Some` once the loop has stopped
    pub fn step<H: UsbHost>(&mut self, session: &mut Session<H>) -> Option<StopReason> {
        if let LoopState::Stopped(reason) = self.state {
            return Some(reason);
        }

        if self.shutdown.should_stop() {
            self.state = LoopState::Stopped(StopReason::Shutdown);
            return Some(StopReason::Shutdown);
        }

        self.iterations += 1;
        match session.dispatch() {
            Ok(_) => None,
            Err(rusb::Error::Interrupted) => {
                // Interrupted, but not fatal - continue
                debug!("USB event handling interrupted");
                None
            }
            Err(e) => {
                error!("{}", ListenerError::Dispatch(e));
                let reason = StopReason::Dispatch(e);
                self.state = LoopState::Stopped(reason);
                Some(reason)
            }
        }
    }
}
