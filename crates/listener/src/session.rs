//! Listening session
//!
//! A [`Session`] owns the USB host and the set of outstanding transfer
//! records. Teardown cancels every armed transfer, waits (bounded) for the
//! cancellations to be acknowledged, then frees each record before the host
//! itself is dropped. Teardown runs on drop if it was not run explicitly.

use crate::completion::handle_completion;
use crate::descriptors::Candidate;
use crate::enumerator::DeviceEnumerator;
use crate::error::{ListenerError, Result};
use crate::event_loop::{EventLoop, StopReason};
use crate::events::{EventSink, ListenerEvent, ShutdownSignal};
use crate::report::ReportHandler;
use crate::selection::{DeviceFilter, SelectionStrategy};
use crate::transfer::{AttachOptions, OutstandingSet, RecordState, TransferManager};
use crate::usb::{TransferId, UsbHost};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct SessionOptions {
    pub strategy: SelectionStrategy,
    pub filters: Vec<DeviceFilter>,
    pub attach: AttachOptions,
    /// Upper bound on a single dispatch round
    pub dispatch_timeout: Duration,
    /// Upper bound on waiting for cancellation acknowledgements at teardown
    pub teardown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::First,
            filters: Vec::new(),
            attach: AttachOptions::default(),
            dispatch_timeout: Duration::from_millis(1),
            teardown_timeout: Duration::from_millis(100),
        }
    }
}

pub struct Session<H: UsbHost> {
    host: H,
    outstanding: OutstandingSet,
    handler: Box<dyn ReportHandler>,
    events: EventSink,
    options: SessionOptions,
}

impl<H: UsbHost> Session<H> {
    pub fn new(host: H, handler: impl ReportHandler + 'static, options: SessionOptions) -> Self {
        Self {
            host,
            outstanding: OutstandingSet::new(),
            handler: Box::new(handler),
            events: EventSink::disabled(),
            options,
        }
    }

    /// Publish attach/transfer/stop events to `events`
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn outstanding(&self) -> &OutstandingSet {
        &self.outstanding
    }

    /// Discover mouse candidates on the host
    pub fn discover(&mut self) -> Vec<Candidate> {
        DeviceEnumerator::discover(&mut self.host)
    }

    /// Attach to one candidate and track its transfer
    pub fn attach(&mut self, candidate: &Candidate) -> Result<TransferId> {
        let record = TransferManager::attach(
            &mut self.host,
            candidate,
            &self.options.attach,
            &self.events,
        )?;
        let transfer = record.transfer;
        self.outstanding.insert(record);
        Ok(transfer)
    }

    /// Discover, select and attach. Returns the attached candidates.
    pub fn start(&mut self) -> Result<Vec<Candidate>> {
        let discovered = self.discover();
        let selected = self
            .options
            .strategy
            .select(discovered, &self.options.filters);
        let single = self.options.strategy.single();

        debug!(
            "{} candidate(s) selected ({:?})",
            selected.len(),
            self.options.strategy
        );

        let mut attached = Vec::new();
        for candidate in selected {
            match self.attach(&candidate) {
                Ok(_) => {
                    self.events.emit(ListenerEvent::Attached { candidate });
                    attached.push(candidate);
                    if single {
                        break;
                    }
                }
                Err(error) => {
                    warn!("Abandoning {}: {}", candidate, error);
                    self.events
                        .emit(ListenerEvent::AttachFailed { candidate, error });
                }
            }
        }

        if attached.is_empty() {
            return Err(ListenerError::NoListenableDevice);
        }
        Ok(attached)
    }

    /// One bounded dispatch round; handles every completion it reports.
    ///
    /// Returns the number of completions handled.
    pub fn dispatch(&mut self) -> rusb::Result<usize> {
        let completions = self
            .host
            .handle_events(self.options.dispatch_timeout, &mut self.outstanding)?;

        let count = completions.len();
        for completion in completions {
            handle_completion(
                &mut self.host,
                &mut self.outstanding,
                self.handler.as_mut(),
                &self.events,
                completion,
            );
        }
        Ok(count)
    }

    /// Run the event loop until `shutdown` fires or dispatch fails
    pub fn run(&mut self, shutdown: ShutdownSignal) -> StopReason {
        let reason = EventLoop::new(shutdown).run(self);
        self.events.emit(ListenerEvent::Stopped { reason });
        reason
    }

    /// Discover, attach, run, and tear down
    pub fn listen(&mut self, shutdown: ShutdownSignal) -> Result<StopReason> {
        self.start()?;
        let reason = self.run(shutdown);
        self.teardown();
        Ok(reason)
    }

    /// Cancel, drain and free every outstanding record. Idempotent.
    pub fn teardown(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }

        for record in self.outstanding.iter_mut() {
            if record.state() != RecordState::Submitted {
                continue;
            }
            match self.host.cancel(record.transfer) {
                Ok(()) => record.set_state(RecordState::Cancelling),
                Err(e) => {
                    // Not in flight any more
                    debug!("Cancel of {} returned {}", record.candidate, e);
                    record.set_state(RecordState::Inert);
                }
            }
        }

        // Deadline is checked after each round, never before the first
        let deadline = Instant::now() + self.options.teardown_timeout;
        while self.outstanding.count(RecordState::Cancelling) > 0 {
            if let Err(e) = self.dispatch() {
                warn!("Dispatch failed while draining cancellations: {}", e);
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let mut released = 0;
        let mut abandoned = 0;
        for record in self.outstanding.drain() {
            if record.state() == RecordState::Cancelling {
                // A pending submission still references it; never freed
                error!(
                    "Cancellation of {} not acknowledged before teardown deadline, abandoning it",
                    record.candidate
                );
                abandoned += 1;
                continue;
            }
            record.release(&mut self.host);
            released += 1;
        }
        if abandoned > 0 {
            warn!("{} transfer(s) abandoned at teardown", abandoned);
        }
        info!("Session torn down, released {} transfer(s)", released);
    }
}

impl<H: UsbHost> Drop for Session<H> {
    fn drop(&mut self) {
        self.teardown();
    }
}
