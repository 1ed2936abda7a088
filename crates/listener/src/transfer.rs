//! Transfer records and attachment
//!
//! [`TransferManager::attach`] takes a candidate from "just discovered" to
//! "interrupt transfer armed". Every failure branch undoes exactly what was
//! acquired before it, in reverse order, so an abandoned candidate never
//! leaves a claimed interface or an open handle behind.

use crate::descriptors::{Candidate, interface_for_endpoint};
use crate::error::{ListenerError, Result};
use crate::events::{EventSink, ListenerEvent};
use crate::usb::{HandleId, TransferBuffers, TransferId, UsbHost};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Lifecycle of a transfer record inside the outstanding set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Armed; a completion is expected
    Submitted,
    /// Completed with a failure status and not re-armed
    Inert,
    /// Cancellation requested, acknowledgement pending
    Cancelling,
    /// Cancellation acknowledged
    Cancelled,
}

/// One armed interrupt transfer and everything it exclusively owns
#[derive(Debug)]
pub struct TransferRecord {
    pub candidate: Candidate,
    pub handle: HandleId,
    pub interface: u8,
    pub transfer: TransferId,
    buffer: Vec<u8>,
    state: RecordState,
}

impl TransferRecord {
    pub fn state(&self) -> RecordState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RecordState) {
        self.state = state;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// First `len` bytes of the buffer, clamped to its capacity
    pub fn report(&self, len: usize) -> &[u8] {
        &self.buffer[..len.min(self.buffer.len())]
    }

    /// Free the transfer, release the interface and close the handle.
    ///
    /// The transfer must not be in flight.
    pub fn release<H: UsbHost + ?Sized>(self, host: &mut H) {
        host.free_transfer(self.transfer);
        if let Err(e) = host.release_interface(self.handle, self.interface) {
            debug!(
                "Failed to release interface {} of {}: {}",
                self.interface, self.candidate, e
            );
        }
        host.close(self.handle);
        debug!("Released {}", self.candidate);
    }
}

/// Transfer records currently owned by a session, keyed by transfer
#[derive(Debug, Default)]
pub struct OutstandingSet {
    records: BTreeMap<TransferId, TransferRecord>,
}

impl OutstandingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: TransferRecord) {
        self.records.insert(record.transfer, record);
    }

    pub fn get(&self, transfer: TransferId) -> Option<&TransferRecord> {
        self.records.get(&transfer)
    }

    pub fn get_mut(&mut self, transfer: TransferId) -> Option<&mut TransferRecord> {
        self.records.get_mut(&transfer)
    }

    pub fn remove(&mut self, transfer: TransferId) -> Option<TransferRecord> {
        self.records.remove(&transfer)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TransferRecord> {
        self.records.values_mut()
    }

    /// Number of records in `state`
    pub fn count(&self, state: RecordState) -> usize {
        self.iter().filter(|r| r.state == state).count()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = TransferRecord> + '_ {
        std::mem::take(&mut self.records).into_values()
    }
}

impl TransferBuffers for OutstandingSet {
    fn buffer_mut(&mut self, transfer: TransferId) -> Option<&mut [u8]> {
        self.records
            .get_mut(&transfer)
            .map(|r| r.buffer.as_mut_slice())
    }
}

/// Parameters for [`TransferManager::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOptions {
    pub buffer_capacity: usize,
    pub auto_detach_kernel_driver: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 8,
            auto_detach_kernel_driver: true,
        }
    }
}

/// Opens, claims and arms candidates
pub struct TransferManager;

impl TransferManager {
    /// Open the candidate's device, claim the interface owning its endpoint
    /// and submit one interrupt transfer.
    ///
    /// On success the returned record is armed and owns the handle, the
    /// claimed interface and the transfer. On failure nothing is left held.
    pub fn attach<H: UsbHost + ?Sized>(
        host: &mut H,
        candidate: &Candidate,
        options: &AttachOptions,
        events: &EventSink,
    ) -> Result<TransferRecord> {
        let Candidate {
            vendor_id,
            product_id,
            endpoint_address: endpoint,
        } = *candidate;

        let handle = host
            .open(vendor_id, product_id)
            .map_err(|source| ListenerError::DeviceOpen {
                vendor_id,
                product_id,
                source,
            })?;
        debug!("Opened device {:04x}:{:04x}", vendor_id, product_id);

        if let Err(error) =
            host.set_auto_detach_kernel_driver(handle, options.auto_detach_kernel_driver)
        {
            // Claiming may still work if no kernel driver is bound
            warn!(
                "Could not set kernel driver auto-detach on {:04x}:{:04x}: {}",
                vendor_id, product_id, error
            );
            events.emit(ListenerEvent::AutoDetachFailed {
                candidate: *candidate,
                error,
            });
        }

        let config = match host.active_config_descriptor(handle) {
            Ok(config) => config,
            Err(source) => {
                host.close(handle);
                return Err(ListenerError::ConfigRead {
                    vendor_id,
                    product_id,
                    source,
                });
            }
        };

        let Some(interface) = interface_for_endpoint(&config, endpoint) else {
            host.close(handle);
            return Err(ListenerError::InterfaceNotFound {
                vendor_id,
                product_id,
                endpoint,
            });
        };
        drop(config);

        if let Err(source) = host.claim_interface(handle, interface) {
            host.close(handle);
            return Err(ListenerError::InterfaceClaim {
                vendor_id,
                product_id,
                interface,
                source,
            });
        }
        debug!("Claimed interface {} on {}", interface, candidate);

        let unwind = |host: &mut H| {
            if let Err(e) = host.release_interface(handle, interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
            host.close(handle);
        };

        let transfer = match host.alloc_transfer(handle, endpoint) {
            Ok(transfer) => transfer,
            Err(source) => {
                unwind(host);
                return Err(ListenerError::Submission { endpoint, source });
            }
        };

        if let Err(source) = host.submit(transfer) {
            host.free_transfer(transfer);
            unwind(host);
            return Err(ListenerError::Submission { endpoint, source });
        }

        info!(
            "Listening on {} (interface {}, {} byte buffer)",
            candidate, interface, options.buffer_capacity
        );

        Ok(TransferRecord {
            candidate: *candidate,
            handle,
            interface,
            transfer,
            buffer: vec![0u8; options.buffer_capacity],
            state: RecordState::Submitted,
        })
    }
}
