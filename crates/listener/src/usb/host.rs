//! The USB host trait and its transfer vocabulary

use crate::descriptors::{ConfigSnapshot, DeviceSummary};
use std::fmt;
use std::time::Duration;

/// Opaque handle to an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u32);

/// Opaque handle to an allocated interrupt transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u32);

/// Final status of a transfer as reported by dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

impl TransferStatus {
    /// Status a failed interrupt read maps to
    pub fn from_error(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransferStatus::TimedOut,
            rusb::Error::Pipe => TransferStatus::Stall,
            rusb::Error::NoDevice => TransferStatus::NoDevice,
            rusb::Error::Overflow => TransferStatus::Overflow,
            _ => TransferStatus::Error,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Error => "error",
            TransferStatus::TimedOut => "timed out",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Stall => "stall",
            TransferStatus::NoDevice => "no device",
            TransferStatus::Overflow => "overflow",
        };
        f.write_str(name)
    }
}

/// A finished transfer reported by [`UsbHost::handle_events`]
///
/// On `Completed`, the first `actual_length` bytes of the transfer's buffer
/// hold the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub transfer: TransferId,
    pub status: TransferStatus,
    pub actual_length: usize,
}

/// Buffer lookup handed to dispatch so reports land in the owning record
pub trait TransferBuffers {
    fn buffer_mut(&mut self, transfer: TransferId) -> Option<&mut [u8]>;
}

/// Primitives consumed from the USB host-controller stack
pub trait UsbHost {
    /// Snapshot of every device currently attached
    fn device_list(&mut self) -> rusb::Result<Vec<DeviceSummary>>;

    /// Drop whatever `device_list` retained
    fn free_device_list(&mut self);

    /// Configuration descriptor `index` of a listed device
    fn config_descriptor(
        &mut self,
        device: &DeviceSummary,
        index: u8,
    ) -> rusb::Result<ConfigSnapshot>;

    /// Open the first present device with this identity
    fn open(&mut self, vendor_id: u16, product_id: u16) -> rusb::Result<HandleId>;

    fn set_auto_detach_kernel_driver(&mut self, handle: HandleId, enable: bool)
    -> rusb::Result<()>;

    fn active_config_descriptor(&mut self, handle: HandleId) -> rusb::Result<ConfigSnapshot>;

    fn claim_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()>;

    fn release_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()>;

    fn close(&mut self, handle: HandleId);

    /// Allocate an interrupt transfer bound to `endpoint` on `handle`
    fn alloc_transfer(&mut self, handle: HandleId, endpoint: u8) -> rusb::Result<TransferId>;

    /// Arm the transfer with no per-request timeout
    fn submit(&mut self, transfer: TransferId) -> rusb::Result<()>;

    /// Request cancellation; a `Cancelled` completion follows on a later dispatch
    fn cancel(&mut self, transfer: TransferId) -> rusb::Result<()>;

    fn free_transfer(&mut self, transfer: TransferId);

    /// Block for at most `timeout` and report the transfers that finished.
    ///
    /// An `Err` is a dispatch-level failure, not a transfer failure.
    fn handle_events(
        &mut self,
        timeout: Duration,
        buffers: &mut dyn TransferBuffers,
    ) -> rusb::Result<Vec<Completion>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_error() {
        assert_eq!(
            TransferStatus::from_error(rusb::Error::Pipe),
            TransferStatus::Stall
        );
        assert_eq!(
            TransferStatus::from_error(rusb::Error::NoDevice),
            TransferStatus::NoDevice
        );
        assert_eq!(
            TransferStatus::from_error(rusb::Error::Overflow),
            TransferStatus::Overflow
        );
        assert_eq!(
            TransferStatus::from_error(rusb::Error::Io),
            TransferStatus::Error
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TransferStatus::NoDevice.to_string(), "no device");
        assert_eq!(TransferStatus::Completed.to_string(), "completed");
    }
}
