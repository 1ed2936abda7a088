//! Listener error types
//!
//! One variant per failure kind a listening session can hit. Attachment
//! failures abort only the candidate they occurred on; `Dispatch` is the only
//! kind that ends the event loop.

use crate::usb::TransferStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The libusb context could not be created
    #[error("Failed to initialize libusb: {0}")]
    Initialization(rusb::Error),

    /// The device list could not be retrieved
    #[error("Failed to enumerate USB devices: {0}")]
    Enumeration(rusb::Error),

    /// No device matching the candidate's identity could be opened
    #[error("Failed to open device {vendor_id:04x}:{product_id:04x}: {source}")]
    DeviceOpen {
        vendor_id: u16,
        product_id: u16,
        source: rusb::Error,
    },

    /// The active configuration descriptor was unavailable
    #[error("Failed to read active configuration of {vendor_id:04x}:{product_id:04x}: {source}")]
    ConfigRead {
        vendor_id: u16,
        product_id: u16,
        source: rusb::Error,
    },

    /// The active configuration no longer contains the endpoint seen at enumeration
    #[error("No interface owns endpoint {endpoint:#04x} on {vendor_id:04x}:{product_id:04x}")]
    InterfaceNotFound {
        vendor_id: u16,
        product_id: u16,
        endpoint: u8,
    },

    /// The interface is held by another process or a kernel driver
    #[error("Failed to claim interface {interface} on {vendor_id:04x}:{product_id:04x}: {source}")]
    InterfaceClaim {
        vendor_id: u16,
        product_id: u16,
        interface: u8,
        source: rusb::Error,
    },

    /// The initial transfer submission was rejected
    #[error("Failed to submit transfer on endpoint {endpoint:#04x}: {source}")]
    Submission { endpoint: u8, source: rusb::Error },

    /// Re-arming a completed transfer was rejected
    #[error("Failed to resubmit transfer on endpoint {endpoint:#04x}: {source}")]
    Resubmission { endpoint: u8, source: rusb::Error },

    /// A transfer completed with a non-success status
    #[error("Transfer on endpoint {endpoint:#04x} failed: {status}")]
    TransferFailed { endpoint: u8, status: TransferStatus },

    /// The event-dispatch primitive failed
    #[error("USB event dispatch failed: {0}")]
    Dispatch(rusb::Error),

    /// Discovery found nothing that could be attached
    #[error("No listenable HID mouse found")]
    NoListenableDevice,
}

impl ListenerError {
    /// Whether this error ends the event loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, ListenerError::Dispatch(_))
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;

impl From<ListenerError> for common::Error {
    fn from(err: ListenerError) -> Self {
        common::Error::Usb(err.to_string())
    }
}
