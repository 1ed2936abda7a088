//! USB HID mouse listener
//!
//! Discovers HID boot-protocol pointer devices, claims the interface that owns
//! their interrupt-IN endpoint and keeps one interrupt transfer armed per
//! endpoint, forwarding every completed report to a [`ReportHandler`].
//!
//! The USB stack itself sits behind the [`UsbHost`] trait. [`RusbHost`] drives
//! libusb through `rusb`. `test_utils::MockHost` (feature `test-utils`)
//! simulates a descriptor tree for tests.

pub mod completion;
pub mod config;
pub mod descriptors;
pub mod enumerator;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod report;
pub mod selection;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfer;
pub mod usb;
pub mod worker;

pub use descriptors::Candidate;
pub use enumerator::DeviceEnumerator;
pub use error::{ListenerError, Result};
pub use event_loop::{EventLoop, StopReason};
pub use events::{
    EventSink, ListenerBridge, ListenerCommand, ListenerEvent, ListenerWorker, ShutdownSignal,
    create_listener_bridge,
};
pub use report::{HexLogger, ReportHandler};
pub use selection::{DeviceFilter, SelectionStrategy};
pub use session::{Session, SessionOptions};
pub use transfer::{OutstandingSet, RecordState, TransferManager, TransferRecord};
pub use usb::{RusbHost, UsbHost};
pub use worker::spawn_listener;
