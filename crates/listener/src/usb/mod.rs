//! USB subsystem
//!
//! The listener core never talks to libusb directly. It drives the primitives
//! of [`UsbHost`]: device list, descriptor reads, open/claim/release/close,
//! transfer allocate/submit/cancel/free and the bounded event dispatch.
//!
//! [`RusbHost`] is the production implementation on top of `rusb`.

pub mod host;
pub mod rusb_host;

pub use host::{Completion, HandleId, TransferBuffers, TransferId, TransferStatus, UsbHost};
pub use rusb_host::RusbHost;
