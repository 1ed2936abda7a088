//! Common utilities for usb-mouse-listener
//!
//! Ambient pieces shared by the listener library and its binary: the
//! top-level error type and tracing setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
