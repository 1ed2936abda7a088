//! Listener thread
//!
//! libusb dispatch blocks, so the session runs on a dedicated OS thread and
//! talks to the rest of the process through the channel bridge.

use crate::error::ListenerError;
use crate::event_loop::StopReason;
use crate::events::ListenerWorker;
use crate::report::ReportHandler;
use crate::session::{Session, SessionOptions};
use crate::usb::RusbHost;
use tracing::info;

/// Spawn the listener thread
///
/// The thread creates the libusb context, attaches per `options` and runs
/// until a shutdown command arrives or dispatch fails.
pub fn spawn_listener<R>(
    worker: ListenerWorker,
    options: SessionOptions,
    handler: R,
) -> std::io::Result<std::thread::JoinHandle<Result<StopReason, ListenerError>>>
where
    R: ReportHandler + 'static,
{
    std::thread::Builder::new()
        .name("usb-listener".to_string())
        .spawn(move || {
            let host = RusbHost::new().map_err(ListenerError::Initialization)?;
            let mut session = Session::new(host, handler, options).with_events(worker.event_sink());

            let reason = session.listen(worker.shutdown_signal())?;
            info!("Listener thread exiting: {}", reason);
            Ok(reason)
        })
}
