//! Completion handling
//!
//! Invoked for every completion a dispatch round reports. A successful
//! completion forwards the report and re-arms the same transfer; anything else
//! leaves the record inert. A failed re-arm retires the record: it is removed
//! from the outstanding set and its transfer, interface and handle are freed.

use crate::error::ListenerError;
use crate::events::{EventSink, ListenerEvent};
use crate::report::ReportHandler;
use crate::transfer::{OutstandingSet, RecordState};
use crate::usb::{Completion, TransferStatus, UsbHost};
use tracing::{trace, warn};

/// What became of the record a completion belonged to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Report forwarded, transfer armed again
    Rearmed,
    /// Report forwarded, re-arm failed, record retired and freed
    Retired(ListenerError),
    /// Failure status; record kept but no longer armed
    Inert(ListenerError),
    /// Completion of a transfer being cancelled
    CancelAcknowledged,
    /// No record for this transfer
    Unknown,
}

pub fn handle_completion<H: UsbHost + ?Sized>(
    host: &mut H,
    outstanding: &mut OutstandingSet,
    handler: &mut dyn ReportHandler,
    events: &EventSink,
    completion: Completion,
) -> CompletionOutcome {
    let Some(record) = outstanding.get_mut(completion.transfer) else {
        trace!("Completion for unknown {:?}", completion.transfer);
        return CompletionOutcome::Unknown;
    };

    if matches!(record.state(), RecordState::Cancelling | RecordState::Cancelled) {
        trace!(
            "Cancellation of {} acknowledged ({})",
            record.candidate, completion.status
        );
        record.set_state(RecordState::Cancelled);
        return CompletionOutcome::CancelAcknowledged;
    }

    let candidate = record.candidate;
    let endpoint = candidate.endpoint_address;

    if completion.status != TransferStatus::Completed {
        let error = ListenerError::TransferFailed {
            endpoint,
            status: completion.status,
        };
        warn!("{} on {}", error, candidate);
        record.set_state(RecordState::Inert);
        events.emit(ListenerEvent::TransferFailed {
            candidate,
            status: completion.status,
        });
        return CompletionOutcome::Inert(error);
    }

    trace!(
        "{} bytes from {}",
        completion.actual_length, candidate
    );
    handler.on_report(&candidate, record.report(completion.actual_length));

    match host.submit(completion.transfer) {
        Ok(()) => CompletionOutcome::Rearmed,
        Err(source) => {
            let error = ListenerError::Resubmission { endpoint, source };
            warn!("{} on {}, retiring it", error, candidate);
            if let Some(record) = outstanding.remove(completion.transfer) {
                record.release(host);
            }
            events.emit(ListenerEvent::ResubmissionFailed {
                candidate,
                error: source,
            });
            CompletionOutcome::Retired(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::Candidate;
    use crate::events::create_listener_bridge;
    use crate::test_utils::{HostCall, MockHost, ReportLog, mouse_device};
    use crate::transfer::{AttachOptions, TransferManager};
    use std::time::Duration;

    const MOUSE: Candidate = Candidate {
        vendor_id: 0x046d,
        product_id: 0xc077,
        endpoint_address: 0x81,
    };

    fn attached() -> (MockHost, OutstandingSet, crate::usb::TransferId) {
        let mut host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
        let record = TransferManager::attach(
            &mut host,
            &MOUSE,
            &AttachOptions::default(),
            &EventSink::disabled(),
        )
        .unwrap();
        let id = record.transfer;
        let mut outstanding = OutstandingSet::new();
        outstanding.insert(record);
        (host, outstanding, id)
    }

    fn dispatch(host: &mut MockHost, outstanding: &mut OutstandingSet) -> Vec<Completion> {
        host.handle_events(Duration::from_millis(1), outstanding)
            .unwrap()
    }

    #[test]
    fn test_success_forwards_and_rearms() {
        let (mut host, mut outstanding, id) = attached();
        let mut log = ReportLog::new();
        host.push_report(id, &[0x00, 0x01, 0xff, 0x00]);

        let completions = dispatch(&mut host, &mut outstanding);
        let submits_before = host.count_calls(|c| *c == HostCall::Submit(id));
        let outcome = handle_completion(
            &mut host,
            &mut outstanding,
            &mut log,
            &EventSink::disabled(),
            completions[0],
        );

        assert_eq!(outcome, CompletionOutcome::Rearmed);
        assert_eq!(log.reports(), vec![vec![0x00, 0x01, 0xff, 0x00]]);
        assert_eq!(host.count_calls(|c| *c == HostCall::Submit(id)), submits_before + 1);
        assert_eq!(host.armed_transfers(), 1);
    }

    #[test]
    fn test_failure_status_goes_inert() {
        let (mut host, mut outstanding, id) = attached();
        let mut log = ReportLog::new();
        let (bridge, worker) = create_listener_bridge();
        host.push_status(id, TransferStatus::NoDevice);

        let completions = dispatch(&mut host, &mut outstanding);
        let submits_before = host.count_calls(|c| matches!(c, HostCall::Submit(_)));
        let outcome = handle_completion(
            &mut host,
            &mut outstanding,
            &mut log,
            &worker.event_sink(),
            completions[0],
        );

        assert!(matches!(outcome, CompletionOutcome::Inert(_)));
        assert!(log.is_empty());
        assert_eq!(
            host.count_calls(|c| matches!(c, HostCall::Submit(_))),
            submits_before
        );
        assert_eq!(outstanding.get(id).unwrap().state(), RecordState::Inert);
        assert!(matches!(
            bridge.try_recv_event(),
            Some(ListenerEvent::TransferFailed {
                status: TransferStatus::NoDevice,
                ..
            })
        ));
    }

    #[test]
    fn test_resubmission_failure_retires_record() {
        let (mut host, mut outstanding, id) = attached();
        let mut log = ReportLog::new();
        host.push_report(id, &[0x01]);

        let completions = dispatch(&mut host, &mut outstanding);
        host.fail_submit(rusb::Error::NoDevice);
        let outcome = handle_completion(
            &mut host,
            &mut outstanding,
            &mut log,
            &EventSink::disabled(),
            completions[0],
        );

        assert!(matches!(
            outcome,
            CompletionOutcome::Retired(ListenerError::Resubmission { .. })
        ));
        assert_eq!(log.len(), 1);
        assert!(outstanding.is_empty());
        assert_eq!(host.live_transfers(), 0);
        assert_eq!(host.open_handles(), 0);
        assert_eq!(host.claimed_interfaces(), 0);
    }

    #[test]
    fn test_cancel_acknowledgement_is_tolerated() {
        let (mut host, mut outstanding, id) = attached();
        let mut log = ReportLog::new();
        host.cancel(id).unwrap();
        outstanding
            .get_mut(id)
            .unwrap()
            .set_state(RecordState::Cancelling);

        let completions = dispatch(&mut host, &mut outstanding);
        assert_eq!(completions[0].status, TransferStatus::Cancelled);
        let outcome = handle_completion(
            &mut host,
            &mut outstanding,
            &mut log,
            &EventSink::disabled(),
            completions[0],
        );

        assert_eq!(outcome, CompletionOutcome::CancelAcknowledged);
        assert!(log.is_empty());
        assert_eq!(host.armed_transfers(), 0);
    }
}
