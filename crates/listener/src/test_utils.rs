//! Test utilities for the listener
//!
//! [`MockHost`] implements [`UsbHost`] over a simulated descriptor tree. It
//! records every primitive call, can be told to fail any of them, and keeps
//! enough bookkeeping to assert that nothing leaks and that nothing is freed
//! or closed out of order.
//!
//! # Example
//!
//! ```
//! use listener::test_utils::{MockHost, mouse_device};
//! use listener::DeviceEnumerator;
//!
//! let mut host = MockHost::new(vec![mouse_device(0x046d, 0xc077, &[0x81])]);
//! let candidates = DeviceEnumerator::discover(&mut host);
//! assert_eq!(candidates.len(), 1);
//! ```

use crate::descriptors::{
    AltSetting, CLASS_HID, CLASS_PER_INTERFACE, Candidate, ConfigSnapshot, DeviceSummary,
    EndpointSnapshot, InterfaceSnapshot, PROTOCOL_MOUSE, SUBCLASS_BOOT,
};
use crate::report::ReportHandler;
use crate::usb::{Completion, HandleId, TransferBuffers, TransferId, TransferStatus, UsbHost};
use rusb::{Direction, TransferType};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A primitive invoked on the mock, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    DeviceList,
    FreeDeviceList,
    ConfigDescriptor(u16, u16),
    Open(u16, u16),
    SetAutoDetach(HandleId, bool),
    ActiveConfig(HandleId),
    Claim(HandleId, u8),
    Release(HandleId, u8),
    Close(HandleId),
    Alloc(HandleId, u8),
    Submit(TransferId),
    Cancel(TransferId),
    Free(TransferId),
    HandleEvents,
}

/// What one `handle_events` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStep {
    /// Complete an armed transfer; `data` is copied into its buffer on success
    Complete {
        transfer: TransferId,
        status: TransferStatus,
        data: Vec<u8>,
    },
    /// Nothing happens within the timeout
    Idle,
    /// Dispatch itself fails
    Fail(rusb::Error),
}

/// A simulated device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub class_code: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Configuration index 0, as seen by enumeration
    pub config: ConfigSnapshot,
    /// Active configuration, as seen after opening; defaults to `config`
    pub active_config: Option<ConfigSnapshot>,
}

impl MockDevice {
    pub fn new(vendor_id: u16, product_id: u16, interfaces: Vec<InterfaceSnapshot>) -> Self {
        Self {
            class_code: CLASS_PER_INTERFACE,
            vendor_id,
            product_id,
            config: ConfigSnapshot {
                number: 1,
                interfaces,
            },
            active_config: None,
        }
    }

    pub fn with_class(mut self, class_code: u8) -> Self {
        self.class_code = class_code;
        self
    }

    /// Make the active configuration differ from configuration 0
    pub fn with_active_config(mut self, interfaces: Vec<InterfaceSnapshot>) -> Self {
        self.active_config = Some(ConfigSnapshot {
            number: 2,
            interfaces,
        });
        self
    }
}

/// Endpoint descriptor; direction follows bit 7 of the address
pub fn endpoint(address: u8, transfer_type: TransferType) -> EndpointSnapshot {
    EndpointSnapshot {
        address,
        transfer_type,
        direction: if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        },
        max_packet_size: 8,
        interval: 10,
    }
}

/// Single-setting HID interface
pub fn hid_interface(
    number: u8,
    sub_class: u8,
    protocol: u8,
    endpoints: Vec<EndpointSnapshot>,
) -> InterfaceSnapshot {
    InterfaceSnapshot {
        number,
        settings: vec![AltSetting {
            setting_number: 0,
            class_code: CLASS_HID,
            sub_class_code: sub_class,
            protocol_code: protocol,
            endpoints,
        }],
    }
}

/// Boot mouse with one interrupt endpoint per address on interface 0
pub fn mouse_device(vendor_id: u16, product_id: u16, endpoints: &[u8]) -> MockDevice {
    let endpoints = endpoints
        .iter()
        .map(|&address| endpoint(address, TransferType::Interrupt))
        .collect();
    MockDevice::new(
        vendor_id,
        product_id,
        vec![hid_interface(0, SUBCLASS_BOOT, PROTOCOL_MOUSE, endpoints)],
    )
}

/// Boot keyboard with an interrupt-IN endpoint at 0x81
pub fn keyboard_device(vendor_id: u16, product_id: u16) -> MockDevice {
    MockDevice::new(
        vendor_id,
        product_id,
        vec![hid_interface(
            0,
            SUBCLASS_BOOT,
            1,
            vec![endpoint(0x81, TransferType::Interrupt)],
        )],
    )
}

pub fn candidate(vendor_id: u16, product_id: u16, endpoint_address: u8) -> Candidate {
    Candidate {
        vendor_id,
        product_id,
        endpoint_address,
    }
}

#[derive(Debug, Default)]
struct Failures {
    device_list: Option<rusb::Error>,
    config_descriptor: Option<rusb::Error>,
    open: Option<rusb::Error>,
    auto_detach: Option<rusb::Error>,
    active_config: Option<rusb::Error>,
    claim: Option<rusb::Error>,
    alloc: Option<rusb::Error>,
    submit: Option<rusb::Error>,
}

#[derive(Debug)]
struct MockTransfer {
    handle: HandleId,
    armed: bool,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    handles: BTreeMap<HandleId, (u16, u16)>,
    claimed: BTreeSet<(HandleId, u8)>,
    transfers: BTreeMap<TransferId, MockTransfer>,
    pending_cancels: VecDeque<TransferId>,
    script: VecDeque<DispatchStep>,
    withhold_cancellations: bool,
    failures: Failures,
    calls: Vec<HostCall>,
    list_outstanding: bool,
    freed_while_armed: usize,
    closed_with_live_transfers: usize,
    next_handle_id: u32,
    next_transfer_id: u32,
}

/// Simulated USB host; clones share state
#[derive(Debug, Clone)]
pub struct MockHost {
    state: Rc<RefCell<MockState>>,
}

impl MockHost {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                devices,
                next_handle_id: 1,
                next_transfer_id: 1,
                ..Default::default()
            })),
        }
    }

    /// Unplug a device after enumeration
    pub fn remove_device(&self, vendor_id: u16, product_id: u16) {
        self.state
            .borrow_mut()
            .devices
            .retain(|d| (d.vendor_id, d.product_id) != (vendor_id, product_id));
    }

    pub fn fail_device_list(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.device_list = Some(err);
    }

    pub fn fail_config_descriptor(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.config_descriptor = Some(err);
    }

    pub fn fail_open(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.open = Some(err);
    }

    pub fn fail_auto_detach(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.auto_detach = Some(err);
    }

    pub fn fail_active_config(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.active_config = Some(err);
    }

    pub fn fail_claim(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.claim = Some(err);
    }

    pub fn fail_alloc(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.alloc = Some(err);
    }

    /// Every later submission (including resubmissions) fails
    pub fn fail_submit(&self, err: rusb::Error) {
        self.state.borrow_mut().failures.submit = Some(err);
    }

    pub fn push_step(&self, step: DispatchStep) {
        self.state.borrow_mut().script.push_back(step);
    }

    /// Complete `transfer` successfully with `data`
    pub fn push_report(&self, transfer: TransferId, data: &[u8]) {
        self.push_step(DispatchStep::Complete {
            transfer,
            status: TransferStatus::Completed,
            data: data.to_vec(),
        });
    }

    /// Complete `transfer` with a failure status
    pub fn push_status(&self, transfer: TransferId, status: TransferStatus) {
        self.push_step(DispatchStep::Complete {
            transfer,
            status,
            data: Vec::new(),
        });
    }

    pub fn push_dispatch_error(&self, err: rusb::Error) {
        self.push_step(DispatchStep::Fail(err));
    }

    /// Fail dispatch once the script is exhausted and nothing else happened
    /// Cancelled transfers are never acknowledged by dispatch
    pub fn withhold_cancellations(&self) {
        self.state.borrow_mut().withhold_cancellations = true;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state.borrow().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn open_handles(&self) -> usize {
        self.state.borrow().handles.len()
    }

    pub fn claimed_interfaces(&self) -> usize {
        self.state.borrow().claimed.len()
    }

    /// Allocated, not yet freed
    pub fn live_transfers(&self) -> usize {
        self.state.borrow().transfers.len()
    }

    pub fn armed_transfers(&self) -> usize {
        self.state.borrow().transfers.values().filter(|t| t.armed).count()
    }

    /// Transfers freed while still submitted
    pub fn freed_while_armed(&self) -> usize {
        self.state.borrow().freed_while_armed
    }

    /// Handles closed while a transfer still referenced them
    pub fn closed_with_live_transfers(&self) -> usize {
        self.state.borrow().closed_with_live_transfers
    }

    /// Whether a device list was taken and not freed
    pub fn device_list_outstanding(&self) -> bool {
        self.state.borrow().list_outstanding
    }

    /// Transfer ids in allocation order
    pub fn transfer_ids(&self) -> Vec<TransferId> {
        self.state.borrow().transfers.keys().copied().collect()
    }
}

impl UsbHost for MockHost {
    fn device_list(&mut self) -> rusb::Result<Vec<DeviceSummary>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::DeviceList);
        if let Some(err) = state.failures.device_list {
            return Err(err);
        }

        state.list_outstanding = true;
        Ok(state
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceSummary {
                bus_number: 1,
                address: (i + 1) as u8,
                vendor_id: d.vendor_id,
                product_id: d.product_id,
                class_code: d.class_code,
            })
            .collect())
    }

    fn free_device_list(&mut self) {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::FreeDeviceList);
        state.list_outstanding = false;
    }

    fn config_descriptor(
        &mut self,
        device: &DeviceSummary,
        index: u8,
    ) -> rusb::Result<ConfigSnapshot> {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(HostCall::ConfigDescriptor(device.vendor_id, device.product_id));
        if let Some(err) = state.failures.config_descriptor {
            return Err(err);
        }
        if index != 0 {
            return Err(rusb::Error::NotFound);
        }

        state
            .devices
            .get(device.address as usize - 1)
            .map(|d| d.config.clone())
            .ok_or(rusb::Error::NoDevice)
    }

    fn open(&mut self, vendor_id: u16, product_id: u16) -> rusb::Result<HandleId> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Open(vendor_id, product_id));
        if let Some(err) = state.failures.open {
            return Err(err);
        }
        if !state
            .devices
            .iter()
            .any(|d| (d.vendor_id, d.product_id) == (vendor_id, product_id))
        {
            return Err(rusb::Error::NotFound);
        }

        let id = HandleId(state.next_handle_id);
        state.next_handle_id += 1;
        state.handles.insert(id, (vendor_id, product_id));
        Ok(id)
    }

    fn set_auto_detach_kernel_driver(
        &mut self,
        handle: HandleId,
        enable: bool,
    ) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::SetAutoDetach(handle, enable));
        match state.failures.auto_detach {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn active_config_descriptor(&mut self, handle: HandleId) -> rusb::Result<ConfigSnapshot> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::ActiveConfig(handle));
        if let Some(err) = state.failures.active_config {
            return Err(err);
        }

        let identity = *state.handles.get(&handle).ok_or(rusb::Error::NoDevice)?;
        state
            .devices
            .iter()
            .find(|d| (d.vendor_id, d.product_id) == identity)
            .map(|d| d.active_config.clone().unwrap_or_else(|| d.config.clone()))
            .ok_or(rusb::Error::NoDevice)
    }

    fn claim_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Claim(handle, interface));
        if let Some(err) = state.failures.claim {
            return Err(err);
        }

        let identity = *state.handles.get(&handle).ok_or(rusb::Error::NoDevice)?;
        let busy = state
            .claimed
            .iter()
            .any(|(h, i)| *i == interface && state.handles.get(h) == Some(&identity));
        if busy {
            return Err(rusb::Error::Busy);
        }

        state.claimed.insert((handle, interface));
        Ok(())
    }

    fn release_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Release(handle, interface));
        if state.claimed.remove(&(handle, interface)) {
            Ok(())
        } else {
            Err(rusb::Error::NotFound)
        }
    }

    fn close(&mut self, handle: HandleId) {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Close(handle));
        if state.transfers.values().any(|t| t.handle == handle) {
            state.closed_with_live_transfers += 1;
        }
        state.handles.remove(&handle);
        state.claimed.retain(|(h, _)| *h != handle);
    }

    fn alloc_transfer(&mut self, handle: HandleId, endpoint: u8) -> rusb::Result<TransferId> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Alloc(handle, endpoint));
        if let Some(err) = state.failures.alloc {
            return Err(err);
        }
        if !state.handles.contains_key(&handle) {
            return Err(rusb::Error::NoDevice);
        }

        let id = TransferId(state.next_transfer_id);
        state.next_transfer_id += 1;
        state.transfers.insert(
            id,
            MockTransfer {
                handle,
                armed: false,
            },
        );
        Ok(id)
    }

    fn submit(&mut self, transfer: TransferId) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Submit(transfer));
        if let Some(err) = state.failures.submit {
            return Err(err);
        }

        let MockState {
            transfers, handles, ..
        } = &mut *state;
        let t = transfers.get_mut(&transfer).ok_or(rusb::Error::NotFound)?;
        if !handles.contains_key(&t.handle) {
            return Err(rusb::Error::NoDevice);
        }
        if t.armed {
            return Err(rusb::Error::Busy);
        }
        t.armed = true;
        Ok(())
    }

    fn cancel(&mut self, transfer: TransferId) -> rusb::Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Cancel(transfer));
        let t = state
            .transfers
            .get_mut(&transfer)
            .ok_or(rusb::Error::NotFound)?;
        if !t.armed {
            return Err(rusb::Error::NotFound);
        }
        t.armed = false;
        state.pending_cancels.push_back(transfer);
        Ok(())
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::Free(transfer));
        let acknowledged = !state.pending_cancels.contains(&transfer);
        let removed = state.transfers.remove(&transfer);
        if let Some(t) = removed
            && (t.armed || !acknowledged)
        {
            state.freed_while_armed += 1;
        }
        state.pending_cancels.retain(|t| *t != transfer);
    }

    fn handle_events(
        &mut self,
        _timeout: Duration,
        buffers: &mut dyn TransferBuffers,
    ) -> rusb::Result<Vec<Completion>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HostCall::HandleEvents);

        let step = state.script.pop_front();
        if let Some(DispatchStep::Fail(err)) = step {
            return Err(err);
        }

        let acknowledged: Vec<TransferId> = if state.withhold_cancellations {
            Vec::new()
        } else {
            state.pending_cancels.drain(..).collect()
        };
        let mut completions: Vec<Completion> = acknowledged
            .into_iter()
            .map(|transfer| Completion {
                transfer,
                status: TransferStatus::Cancelled,
                actual_length: 0,
            })
            .collect();

        match step {
            Some(DispatchStep::Complete {
                transfer,
                status,
                data,
            }) => {
                if let Some(t) = state.transfers.get_mut(&transfer)
                    && t.armed
                {
                    t.armed = false;
                    let mut actual_length = 0;
                    if status == TransferStatus::Completed
                        && let Some(buffer) = buffers.buffer_mut(transfer)
                    {
                        actual_length = data.len().min(buffer.len());
                        buffer[..actual_length].copy_from_slice(&data[..actual_length]);
                    }
                    completions.push(Completion {
                        transfer,
                        status,
                        actual_length,
                    });
                }
            }
            Some(DispatchStep::Idle) | None => {}
            Some(DispatchStep::Fail(_)) => unreachable!(),
        }

        Ok(completions)
    }
}

/// Shared log of every report a handler received
#[derive(Debug, Clone, Default)]
pub struct ReportLog {
    reports: Arc<Mutex<Vec<(Candidate, Vec<u8>)>>>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Vec<u8>> {
        self.entries().into_iter().map(|(_, r)| r).collect()
    }

    pub fn entries(&self) -> Vec<(Candidate, Vec<u8>)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportHandler for ReportLog {
    fn on_report(&mut self, candidate: &Candidate, report: &[u8]) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((*candidate, report.to_vec()));
        }
    }
}
