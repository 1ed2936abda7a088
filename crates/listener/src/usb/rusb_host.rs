//! `rusb`-backed USB host
//!
//! rusb exposes libusb's synchronous transfer API only, so an "asynchronous"
//! transfer here is a pending interrupt read. Every dispatch round services the
//! armed transfers with `read_interrupt`, splitting the dispatch timeout
//! between them. A read that times out stays armed, which gives the same
//! behaviour as a libusb transfer submitted with no timeout.

use crate::descriptors::{
    AltSetting, ConfigSnapshot, DeviceSummary, EndpointSnapshot, InterfaceSnapshot,
};
use crate::usb::host::{
    Completion, HandleId, TransferBuffers, TransferId, TransferStatus, UsbHost,
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Shortest read slice handed to libusb; 0 would mean "wait forever"
const MIN_READ_SLICE: Duration = Duration::from_millis(1);

struct PendingTransfer {
    handle: HandleId,
    endpoint: u8,
    submitted: bool,
}

/// USB host over a libusb context
pub struct RusbHost {
    context: Context,
    /// Devices retained from the last `device_list` call, keyed by (bus, address)
    listed: HashMap<(u8, u8), Device<Context>>,
    handles: HashMap<HandleId, DeviceHandle<Context>>,
    transfers: BTreeMap<TransferId, PendingTransfer>,
    cancelled: VecDeque<TransferId>,
    next_handle_id: u32,
    next_transfer_id: u32,
}

impl RusbHost {
    /// Create a new libusb context
    pub fn new() -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            listed: HashMap::new(),
            handles: HashMap::new(),
            transfers: BTreeMap::new(),
            cancelled: VecDeque::new(),
            next_handle_id: 1,
            next_transfer_id: 1,
        })
    }

    fn handle(&self, handle: HandleId) -> rusb::Result<&DeviceHandle<Context>> {
        self.handles.get(&handle).ok_or(rusb::Error::NoDevice)
    }
}

impl UsbHost for RusbHost {
    fn device_list(&mut self) -> rusb::Result<Vec<DeviceSummary>> {
        self.listed.clear();
        let devices = self.context.devices()?;
        let mut summaries = Vec::with_capacity(devices.len());

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    debug!(
                        "Skipping device bus={} addr={}: no descriptor ({})",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            summaries.push(DeviceSummary {
                bus_number: device.bus_number(),
                address: device.address(),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                class_code: desc.class_code(),
            });
            self.listed
                .insert((device.bus_number(), device.address()), device);
        }

        Ok(summaries)
    }

    fn free_device_list(&mut self) {
        self.listed.clear();
    }

    fn config_descriptor(
        &mut self,
        device: &DeviceSummary,
        index: u8,
    ) -> rusb::Result<ConfigSnapshot> {
        let device = self
            .listed
            .get(&(device.bus_number, device.address))
            .ok_or(rusb::Error::NotFound)?;
        let config = device.config_descriptor(index)?;
        Ok(snapshot_config(&config))
    }

    fn open(&mut self, vendor_id: u16, product_id: u16) -> rusb::Result<HandleId> {
        let handle = self
            .context
            .open_device_with_vid_pid(vendor_id, product_id)
            .ok_or(rusb::Error::NotFound)?;

        let id = HandleId(self.next_handle_id);
        self.next_handle_id += 1;
        self.handles.insert(id, handle);

        debug!(
            "Opened {:04x}:{:04x} as {:?}",
            vendor_id, product_id, id
        );
        Ok(id)
    }

    fn set_auto_detach_kernel_driver(
        &mut self,
        handle: HandleId,
        enable: bool,
    ) -> rusb::Result<()> {
        let device_handle = self.handles.get_mut(&handle).ok_or(rusb::Error::NoDevice)?;
        device_handle.set_auto_detach_kernel_driver(enable)
    }

    fn active_config_descriptor(&mut self, handle: HandleId) -> rusb::Result<ConfigSnapshot> {
        let config = self.handle(handle)?.device().active_config_descriptor()?;
        Ok(snapshot_config(&config))
    }

    fn claim_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()> {
        let device_handle = self.handles.get_mut(&handle).ok_or(rusb::Error::NoDevice)?;
        device_handle.claim_interface(interface)
    }

    fn release_interface(&mut self, handle: HandleId, interface: u8) -> rusb::Result<()> {
        let device_handle = self.handles.get_mut(&handle).ok_or(rusb::Error::NoDevice)?;
        device_handle.release_interface(interface)
    }

    fn close(&mut self, handle: HandleId) {
        if self.handles.remove(&handle).is_some() {
            debug!("Closed {:?}", handle);
        }
    }

    fn alloc_transfer(&mut self, handle: HandleId, endpoint: u8) -> rusb::Result<TransferId> {
        self.handle(handle)?;

        let id = TransferId(self.next_transfer_id);
        self.next_transfer_id += 1;
        self.transfers.insert(
            id,
            PendingTransfer {
                handle,
                endpoint,
                submitted: false,
            },
        );
        Ok(id)
    }

    fn submit(&mut self, transfer: TransferId) -> rusb::Result<()> {
        let pending = self
            .transfers
            .get_mut(&transfer)
            .ok_or(rusb::Error::NotFound)?;

        if !self.handles.contains_key(&pending.handle) {
            return Err(rusb::Error::NoDevice);
        }
        if pending.submitted {
            return Err(rusb::Error::Busy);
        }

        pending.submitted = true;
        trace!("Submitted {:?} on endpoint {:#04x}", transfer, pending.endpoint);
        Ok(())
    }

    fn cancel(&mut self, transfer: TransferId) -> rusb::Result<()> {
        let pending = self
            .transfers
            .get_mut(&transfer)
            .ok_or(rusb::Error::NotFound)?;

        // libusb reports NOT_FOUND for transfers that are not in flight
        if !pending.submitted {
            return Err(rusb::Error::NotFound);
        }

        pending.submitted = false;
        self.cancelled.push_back(transfer);
        Ok(())
    }

    fn free_transfer(&mut self, transfer: TransferId) {
        self.transfers.remove(&transfer);
        self.cancelled.retain(|t| *t != transfer);
    }

    fn handle_events(
        &mut self,
        timeout: Duration,
        buffers: &mut dyn TransferBuffers,
    ) -> rusb::Result<Vec<Completion>> {
        let mut completions: Vec<Completion> = self
            .cancelled
            .drain(..)
            .map(|transfer| Completion {
                transfer,
                status: TransferStatus::Cancelled,
                actual_length: 0,
            })
            .collect();

        let armed: Vec<TransferId> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.submitted)
            .map(|(id, _)| *id)
            .collect();

        if armed.is_empty() {
            self.context.handle_events(Some(timeout))?;
            return Ok(completions);
        }

        self.context.handle_events(Some(Duration::ZERO))?;

        let slice = (timeout / armed.len() as u32).max(MIN_READ_SLICE);

        for id in armed {
            let Some(pending) = self.transfers.get_mut(&id) else {
                continue;
            };

            let Some(device_handle) = self.handles.get(&pending.handle) else {
                pending.submitted = false;
                completions.push(Completion {
                    transfer: id,
                    status: TransferStatus::NoDevice,
                    actual_length: 0,
                });
                continue;
            };

            let Some(buffer) = buffers.buffer_mut(id) else {
                warn!("No buffer registered for {:?}, leaving it armed", id);
                continue;
            };

            match device_handle.read_interrupt(pending.endpoint, buffer, slice) {
                Ok(len) => {
                    pending.submitted = false;
                    completions.push(Completion {
                        transfer: id,
                        status: TransferStatus::Completed,
                        actual_length: len,
                    });
                }
                Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {
                    // Still armed
                }
                Err(e) => {
                    debug!(
                        "Interrupt read on endpoint {:#04x} failed: {}",
                        pending.endpoint, e
                    );
                    pending.submitted = false;
                    completions.push(Completion {
                        transfer: id,
                        status: TransferStatus::from_error(e),
                        actual_length: 0,
                    });
                }
            }
        }

        Ok(completions)
    }
}

fn snapshot_config(config: &rusb::ConfigDescriptor) -> ConfigSnapshot {
    ConfigSnapshot {
        number: config.number(),
        interfaces: config
            .interfaces()
            .map(|iface| InterfaceSnapshot {
                number: iface.number(),
                settings: iface
                    .descriptors()
                    .map(|desc| AltSetting {
                        setting_number: desc.setting_number(),
                        class_code: desc.class_code(),
                        sub_class_code: desc.sub_class_code(),
                        protocol_code: desc.protocol_code(),
                        endpoints: desc
                            .endpoint_descriptors()
                            .map(|ep| EndpointSnapshot {
                                address: ep.address(),
                                transfer_type: ep.transfer_type(),
                                direction: ep.direction(),
                                max_packet_size: ep.max_packet_size(),
                                interval: ep.interval(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}
