//! Device discovery
//!
//! Walks the device tree once and collects every interrupt-IN endpoint that
//! sits on a HID boot-protocol mouse interface. The result is materialized
//! eagerly; the device list is freed before returning.

use crate::descriptors::{
    CLASS_PER_INTERFACE, Candidate, is_boot_mouse, is_interrupt_in, matching_endpoints,
};
use crate::error::{ListenerError, Result};
use crate::usb::UsbHost;
use tracing::{debug, trace, warn};

pub struct DeviceEnumerator;

impl DeviceEnumerator {
    /// Candidates in device-list order; an unavailable device list yields none
    pub fn discover<H: UsbHost + ?Sized>(host: &mut H) -> Vec<Candidate> {
        match Self::try_discover(host) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    /// Like [`discover`](Self::discover) but reports a failed device listing
    pub fn try_discover<H: UsbHost + ?Sized>(host: &mut H) -> Result<Vec<Candidate>> {
        let devices = host.device_list().map_err(ListenerError::Enumeration)?;
        let mut candidates = Vec::new();

        for device in &devices {
            if device.class_code != CLASS_PER_INTERFACE {
                trace!(
                    "Skipping {:04x}:{:04x}: device class {:#04x}",
                    device.vendor_id, device.product_id, device.class_code
                );
                continue;
            }

            let config = match host.config_descriptor(device, 0) {
                Ok(config) => config,
                Err(e) => {
                    debug!(
                        "Skipping {:04x}:{:04x}: no configuration 0 ({})",
                        device.vendor_id, device.product_id, e
                    );
                    continue;
                }
            };

            for m in matching_endpoints(&config, |s, e| is_boot_mouse(s) && is_interrupt_in(e)) {
                let candidate = Candidate {
                    vendor_id: device.vendor_id,
                    product_id: device.product_id,
                    endpoint_address: m.endpoint.address,
                };
                debug!(
                    "Found mouse endpoint {} (interface {}, setting {})",
                    candidate, m.interface, m.setting.setting_number
                );
                candidates.push(candidate);
            }
        }

        host.free_device_list();
        debug!(
            "Enumerated {} devices, {} mouse candidates",
            devices.len(),
            candidates.len()
        );
        Ok(candidates)
    }
}
