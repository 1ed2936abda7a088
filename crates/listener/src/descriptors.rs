//! Owned descriptor snapshots and the shared descriptor walker
//!
//! Descriptor memory handed out by libusb is only valid until the device list
//! or configuration descriptor is freed, so everything the listener inspects is
//! copied into these plain values first. Both discovery and attachment walk
//! configuration → interface → alternate setting → endpoint through
//! [`matching_endpoints`].

use rusb::{Direction, TransferType};
use std::fmt;

/// Device class code meaning "class is defined per interface"
pub const CLASS_PER_INTERFACE: u8 = 0x00;
/// HID interface class code
pub const CLASS_HID: u8 = 0x03;
/// HID boot interface subclass
pub const SUBCLASS_BOOT: u8 = 0x01;
/// HID boot protocol code for a mouse
pub const PROTOCOL_MOUSE: u8 = 0x02;

/// A single interrupt-IN endpoint on a HID boot-protocol mouse interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub vendor_id: u16,
    pub product_id: u16,
    pub endpoint_address: u8,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ep {:#04x}",
            self.vendor_id, self.product_id, self.endpoint_address
        )
    }
}

/// Device descriptor fields needed for discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub number: u8,
    pub interfaces: Vec<InterfaceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub number: u8,
    pub settings: Vec<AltSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltSetting {
    pub setting_number: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    pub endpoints: Vec<EndpointSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub address: u8,
    pub transfer_type: TransferType,
    pub direction: Direction,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// One endpoint accepted by a [`matching_endpoints`] predicate
#[derive(Debug, Clone, Copy)]
pub struct EndpointMatch<'a> {
    /// `bInterfaceNumber` of the owning interface
    pub interface: u8,
    pub setting: &'a AltSetting,
    pub endpoint: &'a EndpointSnapshot,
}

/// Walk every endpoint of every alternate setting of every interface, in
/// descriptor order, yielding the ones `predicate` accepts.
pub fn matching_endpoints<'a, P>(
    config: &'a ConfigSnapshot,
    predicate: P,
) -> impl Iterator<Item = EndpointMatch<'a>> + 'a
where
    P: Fn(&AltSetting, &EndpointSnapshot) -> bool + 'a,
{
    config
        .interfaces
        .iter()
        .flat_map(|iface| iface.settings.iter().map(move |s| (iface.number, s)))
        .flat_map(|(interface, setting)| {
            setting.endpoints.iter().map(move |endpoint| EndpointMatch {
                interface,
                setting,
                endpoint,
            })
        })
        .filter(move |m| predicate(m.setting, m.endpoint))
}

/// Interface number owning `endpoint_address`, first match in descriptor order
pub fn interface_for_endpoint(config: &ConfigSnapshot, endpoint_address: u8) -> Option<u8> {
    matching_endpoints(config, move |_, ep| ep.address == endpoint_address)
        .next()
        .map(|m| m.interface)
}

/// HID class, boot subclass, mouse protocol
pub fn is_boot_mouse(setting: &AltSetting) -> bool {
    setting.class_code == CLASS_HID
        && setting.sub_class_code == SUBCLASS_BOOT
        && setting.protocol_code == PROTOCOL_MOUSE
}

pub fn is_interrupt_in(endpoint: &EndpointSnapshot) -> bool {
    endpoint.transfer_type == TransferType::Interrupt && endpoint.direction == Direction::In
}
