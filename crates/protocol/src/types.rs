//! USB type definitions
//!
//! Plain data handed between the USB layer and the core. Descriptors are
//! snapshots: the core reads them and never mutates them.

use serde::{Deserialize, Serialize};

/// Interface carrying the OnlyKey vendor endpoints
pub const VENDOR_INTERFACE: u8 = 1;

/// Vendor/product ID pair of a recognised device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnownDeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Every vendor/product pair an OnlyKey enumerates with
///
/// 5824:1158 (0x16c0:0x0486) is the original Teensy-based key,
/// 7504:24828 (0x1d50:0x60fc) the newer one.
pub const KNOWN_DEVICE_IDS: &[KnownDeviceId] = &[
    KnownDeviceId {
        vendor_id: 5824,
        product_id: 1158,
    },
    KnownDeviceId {
        vendor_id: 7504,
        product_id: 24828,
    },
];

impl KnownDeviceId {
    /// Check whether a VID/PID pair is in the allow-list
    pub fn contains(vendor_id: u16, product_id: u16) -> bool {
        KNOWN_DEVICE_IDS
            .iter()
            .any(|id| id.vendor_id == vendor_id && id.product_id == product_id)
    }
}

/// Snapshot of a discovered USB device
///
/// Built by the USB layer on every enumeration pass or hot-plug arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number string (absent if unreadable or not reported)
    pub serial_number: Option<String>,
    /// Number of interfaces in the active configuration
    pub interface_count: u32,
    /// Bus number on the host
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// The host refused to open the device while its strings were read
    #[serde(default)]
    pub access_denied: bool,
}

impl UsbDeviceDescriptor {
    /// `(bus, address)` pair locating the physical device
    pub fn location(&self) -> (u8, u8) {
        (self.bus_number, self.device_address)
    }
}

/// Answer to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

impl PermissionOutcome {
    pub fn is_granted(self) -> bool {
        self == PermissionOutcome::Granted
    }
}
