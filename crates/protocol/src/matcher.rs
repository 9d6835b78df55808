//! OnlyKey identification
//!
//! The VID/PID pairs are shared with other Teensy and OpenMoko products, so
//! an ID match alone is not enough. An OnlyKey either reports the fixed
//! serial below or, when it exposes a single interface, is accepted as is.

use crate::types::{KnownDeviceId, UsbDeviceDescriptor};

/// Serial number reported by OnlyKey firmware
pub const TARGET_SERIAL: &str = "1000000000";

/// Decide whether a descriptor is an OnlyKey
pub fn is_target_device(device: &UsbDeviceDescriptor) -> bool {
    if !KnownDeviceId::contains(device.vendor_id, device.product_id) {
        return false;
    }

    device.serial_number.as_deref() == Some(TARGET_SERIAL) || device.interface_count == 1
}

/// First OnlyKey in the order the devices are supplied
pub fn find_target_device<'a, I>(devices: I) -> Option<&'a UsbDeviceDescriptor>
where
    I: IntoIterator<Item = &'a UsbDeviceDescriptor>,
{
    devices.into_iter().find(|device| is_target_device(device))
}

/// Allow-listed device that may be an OnlyKey but could not be opened
///
/// Without access the serial number stays unread, so a multi-interface key
/// fails the matching rule. Callers report these as a permission problem
/// instead of an absent device.
pub fn is_inaccessible_candidate(device: &UsbDeviceDescriptor) -> bool {
    device.access_denied
        && KnownDeviceId::contains(device.vendor_id, device.product_id)
        && !is_target_device(device)
}

/// First inaccessible candidate in supply order
pub fn find_inaccessible_candidate<'a, I>(devices: I) -> Option<&'a UsbDeviceDescriptor>
where
    I: IntoIterator<Item = &'a UsbDeviceDescriptor>,
{
    devices
        .into_iter()
        .find(|device| is_inaccessible_candidate(device))
}
