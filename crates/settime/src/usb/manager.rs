//! USB device manager
//!
//! Owns the libusb context, enumerates devices, turns hot-plug callbacks
//! into descriptor events and resolves descriptors back to physical devices.
//! This module runs in the USB thread.

use crate::usb::device::{check_access, read_descriptor, write_frame};
use common::{TransportError, UsbEvent};
use protocol::{
    PermissionOutcome, TimeCommandFrame, UsbDeviceDescriptor, VENDOR_INTERFACE,
    is_inaccessible_candidate,
};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Root hubs: Linux Foundation vendor ID with the hub class
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

/// Settings for the USB worker
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Timeout for the frame write (zero waits forever)
    pub write_timeout: Duration,
    /// Register for hot-plug notifications
    pub hotplug: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::ZERO,
            hotplug: false,
        }
    }
}

/// Hot-plug notification queued by the libusb callback
enum HotplugNotice {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// USB device manager
pub struct DeviceManager {
    /// USB context for device operations
    context: Context,
    options: WorkerOptions,
    /// Hot-plug registration
    _hotplug_registration: Option<Registration<Context>>,
    hotplug_tx: mpsc::Sender<HotplugNotice>,
    hotplug_rx: mpsc::Receiver<HotplugNotice>,
    /// Event sender for hot-plug notifications
    event_sender: async_channel::Sender<UsbEvent>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        event_sender: async_channel::Sender<UsbEvent>,
        options: WorkerOptions,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = mpsc::channel();

        Ok(Self {
            context,
            options,
            _hotplug_registration: None,
            hotplug_tx,
            hotplug_rx,
            event_sender,
        })
    }

    /// Register hot-plug callbacks if requested and supported
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        if !self.options.hotplug {
            debug!("Hot-plug disabled");
            return Ok(());
        }

        if !rusb::has_hotplug() {
            warn!("libusb has no hot-plug support on this platform, attach events unavailable");
            return Ok(());
        }

        let callback = HotplugCallback {
            notices: self.hotplug_tx.clone(),
        };
        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        info!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Snapshot every connected device except root hubs
    pub fn enumerate(&self) -> Result<Vec<UsbDeviceDescriptor>, TransportError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| TransportError::Open(format!("Failed to list devices: {}", e)))?;

        let mut descriptors = Vec::new();
        for device in devices.iter() {
            if is_root_hub(&device) {
                continue;
            }

            match read_descriptor(&device) {
                Ok(descriptor) => {
                    warn_if_inaccessible(&descriptor);
                    descriptors.push(descriptor);
                }
                Err(e) => warn!(
                    "Failed to read descriptor of {:03}:{:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} devices", descriptors.len());
        Ok(descriptors)
    }

    /// Check OS-level access to a device
    pub fn check_access(&self, descriptor: &UsbDeviceDescriptor) -> PermissionOutcome {
        match self.find_device(descriptor) {
            Ok(device) => check_access(&device),
            Err(e) => {
                warn!("{}", e);
                PermissionOutcome::Denied
            }
        }
    }

    /// Write a frame to the vendor interface of a device
    pub fn write_frame(
        &self,
        descriptor: &UsbDeviceDescriptor,
        frame: &TimeCommandFrame,
    ) -> Result<(), TransportError> {
        let device = self.find_device(descriptor)?;
        write_frame(
            &device,
            VENDOR_INTERFACE,
            frame,
            self.options.write_timeout,
        )
    }

    /// Convert queued hot-plug notices into events
    ///
    /// Runs outside the libusb callback so descriptors can be read with an
    /// open handle.
    pub fn process_hotplug_notices(&self) {
        while let Ok(notice) = self.hotplug_rx.try_recv() {
            let event = match notice {
                HotplugNotice::Arrived(device) => {
                    if is_root_hub(&device) {
                        continue;
                    }
                    match read_descriptor(&device) {
                        Ok(descriptor) => {
                            warn_if_inaccessible(&descriptor);
                            UsbEvent::DeviceArrived { device: descriptor }
                        }
                        Err(e) => {
                            warn!("Failed to read descriptor of arrived device: {}", e);
                            continue;
                        }
                    }
                }
                HotplugNotice::Left { bus, address } => UsbEvent::DeviceLeft {
                    bus_number: bus,
                    device_address: address,
                },
            };

            if let Err(e) = self.event_sender.try_send(event) {
                warn!("Dropping hot-plug event: {}", e);
            }
        }
    }

    /// Get USB context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Resolve a descriptor to the device currently at its location
    ///
    /// The VID/PID is compared too, since addresses are reused after unplug.
    fn find_device(&self, descriptor: &UsbDeviceDescriptor) -> Result<Device<Context>, TransportError> {
        let (bus, address) = descriptor.location();
        let not_found = TransportError::DeviceNotFound { bus, address };

        let devices = self.context.devices().map_err(|_| not_found.clone())?;
        devices
            .iter()
            .find(|device| {
                device.bus_number() == bus
                    && device.address() == address
                    && device
                        .device_descriptor()
                        .map(|d| {
                            d.vendor_id() == descriptor.vendor_id
                                && d.product_id() == descriptor.product_id
                        })
                        .unwrap_or(false)
            })
            .ok_or(not_found)
    }
}

/// Warn about an allow-listed device the host would not let us open
///
/// Returns whether a warning was logged.
fn warn_if_inaccessible(descriptor: &UsbDeviceDescriptor) -> bool {
    if !is_inaccessible_candidate(descriptor) {
        return false;
    }

    warn!(
        "Possible OnlyKey {:04x}:{:04x} at {:03}:{:03} could not be opened (permission denied); \
         install a udev rule granting access to it",
        descriptor.vendor_id,
        descriptor.product_id,
        descriptor.bus_number,
        descriptor.device_address
    );
    true
}

fn is_root_hub<T: UsbContext>(device: &Device<T>) -> bool {
    device
        .device_descriptor()
        .map(|desc| desc.vendor_id() == ROOT_HUB_VENDOR_ID && desc.class_code() == HUB_CLASS)
        .unwrap_or(false)
}

/// Hot-plug callback handler
///
/// libusb forbids blocking calls inside the callback, so notices are only
/// queued here and handled by the worker loop.
struct HotplugCallback {
    notices: mpsc::Sender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.notices.send(HotplugNotice::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let _ = self.notices.send(HotplugNotice::Left {
            bus: device.bus_number(),
            address: device.address(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        create_lookalike_descriptor, create_onlykey_descriptor,
        create_unopenable_onlykey_descriptor,
    };

    #[test]
    fn test_default_options() {
        let options = WorkerOptions::default();
        assert_eq!(options.write_timeout, Duration::ZERO);
        assert!(!options.hotplug);
    }

    #[test]
    fn test_warns_only_for_unopenable_candidates() {
        assert!(warn_if_inaccessible(&create_unopenable_onlykey_descriptor(1)));
        assert!(!warn_if_inaccessible(&create_onlykey_descriptor(2)));
        assert!(!warn_if_inaccessible(&create_lookalike_descriptor(3)));
    }

    #[test]
    fn test_manager_creation() {
        let (tx, _rx) = async_channel::bounded(1);

        // Context creation may fail in sandboxes without libusb access
        match DeviceManager::new(tx, WorkerOptions::default()) {
            Ok(mut manager) => {
                assert!(manager.initialize().is_ok());
                manager.process_hotplug_notices();
            }
            Err(e) => eprintln!("USB context unavailable: {}", e),
        }
    }

    #[test]
    fn test_hotplug_notice_becomes_event() {
        let (tx, rx) = async_channel::bounded(4);

        let Ok(manager) = DeviceManager::new(tx, WorkerOptions::default()) else {
            return;
        };

        manager
            .hotplug_tx
            .send(HotplugNotice::Left { bus: 2, address: 9 })
            .unwrap();
        manager.process_hotplug_notices();

        match rx.try_recv().unwrap() {
            UsbEvent::DeviceLeft {
                bus_number,
                device_address,
            } => assert_eq!((bus_number, device_address), (2, 9)),
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
