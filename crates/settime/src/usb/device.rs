//! USB device access
//!
//! Reads descriptor snapshots from rusb devices and performs the scoped
//! open/claim/write/release sequence used to deliver a command frame.

use common::TransportError;
use protocol::{PermissionOutcome, TimeCommandFrame, UsbDeviceDescriptor};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType};
use std::time::Duration;
use tracing::{debug, warn};

/// Build a descriptor snapshot for a device
///
/// The serial number needs an open handle. When the device cannot be opened
/// it is reported as absent, and a refused open sets `access_denied`.
pub fn read_descriptor(device: &Device<Context>) -> Result<UsbDeviceDescriptor, rusb::Error> {
    let descriptor = device.device_descriptor()?;

    let (serial_number, access_denied) = match descriptor.serial_number_string_index() {
        Some(index) => {
            let lookup = device
                .open()
                .and_then(|handle| handle.read_string_descriptor_ascii(index));
            if let Err(e) = &lookup {
                debug!(
                    "Could not read serial of {:03}:{:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
            }
            serial_lookup(lookup)
        }
        None => (None, false),
    };

    Ok(UsbDeviceDescriptor {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        serial_number,
        interface_count: interface_count(device),
        bus_number: device.bus_number(),
        device_address: device.address(),
        access_denied,
    })
}

/// Split a serial string read into the serial and the access-denied flag
fn serial_lookup(lookup: rusb::Result<String>) -> (Option<String>, bool) {
    match lookup {
        Ok(serial) => (Some(serial), false),
        Err(rusb::Error::Access) => (None, true),
        Err(_) => (None, false),
    }
}

/// Interfaces in the active configuration, falling back to the first one
fn interface_count(device: &Device<Context>) -> u32 {
    device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))
        .map(|config| u32::from(config.num_interfaces()))
        .unwrap_or(0)
}

/// Probe whether this process may open the device
pub fn check_access(device: &Device<Context>) -> PermissionOutcome {
    match device.open() {
        Ok(_handle) => PermissionOutcome::Granted,
        Err(rusb::Error::Access) => {
            warn!(
                "Access denied to device {:03}:{:03}",
                device.bus_number(),
                device.address()
            );
            PermissionOutcome::Denied
        }
        Err(e) => {
            warn!(
                "Failed to open device {:03}:{:03}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            PermissionOutcome::Denied
        }
    }
}

/// How a frame is pushed through an OUT endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Interrupt,
    Bulk,
}

impl From<TransferType> for WriteKind {
    fn from(transfer_type: TransferType) -> Self {
        match transfer_type {
            TransferType::Interrupt => WriteKind::Interrupt,
            _ => WriteKind::Bulk,
        }
    }
}

/// Handle operations needed to claim an interface and write to it
///
/// Implemented for rusb handles; kept as a trait so the claim/release
/// sequence can run against a recording handle.
pub(crate) trait InterfaceHandle {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn write(
        &self,
        endpoint: u8,
        kind: WriteKind,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
}

impl InterfaceHandle for DeviceHandle<Context> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }

    fn write(
        &self,
        endpoint: u8,
        kind: WriteKind,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        match kind {
            WriteKind::Interrupt => self.write_interrupt(endpoint, data, timeout),
            WriteKind::Bulk => self.write_bulk(endpoint, data, timeout),
        }
    }
}

/// Write a frame to the first OUT endpoint of `interface`
///
/// No response is read. The interface is released and the handle closed on
/// every path, including a failed write.
pub fn write_frame(
    device: &Device<Context>,
    interface: u8,
    frame: &TimeCommandFrame,
    timeout: Duration,
) -> Result<(), TransportError> {
    let (endpoint, kind) = find_out_endpoint(device, interface)?;

    let handle = device.open().map_err(|e| TransportError::Open(e.to_string()))?;
    write_claimed(handle, interface, endpoint, kind, frame, timeout)
}

/// Claim `interface` on an open handle, write the frame, then let the guard
/// release everything
fn write_claimed<H: InterfaceHandle>(
    handle: H,
    interface: u8,
    endpoint: u8,
    kind: WriteKind,
    frame: &TimeCommandFrame,
    timeout: Duration,
) -> Result<(), TransportError> {
    let claimed = ClaimedInterface::claim(handle, interface)?;

    let data = frame.as_bytes();
    match claimed.handle().write(endpoint, kind, data, timeout) {
        Ok(written) if written == data.len() => {
            debug!("Wrote {} bytes to endpoint {:#04x}", written, endpoint);
            Ok(())
        }
        Ok(written) => Err(TransportError::ShortWrite {
            written,
            expected: data.len(),
        }),
        Err(e) => Err(TransportError::Write {
            endpoint,
            message: e.to_string(),
        }),
    }
}

/// Locate the first OUT endpoint of an interface
fn find_out_endpoint(
    device: &Device<Context>,
    interface: u8,
) -> Result<(u8, WriteKind), TransportError> {
    let config = device
        .active_config_descriptor()
        .map_err(|e| TransportError::Configuration(e.to_string()))?;

    let iface = config
        .interfaces()
        .find(|iface| iface.number() == interface)
        .ok_or(TransportError::NoInterface(interface))?;

    let endpoints: Vec<_> = iface
        .descriptors()
        .flat_map(|alt| {
            alt.endpoint_descriptors()
                .map(|endpoint| {
                    (
                        endpoint.address(),
                        endpoint.direction(),
                        endpoint.transfer_type(),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect();

    select_out_endpoint(endpoints, interface)
}

/// First OUT endpoint among `(address, direction, transfer type)` entries
fn select_out_endpoint<I>(endpoints: I, interface: u8) -> Result<(u8, WriteKind), TransportError>
where
    I: IntoIterator<Item = (u8, Direction, TransferType)>,
{
    endpoints
        .into_iter()
        .find(|(_, direction, _)| *direction == Direction::Out)
        .map(|(address, _, transfer_type)| (address, WriteKind::from(transfer_type)))
        .ok_or(TransportError::NoEndpoint(interface))
}

/// Interface claimed on an open handle
///
/// Dropping it releases the interface, gives the interface back to a kernel
/// driver detached by `claim`, then closes the handle.
struct ClaimedInterface<H: InterfaceHandle> {
    handle: H,
    interface: u8,
    reattach_driver: bool,
}

impl<H: InterfaceHandle> ClaimedInterface<H> {
    fn claim(mut handle: H, interface: u8) -> Result<Self, TransportError> {
        let reattach_driver = match handle.kernel_driver_active(interface) {
            Ok(true) => match handle.detach_kernel_driver(interface) {
                Ok(()) => {
                    debug!("Detached kernel driver from interface {}", interface);
                    true
                }
                Err(e) => {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                    false
                }
            },
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(interface) {
            if reattach_driver
                && let Err(attach_err) = handle.attach_kernel_driver(interface)
            {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, attach_err
                );
            }
            return Err(TransportError::Claim {
                interface,
                message: e.to_string(),
            });
        }

        debug!("Claimed interface {}", interface);
        Ok(Self {
            handle,
            interface,
            reattach_driver,
        })
    }

    fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H: InterfaceHandle> Drop for ClaimedInterface<H> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!("Failed to release interface {}: {}", self.interface, e);
        } else {
            debug!("Released interface {}", self.interface);
        }

        if self.reattach_driver
            && let Err(e) = self.handle.attach_kernel_driver(self.interface)
        {
            debug!(
                "Could not reattach kernel driver to interface {}: {}",
                self.interface, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::FRAME_LEN;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Handle that records every call made on it
    struct RecordingHandle {
        calls: Rc<RefCell<Vec<&'static str>>>,
        driver_active: bool,
        claim_result: rusb::Result<()>,
        write_result: rusb::Result<usize>,
    }

    impl RecordingHandle {
        fn new(driver_active: bool) -> (Self, Rc<RefCell<Vec<&'static str>>>) {
            let calls = Rc::new(RefCell::new(Vec::new()));
            let handle = Self {
                calls: Rc::clone(&calls),
                driver_active,
                claim_result: Ok(()),
                write_result: Ok(FRAME_LEN),
            };
            (handle, calls)
        }

        fn record(&self, call: &'static str) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl InterfaceHandle for RecordingHandle {
        fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
            Ok(self.driver_active)
        }

        fn detach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("detach");
            Ok(())
        }

        fn attach_kernel_driver(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("attach");
            Ok(())
        }

        fn claim_interface(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("claim");
            self.claim_result
        }

        fn release_interface(&mut self, _interface: u8) -> rusb::Result<()> {
            self.record("release");
            Ok(())
        }

        fn write(
            &self,
            _endpoint: u8,
            kind: WriteKind,
            _data: &[u8],
            _timeout: Duration,
        ) -> rusb::Result<usize> {
            self.record(match kind {
                WriteKind::Interrupt => "write_interrupt",
                WriteKind::Bulk => "write_bulk",
            });
            self.write_result
        }
    }

    fn frame() -> TimeCommandFrame {
        TimeCommandFrame::from_unix_seconds(1_700_000_000)
    }

    fn write(handle: RecordingHandle, kind: WriteKind) -> Result<(), TransportError> {
        write_claimed(handle, 1, 0x02, kind, &frame(), Duration::ZERO)
    }

    #[test]
    fn test_serial_lookup() {
        assert_eq!(
            serial_lookup(Ok("1000000000".to_string())),
            (Some("1000000000".to_string()), false)
        );
        assert_eq!(serial_lookup(Err(rusb::Error::Access)), (None, true));
        assert_eq!(serial_lookup(Err(rusb::Error::Pipe)), (None, false));
    }

    #[test]
    fn test_select_skips_in_endpoints() {
        let endpoints = [
            (0x81, Direction::In, TransferType::Interrupt),
            (0x02, Direction::Out, TransferType::Interrupt),
            (0x03, Direction::Out, TransferType::Bulk),
        ];
        assert_eq!(
            select_out_endpoint(endpoints, 1),
            Ok((0x02, WriteKind::Interrupt))
        );
    }

    #[test]
    fn test_select_without_out_endpoint() {
        let endpoints = [
            (0x81, Direction::In, TransferType::Interrupt),
            (0x82, Direction::In, TransferType::Bulk),
        ];
        assert_eq!(
            select_out_endpoint(endpoints, 1),
            Err(TransportError::NoEndpoint(1))
        );
        assert_eq!(
            select_out_endpoint(Vec::<(u8, Direction, TransferType)>::new(), 2),
            Err(TransportError::NoEndpoint(2))
        );
    }

    #[test]
    fn test_select_write_kind() {
        let bulk = [(0x04, Direction::Out, TransferType::Bulk)];
        assert_eq!(select_out_endpoint(bulk, 1), Ok((0x04, WriteKind::Bulk)));

        let isochronous = [(0x05, Direction::Out, TransferType::Isochronous)];
        assert_eq!(
            select_out_endpoint(isochronous, 1),
            Ok((0x05, WriteKind::Bulk))
        );
    }

    #[test]
    fn test_write_releases_and_reattaches() {
        let (handle, calls) = RecordingHandle::new(true);

        assert_eq!(write(handle, WriteKind::Interrupt), Ok(()));
        assert_eq!(
            *calls.borrow(),
            ["detach", "claim", "write_interrupt", "release", "attach"]
        );
    }

    #[test]
    fn test_failed_write_still_releases() {
        let (mut handle, calls) = RecordingHandle::new(true);
        handle.write_result = Err(rusb::Error::Pipe);

        let result = write(handle, WriteKind::Bulk);
        assert!(matches!(
            result,
            Err(TransportError::Write { endpoint: 0x02, .. })
        ));
        assert_eq!(
            *calls.borrow(),
            ["detach", "claim", "write_bulk", "release", "attach"]
        );
    }

    #[test]
    fn test_short_write_still_releases() {
        let (mut handle, calls) = RecordingHandle::new(false);
        handle.write_result = Ok(4);

        assert_eq!(
            write(handle, WriteKind::Interrupt),
            Err(TransportError::ShortWrite {
                written: 4,
                expected: FRAME_LEN
            })
        );
        assert_eq!(*calls.borrow(), ["claim", "write_interrupt", "release"]);
    }

    #[test]
    fn test_failed_claim_reattaches_driver() {
        let (mut handle, calls) = RecordingHandle::new(true);
        handle.claim_result = Err(rusb::Error::Busy);

        let result = write(handle, WriteKind::Interrupt);
        assert!(matches!(
            result,
            Err(TransportError::Claim { interface: 1, .. })
        ));
        assert_eq!(*calls.borrow(), ["detach", "claim", "attach"]);
    }
}
