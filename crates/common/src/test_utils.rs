//! Test utilities for onlykey-settime
//!
//! Descriptor fixtures and an async timeout helper shared by the test suites
//! of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_onlykey_descriptor;
//!
//! let device = create_onlykey_descriptor(3);
//! assert_eq!(device.vendor_id, 5824);
//! assert_eq!(device.device_address, 3);
//! ```

use protocol::{TARGET_SERIAL, UsbDeviceDescriptor};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a descriptor with arbitrary attributes on bus 1
pub fn create_mock_descriptor(
    address: u8,
    vendor_id: u16,
    product_id: u16,
    serial_number: Option<&str>,
    interface_count: u32,
) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        vendor_id,
        product_id,
        serial_number: serial_number.map(str::to_string),
        interface_count,
        bus_number: 1,
        device_address: address,
        access_denied: false,
    }
}

/// Create a descriptor an OnlyKey reports (original IDs, firmware serial)
pub fn create_onlykey_descriptor(address: u8) -> UsbDeviceDescriptor {
    create_mock_descriptor(address, 5824, 1158, Some(TARGET_SERIAL), 1)
}

/// Create a Teensy sharing the OnlyKey IDs but failing the secondary check
pub fn create_lookalike_descriptor(address: u8) -> UsbDeviceDescriptor {
    create_mock_descriptor(address, 5824, 1158, Some("0000000000"), 2)
}

/// Create a multi-interface OnlyKey the host refused to open
///
/// The serial stays unread, so it fails the matching rule.
pub fn create_unopenable_onlykey_descriptor(address: u8) -> UsbDeviceDescriptor {
    UsbDeviceDescriptor {
        access_denied: true,
        ..create_mock_descriptor(address, 5824, 1158, None, 3)
    }
}

/// Create a device outside the allow-list (a USB keyboard)
pub fn create_unrelated_descriptor(address: u8) -> UsbDeviceDescriptor {
    create_mock_descriptor(address, 0x046d, 0xc31c, None, 2)
}

/// Run a future with a timeout
///
/// # Example
/// ```no_run
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
