//! Protocol library for onlykey-settime
//!
//! This crate holds the transport-independent core: the descriptor type the
//! USB layer hands over, the fixed allow-list of OnlyKey vendor/product IDs,
//! the device matching rule and the 9-byte set-time command frame.
//!
//! Nothing in here performs I/O, so every function is safe to call from any
//! thread.
//!
//! # Example
//!
//! ```
//! use protocol::{UsbDeviceDescriptor, is_target_device, TimeCommandFrame};
//!
//! let device = UsbDeviceDescriptor {
//!     vendor_id: 5824,
//!     product_id: 1158,
//!     serial_number: Some("1000000000".to_string()),
//!     interface_count: 2,
//!     bus_number: 1,
//!     device_address: 4,
//!     access_denied: false,
//! };
//! assert!(is_target_device(&device));
//!
//! let frame = TimeCommandFrame::from_unix_seconds(1);
//! assert_eq!(frame.as_bytes(), &[0xFF, 0xFF, 0xFF, 0xFF, 0xE4, 0, 0, 0, 1]);
//! ```

pub mod error;
pub mod frame;
pub mod matcher;
pub mod types;

pub use error::{ProtocolError, Result};
pub use frame::{
    FRAME_LEN, MESSAGE_HEADER, OKSETTIME, TimeCommandFrame, build_time_frame, unix_seconds,
};
pub use matcher::{
    TARGET_SERIAL, find_inaccessible_candidate, find_target_device, is_inaccessible_candidate,
    is_target_device,
};
pub use types::{
    KNOWN_DEVICE_IDS, KnownDeviceId, PermissionOutcome, UsbDeviceDescriptor, VENDOR_INTERFACE,
};
