//! Common utilities for onlykey-settime
//!
//! Shared plumbing between the workflow and the USB worker thread: error
//! types, logging setup and the async channel bridge that lets the Tokio
//! runtime drive the blocking libusb thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result, TransportError};
pub use logging::setup_logging;
