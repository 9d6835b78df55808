//! onlykey-settime
//!
//! Finds an OnlyKey on the USB bus, asks for permission to use it and writes
//! the host's Unix time to it.
//!
//! The pieces:
//! - [`workflow`]: the match → permission → write sequence
//! - [`transport`]: the host USB interface the workflow depends on, plus its
//!   libusb implementation
//! - [`usb`]: the worker thread that owns the libusb context
//! - [`config`] and [`service`]: ambient configuration and systemd glue

pub mod config;
pub mod service;
pub mod transport;
pub mod usb;
pub mod workflow;

pub use config::{PermissionPolicy, SetTimeConfig};
pub use transport::{Transport, UsbTransport};
pub use workflow::{Clock, Outcome, SetTimeWorkflow, SystemClock, Trigger};
