//! USB subsystem
//!
//! rusb-backed device access for the set-time workflow:
//! - Device enumeration into descriptor snapshots
//! - Hot-plug detection
//! - Access checks and the scoped frame write
//!
//! All libusb calls happen on a dedicated worker thread so the Tokio
//! runtime never blocks on USB I/O.

pub mod device;
pub mod manager;
pub mod worker;

pub use manager::{DeviceManager, WorkerOptions};
pub use worker::{UsbWorkerThread, spawn_usb_worker};
