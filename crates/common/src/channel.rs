//! Async channel bridge between Tokio runtime and USB thread

use crate::error::TransportError;
use async_channel::{Receiver, Sender, bounded};
use protocol::{PermissionOutcome, TimeCommandFrame, UsbDeviceDescriptor};

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// Enumerate all connected USB devices
    ListDevices {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Result<Vec<UsbDeviceDescriptor>, TransportError>>,
    },

    /// Check that the process may open a device
    CheckAccess {
        /// Device to probe
        device: UsbDeviceDescriptor,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<PermissionOutcome>,
    },

    /// Open a device and write a set-time frame to its vendor interface
    WriteFrame {
        /// Target device
        device: UsbDeviceDescriptor,
        /// Frame to send
        frame: TimeCommandFrame,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Result<(), TransportError>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// USB events from the device manager
#[derive(Debug, Clone)]
pub enum UsbEvent {
    /// Device hot-plugged (connected)
    DeviceArrived {
        /// Descriptor read after arrival
        device: UsbDeviceDescriptor,
    },

    /// Device removed
    DeviceLeft {
        /// Bus number of the removed device
        bus_number: u8,
        /// Address of the removed device
        device_address: u8,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every `UsbBridge` has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.cmd_rx.is_closed()
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(32);
    let (event_tx, event_rx) = bounded(32);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Spawn a thread to simulate USB worker
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, UsbCommand::ListDevices { .. })
        });

        let (tx, _rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(UsbCommand::ListDevices { response: tx })
            .await
            .unwrap();

        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_send_fails_after_worker_dropped() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);

        let result = bridge.send_command(UsbCommand::Shutdown).await;
        assert!(matches!(result, Err(crate::Error::Channel(_))));
    }
}
