//! USB worker thread
//!
//! Dedicated thread for handling USB events and device I/O.
//! Runs libusb_handle_events() loop and communicates with Tokio runtime via channels.

use crate::usb::manager::{DeviceManager, WorkerOptions};
use common::{UsbCommand, UsbWorker};
use rusb::UsbContext;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// USB worker thread
///
/// Owns the device manager and serves commands from the Tokio runtime.
pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: UsbWorker,
}

impl UsbWorkerThread {
    /// Create a new USB worker thread
    pub fn new(worker: UsbWorker, options: WorkerOptions) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(worker.event_tx.clone(), options)?;
        manager.initialize()?;

        Ok(Self { manager, worker })
    }

    /// Run the USB worker thread event loop
    ///
    /// Each iteration serves at most one command, handles libusb events for
    /// up to 100ms, then forwards queued hot-plug notices. Exits on
    /// `Shutdown` or when the Tokio side drops the bridge.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None if self.worker.is_disconnected() => {
                    info!("USB bridge closed, stopping worker");
                    break;
                }
                None => {}
            }

            let timeout = Duration::from_millis(100);
            match self.manager.context().handle_events(Some(timeout)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }

            self.manager.process_hotplug_notices();
        }

        info!("USB worker thread stopped");
        Ok(())
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // Keep the thread alive if libusb or a descriptor read panics
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListDevices { response } => {
                let result = self.manager.enumerate();
                let _ = response.send(result);
            }

            UsbCommand::CheckAccess { device, response } => {
                debug!(
                    "Checking access to {:04x}:{:04x} at {:03}:{:03}",
                    device.vendor_id, device.product_id, device.bus_number, device.device_address
                );
                let outcome = self.manager.check_access(&device);
                let _ = response.send(outcome);
            }

            UsbCommand::WriteFrame {
                device,
                frame,
                response,
            } => {
                debug!(
                    "Writing {} byte frame to {:03}:{:03}",
                    frame.as_bytes().len(),
                    device.bus_number,
                    device.device_address
                );
                let result = self.manager.write_frame(&device, &frame);
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Already handled in main loop
                unreachable!()
            }
        }
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until a Shutdown command is received, the bridge is
/// dropped, or the libusb context cannot be created.
pub fn spawn_usb_worker(
    worker: UsbWorker,
    options: WorkerOptions,
) -> std::thread::JoinHandle<Result<(), rusb::Error>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, options)?;
            worker_thread.run()
        })
        .expect("Failed to spawn USB worker thread")
}
