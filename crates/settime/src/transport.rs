//! Device transport
//!
//! The workflow only sees the [`Transport`] trait. [`UsbTransport`] is the
//! libusb implementation: it forwards each call to the USB worker thread and
//! awaits the single reply on a oneshot channel.

use crate::config::PermissionPolicy;
use common::{TransportError, UsbBridge, UsbCommand};
use protocol::{PermissionOutcome, TimeCommandFrame, UsbDeviceDescriptor};
use std::future::Future;
use std::io::{BufRead, Write};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Host USB capabilities needed by the set-time workflow
pub trait Transport {
    /// Snapshot of the connected devices (may be empty)
    fn enumerate(
        &self,
    ) -> impl Future<Output = Result<Vec<UsbDeviceDescriptor>, TransportError>> + Send;

    /// Ask for permission to use a device
    ///
    /// Resolves exactly once, with either outcome.
    fn request_permission(
        &self,
        device: &UsbDeviceDescriptor,
    ) -> impl Future<Output = Result<PermissionOutcome, TransportError>> + Send;

    /// Open the device, write `frame` to its vendor interface and close it
    fn open_and_write(
        &self,
        device: &UsbDeviceDescriptor,
        frame: &TimeCommandFrame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Transport backed by the USB worker thread
#[derive(Clone)]
pub struct UsbTransport {
    bridge: UsbBridge,
    policy: PermissionPolicy,
}

impl UsbTransport {
    pub fn new(bridge: UsbBridge, policy: PermissionPolicy) -> Self {
        Self { bridge, policy }
    }

    async fn call<T>(
        &self,
        make_command: impl FnOnce(oneshot::Sender<T>) -> UsbCommand,
    ) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.bridge
            .send_command(make_command(tx))
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        rx.await
            .map_err(|_| TransportError::Channel("USB worker dropped the request".to_string()))
    }
}

impl Transport for UsbTransport {
    async fn enumerate(&self) -> Result<Vec<UsbDeviceDescriptor>, TransportError> {
        self.call(|response| UsbCommand::ListDevices { response }).await?
    }

    async fn request_permission(
        &self,
        device: &UsbDeviceDescriptor,
    ) -> Result<PermissionOutcome, TransportError> {
        let device = device.clone();
        let access = self
            .call(|response| UsbCommand::CheckAccess {
                device: device.clone(),
                response,
            })
            .await?;

        if !access.is_granted() || self.policy == PermissionPolicy::Auto {
            return Ok(access);
        }

        let question = format!(
            "Set the time on OnlyKey {:04x}:{:04x} at {:03}:{:03}? [y/N] ",
            device.vendor_id, device.product_id, device.bus_number, device.device_address
        );

        // A detached thread, not the blocking pool: runtime shutdown would
        // otherwise wait on a stdin read nobody will answer.
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("permission-prompt".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut stdout = std::io::stdout();
                let _ = tx.send(ask_user(&mut stdin.lock(), &mut stdout, &question));
            })
            .map_err(|e| TransportError::Channel(format!("Permission prompt failed: {}", e)))?;

        rx.await
            .map_err(|_| TransportError::Channel("Permission prompt abandoned".to_string()))
    }

    async fn open_and_write(
        &self,
        device: &UsbDeviceDescriptor,
        frame: &TimeCommandFrame,
    ) -> Result<(), TransportError> {
        let device = device.clone();
        let frame = *frame;
        self.call(|response| UsbCommand::WriteFrame {
            device,
            frame,
            response,
        })
        .await?
    }
}

/// Ask a yes/no question, defaulting to no
///
/// Only `y` or `yes` (any case) grants; EOF and read errors deny.
pub fn ask_user<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> PermissionOutcome {
    if write!(output, "{}", question)
        .and_then(|_| output.flush())
        .is_err()
    {
        return PermissionOutcome::Denied;
    }

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => {
            debug!("No answer to permission prompt");
            PermissionOutcome::Denied
        }
        Ok(_) => match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => PermissionOutcome::Granted,
            other => {
                info!("Permission refused at prompt ({:?})", other);
                PermissionOutcome::Denied
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_usb_bridge;
    use common::test_utils::create_onlykey_descriptor;
    use std::io::Cursor;

    #[test]
    fn test_ask_user_answers() {
        for (answer, expected) in [
            ("y\n", PermissionOutcome::Granted),
            ("YES\n", PermissionOutcome::Granted),
            ("n\n", PermissionOutcome::Denied),
            ("\n", PermissionOutcome::Denied),
            ("", PermissionOutcome::Denied),
        ] {
            let mut output = Vec::new();
            let outcome = ask_user(&mut Cursor::new(answer), &mut output, "Proceed? ");
            assert_eq!(outcome, expected, "answer {:?}", answer);
            assert_eq!(output, b"Proceed? ");
        }
    }

    #[tokio::test]
    async fn test_auto_policy_forwards_access_result() {
        let (bridge, worker) = create_usb_bridge();
        let transport = UsbTransport::new(bridge, PermissionPolicy::Auto);

        let handle = std::thread::spawn(move || {
            if let Ok(UsbCommand::CheckAccess { response, .. }) = worker.recv_command() {
                let _ = response.send(PermissionOutcome::Granted);
            }
        });

        let outcome = transport
            .request_permission(&create_onlykey_descriptor(1))
            .await
            .unwrap();
        assert_eq!(outcome, PermissionOutcome::Granted);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_prompt_policy_skips_prompt_when_os_denies() {
        let (bridge, worker) = create_usb_bridge();
        let transport = UsbTransport::new(bridge, PermissionPolicy::Prompt);

        let handle = std::thread::spawn(move || {
            if let Ok(UsbCommand::CheckAccess { response, .. }) = worker.recv_command() {
                let _ = response.send(PermissionOutcome::Denied);
            }
        });

        let outcome = transport
            .request_permission(&create_onlykey_descriptor(1))
            .await
            .unwrap();
        assert_eq!(outcome, PermissionOutcome::Denied);
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_worker_gone_is_channel_error() {
        let (bridge, worker) = create_usb_bridge();
        drop(worker);
        let transport = UsbTransport::new(bridge, PermissionPolicy::Auto);

        let result = transport.enumerate().await;
        assert!(matches!(result, Err(TransportError::Channel(_))));
    }
}
