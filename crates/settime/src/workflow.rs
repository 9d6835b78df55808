//! Set-time workflow
//!
//! One pass: pick a candidate (from an attach event or a full scan), ask for
//! permission, then write a freshly built frame. Every failure ends the pass
//! with a log line; nothing is retried.

use crate::transport::Transport;
use common::TransportError;
use protocol::{
    PermissionOutcome, TimeCommandFrame, UsbDeviceDescriptor, find_inaccessible_candidate,
    find_target_device, is_inaccessible_candidate, is_target_device,
};
use std::future::Future;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Source of the current time
pub trait Clock {
    fn now(&self) -> SystemTime;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Why the workflow was entered
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A device was plugged in
    Attached(UsbDeviceDescriptor),
    /// Scan every connected device and use the first OnlyKey
    Manual,
}

/// How a workflow pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Frame written to the device
    TimeSet {
        device: UsbDeviceDescriptor,
        unix_seconds: u32,
    },
    /// No candidate satisfied the matcher
    NoMatch,
    /// Access to the matched device was refused, or a possible OnlyKey
    /// could not be opened to identify it
    PermissionDenied { device: UsbDeviceDescriptor },
    /// Enumeration, the permission request or the write failed
    TransportFailed(TransportError),
}

impl Outcome {
    /// Denials and transport errors count as failures; no match does not
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::PermissionDenied { .. } | Outcome::TransportFailed(_)
        )
    }
}

/// Device picked for a pass
enum Candidate {
    Target(UsbDeviceDescriptor),
    /// Allow-listed but unopenable, so it could not be identified
    Inaccessible(UsbDeviceDescriptor),
    None,
}

/// Matches, asks for permission and writes the time
pub struct SetTimeWorkflow<T, C = SystemClock> {
    transport: T,
    clock: C,
}

impl<T: Transport> SetTimeWorkflow<T> {
    pub fn new(transport: T) -> Self {
        Self::with_clock(transport, SystemClock)
    }
}

impl<T: Transport, C: Clock> SetTimeWorkflow<T, C> {
    pub fn with_clock(transport: T, clock: C) -> Self {
        Self { transport, clock }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one pass of the workflow
    pub async fn run(&self, trigger: Trigger) -> Outcome {
        let device = match self.select_candidate(trigger).await {
            Ok(Candidate::Target(device)) => device,
            Ok(Candidate::Inaccessible(device)) => {
                warn!(
                    "Device {:04x}:{:04x} at {:03}:{:03} may be an OnlyKey but cannot be opened",
                    device.vendor_id, device.product_id, device.bus_number, device.device_address
                );
                return Outcome::PermissionDenied { device };
            }
            Ok(Candidate::None) => {
                debug!("No OnlyKey found");
                return Outcome::NoMatch;
            }
            Err(e) => {
                error!("Failed to enumerate USB devices: {}", e);
                return Outcome::TransportFailed(e);
            }
        };

        info!(
            "Found OnlyKey {:04x}:{:04x} at {:03}:{:03}",
            device.vendor_id, device.product_id, device.bus_number, device.device_address
        );

        match self.transport.request_permission(&device).await {
            Ok(PermissionOutcome::Granted) => {
                debug!("Permission granted");
            }
            Ok(PermissionOutcome::Denied) => {
                info!(
                    "Permission denied for device {:03}:{:03}",
                    device.bus_number, device.device_address
                );
                return Outcome::PermissionDenied { device };
            }
            Err(e) => {
                error!("Permission request failed: {}", e);
                return Outcome::TransportFailed(e);
            }
        }

        // Built only now so the time is as fresh as possible
        let frame = TimeCommandFrame::at(self.clock.now());

        match self.transport.open_and_write(&device, &frame).await {
            Ok(()) => {
                info!(
                    "Set OnlyKey time to {} (unix seconds)",
                    frame.unix_seconds()
                );
                Outcome::TimeSet {
                    device,
                    unix_seconds: frame.unix_seconds(),
                }
            }
            Err(e) => {
                error!("Failed to write time to OnlyKey: {}", e);
                Outcome::TransportFailed(e)
            }
        }
    }

    /// Run one pass unless `shutdown` completes first
    ///
    /// Returns `None` when the pass was abandoned. An abandoned pass drops its
    /// pending transport request; the worker still finishes any write it has
    /// already started.
    pub async fn run_until<F: Future>(&self, trigger: Trigger, shutdown: F) -> Option<Outcome> {
        tokio::select! {
            outcome = self.run(trigger) => Some(outcome),
            _ = shutdown => {
                info!("Workflow pass interrupted");
                None
            }
        }
    }

    async fn select_candidate(&self, trigger: Trigger) -> Result<Candidate, TransportError> {
        match trigger {
            Trigger::Attached(device) => {
                if is_target_device(&device) {
                    Ok(Candidate::Target(device))
                } else if is_inaccessible_candidate(&device) {
                    Ok(Candidate::Inaccessible(device))
                } else {
                    debug!(
                        "Ignoring attached device {:04x}:{:04x}",
                        device.vendor_id, device.product_id
                    );
                    Ok(Candidate::None)
                }
            }
            Trigger::Manual => {
                let devices = self.transport.enumerate().await?;
                if let Some(device) = find_target_device(&devices) {
                    Ok(Candidate::Target(device.clone()))
                } else if let Some(device) = find_inaccessible_candidate(&devices) {
                    Ok(Candidate::Inaccessible(device.clone()))
                } else {
                    Ok(Candidate::None)
                }
            }
        }
    }
}
