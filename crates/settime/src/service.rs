//! Systemd service integration
//!
//! sd-notify support for watch mode: READY once the first pass is done,
//! STATUS after each attach, STOPPING on shutdown. Every call is a no-op
//! when `NOTIFY_SOCKET` is unset.

use anyhow::{Context, Result};
use std::env;
use tracing::debug;

/// Notify systemd that the service is ready
pub fn notify_ready() -> Result<()> {
    notify("READY=1")
}

/// Notify systemd that the service is stopping
pub fn notify_stopping() -> Result<()> {
    notify("STOPPING=1")
}

/// Send a custom status message to systemd
///
/// The status will be visible in `systemctl status` output.
pub fn notify_status(status: &str) -> Result<()> {
    notify(&format!("STATUS={}", status))
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

fn notify(state: &str) -> Result<()> {
    match env::var("NOTIFY_SOCKET") {
        Ok(socket_path) => send_state(&socket_path, state),
        Err(_) => {
            debug!("NOTIFY_SOCKET not set, skipping systemd notification");
            Ok(())
        }
    }
}

#[cfg(unix)]
fn send_state(socket_path: &str, state: &str) -> Result<()> {
    use std::os::unix::net::UnixDatagram;

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(state.as_bytes(), socket_path)
        .with_context(|| format!("Failed to send {} to systemd", state))?;
    debug!("Notified systemd: {}", state);
    Ok(())
}

#[cfg(not(unix))]
fn send_state(_socket_path: &str, state: &str) -> Result<()> {
    debug!("sd-notify unsupported on this platform, dropping {}", state);
    Ok(())
}
