//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures while reaching or writing to a device
///
/// Carries rendered messages rather than `rusb::Error` so test transports
/// can build every variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device {bus:03}:{address:03} is no longer connected")]
    DeviceNotFound { bus: u8, address: u8 },

    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Failed to read configuration: {0}")]
    Configuration(String),

    #[error("Device has no interface {0}")]
    NoInterface(u8),

    #[error("Failed to claim interface {interface}: {message}")]
    Claim { interface: u8, message: String },

    #[error("Interface {0} has no OUT endpoint")]
    NoEndpoint(u8),

    #[error("Write to endpoint {endpoint:#04x} failed: {message}")]
    Write { endpoint: u8, message: String },

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("USB worker unavailable: {0}")]
    Channel(String),
}
