//! Set-time command frame
//!
//! The OnlyKey accepts a fixed 9-byte message on its vendor endpoint:
//!
//! ```text
//! +----+----+----+----+--------+-------------------------+
//! | FF | FF | FF | FF | E4     | unix seconds (u32, BE)  |
//! +----+----+----+----+--------+-------------------------+
//!   header              opcode   payload
//! ```
//!
//! No reply is read back.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::time::{SystemTime, UNIX_EPOCH};

/// Header prefixed to every OnlyKey message
pub const MESSAGE_HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

/// Set-time opcode
pub const OKSETTIME: u8 = 0xe4;

/// Total frame size in bytes
pub const FRAME_LEN: usize = 9;

const OPCODE_OFFSET: usize = MESSAGE_HEADER.len();
const PAYLOAD_OFFSET: usize = OPCODE_OFFSET + 1;

/// Seconds since the Unix epoch as the 32-bit value the device stores
///
/// Seconds are truncated toward zero, then wrapped to 32 bits. Instants
/// before the epoch wrap as two's complement; instants past 2106 wrap
/// around to small values.
pub fn unix_seconds(now: SystemTime) -> u32 {
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as u32,
        Err(before) => (before.duration().as_secs() as i64).wrapping_neg() as u32,
    }
}

/// Build the raw frame for `now`
pub fn build_time_frame(now: SystemTime) -> [u8; FRAME_LEN] {
    *TimeCommandFrame::at(now).as_bytes()
}

/// Encoded set-time command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeCommandFrame {
    bytes: [u8; FRAME_LEN],
}

impl TimeCommandFrame {
    /// Frame carrying the time of `now`
    pub fn at(now: SystemTime) -> Self {
        Self::from_unix_seconds(unix_seconds(now))
    }

    /// Frame carrying an already truncated second count
    pub fn from_unix_seconds(seconds: u32) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..OPCODE_OFFSET].copy_from_slice(&MESSAGE_HEADER);
        bytes[OPCODE_OFFSET] = OKSETTIME;
        BigEndian::write_u32(&mut bytes[PAYLOAD_OFFSET..], seconds);
        Self { bytes }
    }

    /// Decode a frame, checking size, header and opcode
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes: [u8; FRAME_LEN] = data.try_into().map_err(|_| ProtocolError::FrameLength {
            expected: FRAME_LEN,
            actual: data.len(),
        })?;

        let mut header = [0u8; 4];
        header.copy_from_slice(&bytes[..OPCODE_OFFSET]);
        if header != MESSAGE_HEADER {
            return Err(ProtocolError::InvalidHeader(header));
        }

        if bytes[OPCODE_OFFSET] != OKSETTIME {
            return Err(ProtocolError::UnknownOpcode(bytes[OPCODE_OFFSET]));
        }

        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Second count carried in the payload
    pub fn unix_seconds(&self) -> u32 {
        BigEndian::read_u32(&self.bytes[PAYLOAD_OFFSET..])
    }
}

impl AsRef<[u8]> for TimeCommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
