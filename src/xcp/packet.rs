//! XCP packet value type and protocol identifier tables.

use crate::error::{HarnessError, Result};

/// Slave-to-master packet identifiers.
pub mod pid {
    /// Service request.
    pub const SERV: u8 = 0xFC;
    /// Event.
    pub const EV: u8 = 0xFD;
    /// Error response.
    pub const ERR: u8 = 0xFE;
    /// Positive command response.
    pub const RES: u8 = 0xFF;
}

/// Master-to-slave command codes.
#[allow(dead_code)]
pub mod command {
    // Standard commands
    pub const CONNECT: u8 = 0xFF;
    pub const DISCONNECT: u8 = 0xFE;
    pub const GET_STATUS: u8 = 0xFD;
    pub const SYNCH: u8 = 0xFC;
    pub const GET_COMM_MODE_INFO: u8 = 0xFB;
    pub const GET_ID: u8 = 0xFA;
    pub const SET_REQUEST: u8 = 0xF9;
    pub const GET_SEED: u8 = 0xF8;
    pub const UNLOCK: u8 = 0xF7;
    pub const SET_MTA: u8 = 0xF6;
    pub const UPLOAD: u8 = 0xF5;
    pub const SHORT_UPLOAD: u8 = 0xF4;
    pub const BUILD_CHECKSUM: u8 = 0xF3;
    pub const TRANSPORT_LAYER_CMD: u8 = 0xF2;
    pub const USER_CMD: u8 = 0xF1;

    // Calibration commands
    pub const DOWNLOAD: u8 = 0xF0;
    pub const DOWNLOAD_NEXT: u8 = 0xEF;
    pub const DOWNLOAD_MAX: u8 = 0xEE;
    pub const SHORT_DOWNLOAD: u8 = 0xED;
    pub const MODIFY_BITS: u8 = 0xEC;

    // Data acquisition and stimulation commands
    pub const SET_DAQ_PTR: u8 = 0xE2;
    pub const WRITE_DAQ: u8 = 0xE1;
    pub const SET_DAQ_LIST_MODE: u8 = 0xE0;
    pub const START_STOP_DAQ_LIST: u8 = 0xDE;
    pub const START_STOP_SYNCH: u8 = 0xDD;
    pub const READ_DAQ: u8 = 0xDB;
    pub const GET_DAQ_CLOCK: u8 = 0xDC;
    pub const CLEAR_DAQ_LIST: u8 = 0xE3;
    pub const FREE_DAQ: u8 = 0xD6;
    pub const ALLOC_DAQ: u8 = 0xD5;
    pub const ALLOC_ODT: u8 = 0xD4;
    pub const ALLOC_ODT_ENTRY: u8 = 0xD3;
}

/// XCP error-response codes, for log readability.
pub mod crc {
    pub const CMD_BUSY: u8 = 0x10;
    pub const CMD_UNKNOWN: u8 = 0x20;
    pub const CMD_SYNTAX: u8 = 0x21;
    pub const OUT_OF_RANGE: u8 = 0x22;
    pub const WRITE_PROTECTED: u8 = 0x23;
    pub const ACCESS_DENIED: u8 = 0x24;
    pub const ACCESS_LOCKED: u8 = 0x25;
    pub const SEQUENCE: u8 = 0x29;
    pub const MEMORY_OVERFLOW: u8 = 0x30;
    pub const GENERIC: u8 = 0x31;

    /// Human-readable name of an error code, when known.
    pub fn name(code: u8) -> Option<&'static str> {
        Some(match code {
            CMD_BUSY => "CMD_BUSY",
            CMD_UNKNOWN => "CMD_UNKNOWN",
            CMD_SYNTAX => "CMD_SYNTAX",
            OUT_OF_RANGE => "OUT_OF_RANGE",
            WRITE_PROTECTED => "WRITE_PROTECTED",
            ACCESS_DENIED => "ACCESS_DENIED",
            ACCESS_LOCKED => "ACCESS_LOCKED",
            SEQUENCE => "SEQUENCE",
            MEMORY_OVERFLOW => "MEMORY_OVERFLOW",
            GENERIC => "GENERIC",
            _ => return None,
        })
    }
}

/// Maximum XCP packet payload carried over CAN.
pub const MAX_PACKET_LEN: usize = 8;

/// One XCP packet: up to eight bytes, byte 0 is the command or packet
/// identifier.
///
/// A plain `Copy` value that lives on the stack of whoever handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Packet {
    /// Number of valid bytes.
    pub len: u8,
    /// Packet bytes; only the first `len` are meaningful.
    pub data: [u8; MAX_PACKET_LEN],
}

impl Packet {
    /// A bare one-byte command packet.
    pub fn command(cmd: u8) -> Self {
        let mut data = [0u8; MAX_PACKET_LEN];
        data[0] = cmd;
        Self { len: 1, data }
    }

    /// A command packet with a parameter payload (at most seven bytes).
    pub fn with_payload(cmd: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PACKET_LEN - 1 {
            return Err(HarnessError::FrameLength { len: payload.len(), max: MAX_PACKET_LEN - 1 });
        }
        let mut data = [0u8; MAX_PACKET_LEN];
        data[0] = cmd;
        data[1..=payload.len()].copy_from_slice(payload);
        Ok(Self { len: payload.len() as u8 + 1, data })
    }

    /// A packet from raw wire bytes (at most eight).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PACKET_LEN {
            return Err(HarnessError::FrameLength { len: bytes.len(), max: MAX_PACKET_LEN });
        }
        let mut data = [0u8; MAX_PACKET_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { len: bytes.len() as u8, data })
    }

    /// The packet identifier (first byte), `0` for an empty packet.
    pub fn packet_id(&self) -> u8 {
        if self.len == 0 { 0 } else { self.data[0] }
    }

    /// The valid packet bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(MAX_PACKET_LEN as u8))]
    }
}

impl std::fmt::Display for Packet {
    /// Hex dump of the valid bytes, the form used in protocol error logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_packet_is_one_byte() {
        let packet = Packet::command(command::SYNCH);
        assert_eq!(packet.len, 1);
        assert_eq!(packet.packet_id(), 0xFC);
    }

    #[test]
    fn payload_packet_carries_parameters() {
        let packet = Packet::with_payload(command::CONNECT, &[0x00]).unwrap();
        assert_eq!(packet.len, 2);
        assert_eq!(packet.bytes(), &[0xFF, 0x00]);
    }

    #[test]
    fn payload_over_seven_bytes_is_rejected() {
        let err = Packet::with_payload(command::DOWNLOAD, &[0u8; 8]).unwrap_err();
        assert!(matches!(err, HarnessError::FrameLength { len: 8, .. }));
    }

    #[test]
    fn from_bytes_round_trips_wire_data() {
        let packet = Packet::from_bytes(&[0xFF, 0x1D, 0x00, 0x08]).unwrap();
        assert_eq!(packet.packet_id(), pid::RES);
        assert_eq!(packet.bytes(), &[0xFF, 0x1D, 0x00, 0x08]);
    }

    #[test]
    fn display_is_a_hex_dump() {
        let packet = Packet::from_bytes(&[0xFE, 0x21]).unwrap();
        assert_eq!(packet.to_string(), "FE 21");
    }

    #[test]
    fn crc_names_cover_known_codes() {
        assert_eq!(crc::name(crc::CMD_BUSY), Some("CMD_BUSY"));
        assert_eq!(crc::name(0x7E), None);
    }
}
