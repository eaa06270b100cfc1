//! XCP master protocol state machine.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::xcp::packet::{Packet, command, pid};
use crate::xcp::transport::XcpTransport;

/// Resource availability bits reported by CONNECT.
pub mod resource {
    /// Calibration and paging available.
    pub const CAL_PG: u8 = 0x01;
    /// DAQ lists supported.
    pub const DAQ: u8 = 0x04;
    /// Data stimulation of a DAQ list available.
    pub const STIM: u8 = 0x08;
    /// Flash programming available.
    pub const PGM: u8 = 0x10;
}

/// COMM_MODE_BASIC bits reported by CONNECT.
pub mod comm_mode {
    /// Byte order for multi-byte parameters: 0 little endian, 1 big endian.
    pub const BYTE_ORDER: u8 = 0x01;
    /// Address granularity, low bit.
    pub const ADDRESS_GRANULARITY_0: u8 = 0x02;
    /// Address granularity, high bit (00 byte, 01 word, 10 dword).
    pub const ADDRESS_GRANULARITY_1: u8 = 0x04;
    /// Slave block mode available.
    pub const SLAVE_BLOCK_MODE: u8 = 0x40;
    /// Additional communication mode info available via GET_COMM_MODE_INFO.
    pub const OPTIONAL: u8 = 0x80;
}

/// Session status bits reported by GET_STATUS.
pub mod session_status {
    /// Pending request to store calibration data into non-volatile memory.
    pub const STORE_CAL_REQ: u8 = 0x01;
    /// Pending request to store DAQ lists into non-volatile memory.
    pub const STORE_DAQ_REQ: u8 = 0x04;
    /// Pending request to clear non-volatile DAQ configuration.
    pub const CLEAR_DAQ_REQ: u8 = 0x08;
    /// At least one DAQ list is running.
    pub const DAQ_RUNNING: u8 = 0x40;
    /// Slave is in resume mode.
    pub const RESUME: u8 = 0x80;
}

/// Seed&key protection bits reported by GET_STATUS.
pub mod protection {
    pub const CAL_PG: u8 = 0x01;
    pub const DAQ: u8 = 0x04;
    pub const STIM: u8 = 0x08;
    pub const PGM: u8 = 0x10;
}

/// Slave capabilities negotiated by a successful CONNECT.
///
/// Valid only while the master is connected; invalidated by `disconnect`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectionInfo {
    /// Resource availability bits (see [`resource`]).
    pub resource: u8,
    /// Basic communication mode bits (see [`comm_mode`]).
    pub comm_mode_basic: u8,
    /// Maximum command transfer object size in bytes.
    pub max_cto: u8,
    /// Maximum data transfer object size in bytes.
    pub max_dto: u16,
    pub protocol_layer_version: u8,
    pub transport_layer_version: u8,
}

/// Slave session state decoded from GET_STATUS.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStatus {
    /// Session status bits (see [`session_status`]).
    pub session_status: u8,
    /// Resource protection bits (see [`protection`]).
    pub resource_protection: u8,
    pub state_number: u8,
    pub session_configuration_id: u16,
}

/// Swap the two bytes of a word. Symmetric: `swap16(swap16(x)) == x`.
pub const fn swap16(value: u16) -> u16 {
    (value >> 8) | (value << 8)
}

/// Reverse the four bytes of a dword. Symmetric: `swap32(swap32(x)) == x`.
pub const fn swap32(value: u32) -> u32 {
    let value = ((value << 8) & 0xFF00_FF00) | ((value >> 8) & 0x00FF_00FF);
    value.rotate_left(16)
}

/// XCP master: drives one slave over a transport.
///
/// The state machine is deliberately small - disconnected or connected,
/// plus the [`ConnectionInfo`] cached by the last successful connect. All
/// commands after `connect` honor the byte-order bit learned there when
/// assembling or decoding multi-byte fields.
pub struct XcpMaster<T: XcpTransport> {
    transport: Arc<T>,
    connected: bool,
    little_endian: bool,
    info: Option<ConnectionInfo>,
}

impl<T: XcpTransport> XcpMaster<T> {
    /// Create a master over a transport. No traffic is exchanged until
    /// [`connect`](Self::connect).
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport, connected: false, little_endian: true, info: None }
    }

    /// Whether a connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Capabilities from the last successful connect.
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    /// Build up the connection to the slave.
    ///
    /// Decodes the slave's resource flags, communication mode (including
    /// the byte order governing all subsequent multi-byte fields) and
    /// CTO/DTO limits. Any transport failure or a response shorter than
    /// eight bytes leaves the master disconnected.
    pub async fn connect(&mut self, mode: u8) -> Result<ConnectionInfo> {
        self.connected = false;
        self.info = None;

        if !self.transport.is_valid() {
            return Err(HarnessError::InvalidTransport);
        }

        let request = Packet::with_payload(command::CONNECT, &[mode])?;
        let response = self.transport.request(&request).await?;

        if usize::from(response.len) < 8 {
            return Err(HarnessError::protocol(
                "short CONNECT response",
                response.to_string(),
            ));
        }

        let data = response.bytes();
        let mut info = ConnectionInfo {
            resource: data[0],
            comm_mode_basic: data[1],
            max_cto: data[2],
            max_dto: u16::from_le_bytes([data[3], data[4]]),
            protocol_layer_version: data[5],
            transport_layer_version: data[6],
        };

        self.little_endian = info.comm_mode_basic & comm_mode::BYTE_ORDER == 0;
        info.max_dto = self.word_swap(info.max_dto);

        info!(
            "XCP master connected: resource {}, comm mode {}, max CTO {}, max DTO {}, protocol v{}, transport v{}",
            info.resource,
            info.comm_mode_basic,
            info.max_cto,
            info.max_dto,
            info.protocol_layer_version,
            info.transport_layer_version
        );

        self.info = Some(info);
        self.connected = true;
        Ok(info)
    }

    /// Release the connection.
    ///
    /// A no-op success when already disconnected or the transport is gone;
    /// the connected state is cleared even if the DISCONNECT request fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected || !self.transport.is_valid() {
            self.connected = false;
            self.info = None;
            return Ok(());
        }

        self.connected = false;
        self.info = None;

        debug!("XCP master disconnecting");
        self.transport.request(&Packet::command(command::DISCONNECT)).await.map(|_| ())
    }

    /// Current slave session status.
    pub async fn get_status(&self) -> Result<SessionStatus> {
        self.ensure_connected()?;

        let response = self.transport.request(&Packet::command(command::GET_STATUS)).await?;
        if usize::from(response.len) < 6 {
            return Err(HarnessError::protocol(
                "short GET_STATUS response",
                response.to_string(),
            ));
        }

        let data = response.bytes();
        Ok(SessionStatus {
            session_status: data[0],
            resource_protection: data[1],
            state_number: data[2],
            session_configuration_id: self.word_swap(u16::from_le_bytes([data[3], data[4]])),
        })
    }

    /// Synchronize command execution after a timeout condition.
    ///
    /// SYNCH is the one command whose error response is not a failure; the
    /// transport layer already exempts it.
    pub async fn synch(&self) -> Result<()> {
        self.ensure_connected()?;
        self.transport.request(&Packet::command(command::SYNCH)).await.map(|_| ())
    }

    /// Set the slave's memory transfer address used by upload and download.
    pub async fn set_mta(&self, address: u32, address_extension: u8) -> Result<()> {
        self.ensure_connected()?;

        let mut packet = Packet::command(command::SET_MTA);
        packet.len = 8;
        packet.data[1] = 0;
        packet.data[2] = 0;
        packet.data[3] = address_extension;
        packet.data[4..8].copy_from_slice(&self.dword_swap(address).to_le_bytes());

        self.transport.request(&packet).await.map(|_| ())
    }

    /// Transfer up to six bytes from master to slave at the current MTA.
    pub async fn download(&self, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;

        if data.len() > 6 {
            return Err(HarnessError::FrameLength { len: data.len(), max: 6 });
        }

        let mut packet = Packet::command(command::DOWNLOAD);
        packet.data[1] = data.len() as u8;
        packet.data[2..2 + data.len()].copy_from_slice(data);
        packet.len = data.len() as u8 + 2;

        self.transport.request(&packet).await.map(|_| ())
    }

    /// Transfer `len` bytes from the slave at the current MTA.
    ///
    /// Lengths beyond one response packet arrive as additional RES packets
    /// pulled straight from the transport's response queue; bytes are
    /// assembled in arrival order. A timeout or malformed follow-up fails
    /// the whole call - no partial buffer is returned.
    pub async fn upload(&self, len: usize) -> Result<Vec<u8>> {
        self.ensure_connected()?;

        let request = Packet::with_payload(command::UPLOAD, &[len as u8])?;
        let response = self.transport.request(&request).await?;
        if response.len <= 1 {
            return Err(HarnessError::protocol("empty UPLOAD response", response.to_string()));
        }

        let mut assembled = Vec::with_capacity(len);
        let chunk = &response.bytes()[1..];
        assembled.extend_from_slice(&chunk[..chunk.len().min(len)]);

        // Larger sizes arrive in further packets: each starts with RES and
        // carries upload bytes, the last possibly padded to the DLC.
        while assembled.len() < len {
            let follow_up = self
                .transport
                .router()
                .await_response()
                .await
                .ok_or_else(|| HarnessError::timeout(self.transport.router().timeout()))?;

            if follow_up.packet_id() != pid::RES || follow_up.len <= 1 {
                return Err(HarnessError::protocol(
                    "malformed UPLOAD continuation",
                    follow_up.to_string(),
                ));
            }

            let chunk = &follow_up.bytes()[1..];
            let remaining = len - assembled.len();
            assembled.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        }

        Ok(assembled)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected { Ok(()) } else { Err(HarnessError::NotConnected) }
    }

    /// Byte-swap a word when the slave is big endian.
    fn word_swap(&self, value: u16) -> u16 {
        if self.little_endian { value } else { swap16(value) }
    }

    /// Byte-swap a dword when the slave is big endian.
    fn dword_swap(&self, value: u32) -> u32 {
        if self.little_endian { value } else { swap32(value) }
    }
}

impl<T: XcpTransport> std::fmt::Debug for XcpMaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XcpMaster")
            .field("connected", &self.connected)
            .field("little_endian", &self.little_endian)
            .finish()
    }
}
