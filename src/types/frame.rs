//! CAN frame value type and flag bits.

use crate::error::{HarnessError, Result};
use crate::types::id;

/// Maximum payload size of a CAN-FD frame in bytes.
pub const MAX_FRAME_DATA: usize = 64;

/// Flag bits attached to a [`CanFrame`].
///
/// A plain standard frame carries no bits at all; everything else is a
/// combination of the constants below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// CAN standard frame (11-bit identifier), no flag bits set.
    pub const STANDARD: u8 = 0x00;
    /// Remote-transfer-request frame.
    pub const RTR: u8 = 0x01;
    /// CAN extended frame (29-bit identifier).
    pub const EXTENDED: u8 = 0x02;
    /// CAN-FD frame.
    pub const FD: u8 = 0x04;
    /// CAN-FD bit-rate switch (data phase at higher bit rate).
    pub const BRS: u8 = 0x08;
    /// CAN-FD error state indicator (transmitter was error active).
    pub const ESI: u8 = 0x10;
    /// Error frame.
    pub const ERRFRAME: u8 = 0x40;

    /// Create flags from raw bits.
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every bit of `flag` is set.
    pub const fn has(self, flag: u8) -> bool {
        self.0 & flag == flag && flag != 0
    }

    /// Return these flags with the bits of `flag` added.
    #[must_use]
    pub const fn with(self, flag: u8) -> Self {
        Self(self.0 | flag)
    }

    /// Whether this frame uses a 29-bit extended identifier.
    pub const fn is_extended(self) -> bool {
        self.has(Self::EXTENDED)
    }
}

/// A single CAN or CAN-FD frame.
///
/// Frames are plain `Copy` values: components exchange copies, never shared
/// references, so a frame is immutable from the point of view of everyone
/// except the component that owns the copy.
///
/// The identifier is stored with the numeric value in the low 31 bits; the
/// top bit is reserved by the [`id::EXTENDED_BIT`] convention and masked off
/// by [`id::numeric`] wherever the raw value is needed.
#[derive(Clone, Copy)]
pub struct CanFrame {
    /// Frame identifier (see [`id`]).
    pub id: u32,
    /// Number of valid payload bytes (0-64).
    pub len: u8,
    /// Frame flag bits.
    pub flags: FrameFlags,
    /// Payload buffer; only the first `len` bytes are meaningful.
    pub data: [u8; MAX_FRAME_DATA],
}

impl CanFrame {
    /// Create a frame from an identifier and payload.
    ///
    /// The extended flag is set automatically when the numeric identifier
    /// does not fit in 11 bits. Payloads longer than [`MAX_FRAME_DATA`]
    /// are rejected.
    pub fn new(can_id: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_FRAME_DATA {
            return Err(HarnessError::FrameLength { len: payload.len(), max: MAX_FRAME_DATA });
        }

        let mut data = [0u8; MAX_FRAME_DATA];
        data[..payload.len()].copy_from_slice(payload);

        let flags = if id::is_extended_value(can_id) {
            FrameFlags::default().with(FrameFlags::EXTENDED)
        } else {
            FrameFlags::default()
        };

        Ok(Self { id: can_id, len: payload.len() as u8, flags, data })
    }

    /// Create an empty frame for the given identifier.
    pub fn empty(can_id: u32) -> Self {
        // A zero-length payload can never exceed the buffer.
        Self::new(can_id, &[]).expect("empty payload is always valid")
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(MAX_FRAME_DATA as u8))]
    }

    /// The numeric identifier with the extended-bit convention masked off.
    pub fn numeric_id(&self) -> u32 {
        id::numeric(self.id)
    }
}

impl Default for CanFrame {
    fn default() -> Self {
        Self { id: 0, len: 0, flags: FrameFlags::default(), data: [0u8; MAX_FRAME_DATA] }
    }
}

impl std::fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CanFrame {{ id: {:#010X}, len: {}, flags: {:#04X}, data: ", self.id, self.len, self.flags.bits())?;
        for byte in self.payload() {
            write!(f, "{byte:02X}")?;
        }
        write!(f, " }}")
    }
}
