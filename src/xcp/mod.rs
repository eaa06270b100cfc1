//! XCP measurement/calibration master over CAN.
//!
//! The layer splits the way the protocol does:
//!
//! - [`Packet`] is the eight-byte command/response unit with the PID tables
//! - [`ResponseRouter`] and the [`XcpTransport`] trait carry request/response
//!   framing, duplicate detection and timeout-bounded waits over any channel
//! - [`CanXcpTransport`] binds the transport to a [`CanBus`](crate::bus::CanBus)
//!   with one fixed identifier per direction
//! - [`XcpMaster`] is the protocol state machine: connect, disconnect,
//!   synch, status, memory transfer address, download and multi-packet
//!   upload
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use canharness::{BusConfig, CanBus, CanXcpTransport, DbcLibrary, XcpCanConfig, XcpMaster};
//!
//! # async fn demo() -> canharness::Result<()> {
//! let bus = CanBus::new(Arc::new(DbcLibrary::new()), BusConfig::default());
//! let transport = CanXcpTransport::attach(&bus, XcpCanConfig::default());
//! let mut master = XcpMaster::new(transport);
//!
//! master.connect(0x00).await?;
//! master.set_mta(0x2000_0000, 0).await?;
//! let bytes = master.upload(16).await?;
//! master.disconnect().await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

mod master;
mod packet;
mod transport;

pub use master::{
    ConnectionInfo, SessionStatus, XcpMaster, comm_mode, protection, resource, session_status,
    swap16, swap32,
};
pub use packet::{MAX_PACKET_LEN, Packet, command, crc, pid};
pub use transport::{CanXcpTransport, ResponseRouter, XcpTransport};
