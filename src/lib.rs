//! DBC-driven CAN bus simulation with J1939 routing and an XCP master.
//!
//! `canharness` is the communication backbone for vehicle-software test
//! benches: it loads DBC message definitions, routes CAN frames between
//! registered messages and transport devices, drives periodic scheduled
//! transmission, and speaks the XCP measurement/calibration protocol as a
//! master over the same bus.
//!
//! # Features
//!
//! - **DBC codecs**: runtime-loaded signal tables with bit-exact Intel and
//!   Motorola packing
//! - **Bus routing**: identifier-keyed registries with J1939 PGN and
//!   broadcast matching precedence
//! - **Scheduled transmission**: per-message cycle times driven by one
//!   periodic task
//! - **XCP master**: connect/disconnect, SYNCH, GET_STATUS, SET_MTA,
//!   DOWNLOAD and multi-packet UPLOAD over CAN
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use canharness::{BusConfig, CanBus, DbcLibrary, Timestamp};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> canharness::Result<()> {
//!     let mut library = DbcLibrary::new();
//!     library.register_file("powertrain", "network.dbc")?;
//!
//!     let bus = CanBus::new(Arc::new(library), BusConfig::default());
//!     let speed = bus.register_recv("VehicleSpeed", None)?;
//!
//!     // A device I/O task would feed inbound frames through bus.handle();
//!     // the application reads decoded signals off the slot.
//!     if speed.is_alive(Timestamp::now()) {
//!         let values = speed.signals()?;
//!         println!("speed: {:.1} km/h", values["Speed"]);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod types;

// DBC codec table
pub mod dbc;

// Bus routing and devices
pub mod bus;
pub mod device;

// Concurrency primitives
pub mod sync;

// XCP master protocol
pub mod xcp;

#[cfg(test)]
pub mod test_utils;

// Core exports
pub use config::{BusConfig, XcpCanConfig};
pub use error::{HarnessError, Result};
pub use types::{CanFrame, FrameFlags, MAX_FRAME_DATA, Timestamp};

// DBC exports
pub use dbc::{DbcLibrary, MessageCodec, SignalSpec, SignalValues};

// Bus exports
pub use bus::{BusCounters, BusHandle, CanBus, MessageSlot, SendReport, StaticMessage, TappedFrame};

// Device exports
pub use device::{DeviceStatus, SimDevice, TransportDevice};

// XCP exports
pub use xcp::{
    CanXcpTransport, ConnectionInfo, Packet, SessionStatus, XcpMaster, XcpTransport,
};
