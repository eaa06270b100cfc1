//! Core types for CAN frame representation and addressing.
//!
//! This module provides the foundational data structures shared by every
//! layer of the stack:
//!
//! - [`CanFrame`] is the wire-level frame, copied by value between components
//! - [`FrameFlags`] carries the CAN/CAN-FD flag bits of a frame
//! - [`id`] holds the identifier conventions: the extended-identifier bit,
//!   the numeric mask and the J1939 PGN/source-address arithmetic
//!
//! Timestamps throughout the crate are monotonic [`Timestamp`] values taken
//! when a frame enters the process, never wall-clock times.

mod frame;
pub mod id;

pub use frame::{CanFrame, FrameFlags, MAX_FRAME_DATA};

/// Monotonic instant used for frame receive/send stamping and staleness
/// checks.
pub type Timestamp = std::time::Instant;
