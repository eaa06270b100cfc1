//! Error types for the CAN/XCP stack.
//!
//! All fallible operations in this crate return [`HarnessError`] through the
//! [`Result`] alias. The taxonomy follows the failure domains of the stack:
//!
//! - **File/Parse Errors**: DBC documents that cannot be read or parsed
//! - **Codec Errors**: signal lookup, encode and decode failures
//! - **Device Errors**: transport device transmission failures
//! - **Protocol Errors**: XCP slave error responses and malformed packets
//! - **Timeout Errors**: requests that received no response in time
//!
//! Protocol and timeout failures look the same to a retrying caller but stay
//! distinguishable:
//!
//! ```rust
//! use canharness::HarnessError;
//! use std::time::Duration;
//!
//! let error = HarnessError::timeout(Duration::from_millis(500));
//! assert!(error.is_timeout());
//! assert!(!error.is_protocol());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for CAN/XCP operations.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Main error type for CAN/XCP operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HarnessError {
    #[error("DBC file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Message '{message}' not found in any DBC namespace")]
    MessageNotFound { message: String },

    #[error("Signal '{signal}' not found in message '{message}'")]
    SignalNotFound { signal: String, message: String },

    #[error("Failed to encode message '{message}': {details}")]
    Encode { message: String, details: String },

    #[error("Failed to decode message '{message}': {details}")]
    Decode { message: String, details: String },

    #[error("Invalid frame payload length {len} (maximum {max})")]
    FrameLength { len: usize, max: usize },

    #[error("Device '{device}' error: {details}")]
    Device { device: String, details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("XCP protocol error: {details} [{packet}]")]
    Protocol { details: String, packet: String },

    #[error("XCP master is not connected")]
    NotConnected,

    #[error("XCP transport is no longer valid")]
    InvalidTransport,
}

impl HarnessError {
    /// Create a file error with path context.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File { path: path.into(), source }
    }

    /// Create a parse error with context.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Parse { context: context.into(), details: details.into() }
    }

    /// Create an encode error for a named message.
    pub fn encode(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Encode { message: message.into(), details: details.into() }
    }

    /// Create a decode error for a named message.
    pub fn decode(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Decode { message: message.into(), details: details.into() }
    }

    /// Create a device transmission error.
    pub fn device(device: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Device { device: device.into(), details: details.into() }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an XCP protocol error carrying the offending packet's hex dump.
    pub fn protocol(details: impl Into<String>, packet: impl Into<String>) -> Self {
        Self::Protocol { details: details.into(), packet: packet.into() }
    }

    /// Whether this error is a response timeout.
    ///
    /// Callers typically treat timeouts and protocol errors identically
    /// (the command failed), but retry policies may want the distinction.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error is an explicit XCP slave error response.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_protocol_are_distinguishable() {
        let timeout = HarnessError::timeout(Duration::from_millis(500));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_protocol());

        let protocol = HarnessError::protocol("slave returned error", "FE 21");
        assert!(protocol.is_protocol());
        assert!(!protocol.is_timeout());
    }

    #[test]
    fn error_messages_include_context() {
        let err = HarnessError::decode("EngineData", "payload too short");
        assert!(err.to_string().contains("EngineData"));
        assert!(err.to_string().contains("payload too short"));

        let err = HarnessError::parse("DBC parse", "unexpected token");
        assert!(err.to_string().contains("DBC parse"));
    }

    #[test]
    fn file_error_preserves_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = HarnessError::file("/tmp/network.dbc", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("network.dbc"));
    }
}
