//! Configuration types for buses and XCP transports.
//!
//! Both configs deserialize from YAML so a hosting simulation can keep its
//! harness wiring in the same documents as the rest of its setup:
//!
//! ```rust
//! use canharness::BusConfig;
//!
//! let config = BusConfig::from_yaml("
//! loop_frames: true
//! periodic_send: true
//! interval_step_ms: 5
//! ").unwrap();
//! assert!(config.loop_frames);
//! assert_eq!(config.interval_step_ms, 5);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Behavior switches of a [`CanBus`](crate::bus::CanBus).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Dispatch sent frames back into the receive path. Useful when several
    /// components talk to each other over one bus, at the cost of decoding
    /// every sent frame locally.
    pub loop_frames: bool,
    /// Drive scheduled transmission of send registrations from a periodic
    /// task started by `activate`.
    pub periodic_send: bool,
    /// Tick step of the periodic sender in milliseconds.
    pub interval_step_ms: u64,
    /// Log every sent frame at debug level.
    pub log_send_frames: bool,
    /// Log every received frame at debug level.
    pub log_recv_frames: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            loop_frames: false,
            periodic_send: false,
            interval_step_ms: 10,
            log_send_frames: false,
            log_recv_frames: false,
        }
    }
}

impl BusConfig {
    /// Parse a config from a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| HarnessError::parse("bus config", e.to_string()))
    }

    /// Periodic tick step, clamped to at least one millisecond.
    pub fn interval_step(&self) -> Duration {
        Duration::from_millis(self.interval_step_ms.max(1))
    }
}

/// Wiring of a [`CanXcpTransport`](crate::xcp::CanXcpTransport): the two
/// fixed 29-bit identifiers of the point-to-point XCP link plus the request
/// timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XcpCanConfig {
    /// Identifier of master-to-slave command frames.
    pub master_id: u32,
    /// Identifier of slave-to-master response frames.
    pub slave_id: u32,
    /// Response timeout for `request` in milliseconds.
    pub timeout_ms: u64,
    /// Log every processed response packet.
    pub debug: bool,
}

impl Default for XcpCanConfig {
    fn default() -> Self {
        Self { master_id: 0x9950_F1FD, slave_id: 0x9951_FDF1, timeout_ms: 500, debug: false }
    }
}

impl XcpCanConfig {
    /// Parse a config from a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| HarnessError::parse("XCP transport config", e.to_string()))
    }

    /// Response timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_config_defaults() {
        let config = BusConfig::default();
        assert!(!config.loop_frames);
        assert!(!config.periodic_send);
        assert_eq!(config.interval_step(), Duration::from_millis(10));
    }

    #[test]
    fn bus_config_partial_yaml_keeps_defaults() {
        let config = BusConfig::from_yaml("periodic_send: true").unwrap();
        assert!(config.periodic_send);
        assert_eq!(config.interval_step_ms, 10);
    }

    #[test]
    fn bus_config_step_is_clamped() {
        let config = BusConfig::from_yaml("interval_step_ms: 0").unwrap();
        assert_eq!(config.interval_step(), Duration::from_millis(1));
    }

    #[test]
    fn xcp_config_defaults_match_link_identifiers() {
        let config = XcpCanConfig::default();
        assert_eq!(config.master_id, 0x9950_F1FD);
        assert_eq!(config.slave_id, 0x9951_FDF1);
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let err = BusConfig::from_yaml(": not yaml").unwrap_err();
        assert!(matches!(err, HarnessError::Parse { .. }));
    }
}
