//! Transport device abstraction.
//!
//! A [`TransportDevice`] is one physical or simulated CAN channel. The bus
//! fans outbound frames to every attached device; each device's own I/O
//! context forwards inbound wire frames back into the bus through a
//! [`BusHandle`](crate::bus::BusHandle). The trait stays small; each device
//! handles its own timing and I/O internally.
//!
//! Ownership is explicit: the hosting application owns both the bus and its
//! devices, the bus keeps non-owning `Arc` handles in attach order, and
//! detaching is an explicit call rather than destructor magic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{HarnessError, Result};
use crate::types::CanFrame;

/// Health of a transport device as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Not attached to a bus; frames cannot flow.
    Detached,
    /// Attached and passing frames.
    Operational,
    /// Attached but failing to transmit.
    Fault,
}

/// One CAN channel attached to at most one bus at a time.
#[async_trait::async_trait]
pub trait TransportDevice: Send + Sync {
    /// Device name for logs and error reports.
    fn name(&self) -> &str;

    /// Transmit one frame on the wire.
    ///
    /// Failures are reported to the bus, which counts them and carries on
    /// with the remaining devices; they are never escalated past the bus.
    async fn send_frame(&self, frame: &CanFrame) -> Result<()>;

    /// Current device health.
    fn status(&self) -> DeviceStatus {
        DeviceStatus::Operational
    }

    /// Bring the device up. Called by the host, not the bus.
    async fn activate(&self) -> Result<()> {
        Ok(())
    }

    /// Shut the device down.
    async fn deactivate(&self) {}
}

/// In-memory device for simulation and tests.
///
/// Outbound frames are captured into an unbounded channel whose receiver the
/// host (or a scripted peer) drains; inbound traffic is injected directly
/// through the bus handle. [`set_failing`](Self::set_failing) switches the
/// device into a fault mode where every send errors, for exercising the
/// bus's per-device error accounting.
#[derive(Debug)]
pub struct SimDevice {
    name: String,
    wire: mpsc::UnboundedSender<CanFrame>,
    failing: AtomicBool,
}

impl SimDevice {
    /// Create a device and the receiving end of its simulated wire.
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<CanFrame>) {
        let (wire, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { name: name.into(), wire, failing: AtomicBool::new(false) }), rx)
    }

    /// Toggle the simulated fault mode.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait::async_trait]
impl TransportDevice for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_frame(&self, frame: &CanFrame) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(HarnessError::device(&self.name, "simulated transmit fault"));
        }
        self.wire
            .send(*frame)
            .map_err(|_| HarnessError::device(&self.name, "wire receiver dropped"))
    }

    fn status(&self) -> DeviceStatus {
        if self.failing.load(Ordering::Relaxed) {
            DeviceStatus::Fault
        } else {
            DeviceStatus::Operational
        }
    }
}
