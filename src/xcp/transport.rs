//! XCP transport layer: request/response framing over an arbitrary channel,
//! plus the CAN binding.

use std::sync::{Mutex, PoisonError};
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::bus::CanBus;
use crate::bus::WeakBusHandle;
use crate::config::XcpCanConfig;
use crate::error::{HarnessError, Result};
use crate::sync::WaitingQueue;
use crate::types::{CanFrame, Timestamp, id};
use crate::xcp::packet::{Packet, crc, pid};

/// Shared response-side state of an XCP transport.
///
/// Every transport binding owns one router: inbound packets flow through
/// [`process_response`](Self::process_response), which drops duplicate
/// sequence counters with a warning and forwards RES/ERR packets into the
/// waiting queue a [`request`](XcpTransport::request) call blocks on.
#[derive(Debug)]
pub struct ResponseRouter {
    queue: WaitingQueue<Packet>,
    timeout: Duration,
    debug: bool,
    last_counter: Mutex<Option<u64>>,
    last_received: Mutex<Option<Timestamp>>,
}

impl ResponseRouter {
    /// Create a router with the given response timeout.
    pub fn new(timeout: Duration, debug: bool) -> Self {
        Self {
            queue: WaitingQueue::new(),
            timeout,
            debug,
            last_counter: Mutex::new(None),
            last_received: Mutex::new(None),
        }
    }

    /// The response queue requests block on.
    ///
    /// Exposed so multi-packet consumers (upload reassembly) can pull
    /// follow-up packets directly, without issuing new requests.
    pub fn queue(&self) -> &WaitingQueue<Packet> {
        &self.queue
    }

    /// Configured response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timestamp of the last queued response.
    pub fn last_received(&self) -> Option<Timestamp> {
        *self.last_received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one inbound packet with its transport sequence counter.
    ///
    /// Duplicate counters are dropped with a warning and never surface to a
    /// waiting request. Only RES and ERR packets enter the response queue;
    /// EV and SERV traffic is observed and ignored.
    pub fn process_response(&self, packet: Packet, counter: u64, at: Timestamp) {
        if self.debug {
            debug!("XCP response {counter} received [{packet}]");
        }

        {
            let mut last = self.last_counter.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(counter) {
                warn!("duplicate XCP sequence counter {counter}, packet dropped");
                return;
            }
            *last = Some(counter);
        }

        match packet.packet_id() {
            pid::RES | pid::ERR => {
                *self.last_received.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
                self.queue.push(packet);
            }
            other => {
                trace!("non-response XCP packet {other:#04X} ignored");
            }
        }
    }

    /// Wait for the next response in arrival order within the configured
    /// timeout.
    ///
    /// Arrival order matters to multi-packet consumers: upload follow-up
    /// packets queued back-to-back must come out exactly as they came in.
    pub async fn await_response(&self) -> Option<Packet> {
        self.queue.pop_front(self.timeout).await
    }
}

/// A channel that carries XCP packets between master and slave.
#[async_trait::async_trait]
pub trait XcpTransport: Send + Sync {
    /// Transmit one command packet.
    async fn send(&self, packet: &Packet) -> Result<()>;

    /// Whether the underlying channel still exists.
    fn is_valid(&self) -> bool;

    /// The transport's response router.
    fn router(&self) -> &ResponseRouter;

    /// Send a command and wait for its response.
    ///
    /// Responses left over from earlier requests are discarded before the
    /// command goes out, so the response that satisfies this request is
    /// always the most recent one. An ERR response fails the request - and
    /// is logged with the packet's hex dump - unless the command was SYNCH,
    /// whose natural slave behavior includes a non-fatal error code. A
    /// missing response within the router's timeout fails with
    /// [`HarnessError::Timeout`].
    async fn request(&self, packet: &Packet) -> Result<Packet> {
        self.router().queue().clear();
        self.send(packet).await?;

        let response = self
            .router()
            .await_response()
            .await
            .ok_or_else(|| HarnessError::timeout(self.router().timeout()))?;

        if response.packet_id() == pid::ERR
            && packet.packet_id() != crate::xcp::packet::command::SYNCH
        {
            let code = response.bytes().get(1).copied().unwrap_or(0);
            error!(
                "XCP slave returned error status {} [{}]",
                crc::name(code).unwrap_or("unknown"),
                response
            );
            return Err(HarnessError::protocol("slave returned error status", response.to_string()));
        }

        Ok(response)
    }
}

/// XCP over CAN: one fixed identifier per direction, eight-byte packets.
///
/// Commands go out as single extended frames on the master identifier;
/// inbound bus traffic is filtered down to the slave identifier (compared
/// under the 26-bit J1939 mask, ignoring priority bits) and fed to the
/// router. The frame pump task runs until the transport is dropped or the
/// bus disappears.
pub struct CanXcpTransport {
    bus: WeakBusHandle,
    router: ResponseRouter,
    config: XcpCanConfig,
    cancel: CancellationToken,
}

impl CanXcpTransport {
    /// Attach a transport to a bus.
    pub fn attach(bus: &CanBus, config: XcpCanConfig) -> Arc<Self> {
        let handle = bus.handle();
        let transport = Arc::new(Self {
            bus: handle.downgrade(),
            router: ResponseRouter::new(config.timeout(), config.debug),
            config,
            cancel: CancellationToken::new(),
        });

        // The pump holds only a weak reference so dropping the last
        // transport handle ends the task; the stream itself ends when the
        // bus goes away.
        let pump = Arc::downgrade(&transport);
        let frames = handle.frames();
        let cancel = transport.cancel.clone();
        tokio::spawn(async move {
            debug!("XCP frame pump started");
            tokio::pin!(frames);
            let mut counter: u64 = 0;
            loop {
                let tapped = tokio::select! {
                    _ = cancel.cancelled() => break,
                    tapped = frames.next() => match tapped {
                        Some(tapped) => tapped,
                        None => break,
                    },
                };
                match pump.upgrade() {
                    Some(transport) => transport.frame_received(tapped.at, &tapped.frame, &mut counter),
                    None => break,
                }
            }
            debug!("XCP frame pump ended");
        });

        transport
    }

    /// The identifiers this transport is wired to.
    pub fn config(&self) -> &XcpCanConfig {
        &self.config
    }

    fn frame_received(&self, at: Timestamp, frame: &CanFrame, counter: &mut u64) {
        if id::pgn_with_source(frame.id) != id::pgn_with_source(self.config.slave_id) {
            return;
        }
        // CAN carries no transport sequence counter; synthesize a
        // monotonically advancing one per accepted frame.
        *counter += 1;
        match Packet::from_bytes(frame.payload()) {
            Ok(packet) => self.router.process_response(packet, *counter, at),
            Err(_) => warn!("oversized XCP frame ignored: {frame:?}"),
        }
    }
}

#[async_trait::async_trait]
impl XcpTransport for CanXcpTransport {
    async fn send(&self, packet: &Packet) -> Result<()> {
        let bus = self.bus.upgrade().ok_or(HarnessError::InvalidTransport)?;
        let frame = CanFrame::new(self.config.master_id, packet.bytes())?;
        bus.send_frame(&frame).await;
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.bus.upgrade().is_some()
    }

    fn router(&self) -> &ResponseRouter {
        &self.router
    }
}

impl CanXcpTransport {
    /// Stop the frame pump before the last handle drops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CanXcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
