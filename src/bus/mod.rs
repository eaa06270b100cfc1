//! CAN bus router.
//!
//! [`CanBus`] is the hub of the stack: it keeps identifier-keyed send and
//! receive registries, dispatches inbound frames to the matching
//! registration, fans outbound frames to every attached
//! [`TransportDevice`](crate::device::TransportDevice), optionally loops
//! sent frames straight back into the receive path, and (when activated
//! with periodic sending configured) drives scheduled transmission from a
//! background task.
//!
//! ## Inbound matching
//!
//! [`CanBus::process_receive`] resolves an identifier in precedence order:
//!
//! 1. exact identifier match
//! 2. J1939 PGN + source address (`id & 0x3FF_FFFF`)
//! 3. J1939 PGN broadcast (`(id & 0x3FF_FF00) | 0xFE`)
//!
//! The first match wins; a miss is a perfectly normal outcome logged at
//! trace level. Every inbound frame is also published to the frame tap
//! stream before matching, in arrival order.

mod message;
mod scheduler;

pub use message::{DEFAULT_ALIVE_TIMEOUT, MessageSlot, StaticMessage};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::BusConfig;
use crate::dbc::DbcLibrary;
use crate::device::TransportDevice;
use crate::error::{HarnessError, Result};
use crate::types::{CanFrame, Timestamp, id};

/// A received frame as published on the bus tap stream.
#[derive(Debug, Clone, Copy)]
pub struct TappedFrame {
    /// When the frame entered the process.
    pub at: Timestamp,
    /// The frame itself.
    pub frame: CanFrame,
}

/// Outcome of one outbound fan-out.
///
/// Device failures are counted here (and on the bus counters), never
/// propagated as errors: the frame still went to every other device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Number of devices the frame was offered to.
    pub devices: usize,
    /// Number of devices that failed to transmit it.
    pub failures: usize,
}

/// Snapshot of the bus traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusCounters {
    /// Frames handed to the fan-out path.
    pub sent: u64,
    /// Per-device transmit failures.
    pub send_errors: u64,
    /// Inbound frames processed.
    pub received: u64,
    /// Inbound frames that matched a registration.
    pub decoded: u64,
}

pub(crate) struct BusShared {
    recv: Mutex<HashMap<u32, Arc<MessageSlot>>>,
    send: Mutex<HashMap<u32, Arc<MessageSlot>>>,
    devices: Mutex<Vec<(u64, Arc<dyn TransportDevice>)>>,
    next_device_id: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
    received: AtomicU64,
    decoded: AtomicU64,
    tap: broadcast::Sender<TappedFrame>,
    config: BusConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusShared {
    fn new(config: BusConfig) -> Arc<Self> {
        let (tap, _) = broadcast::channel(256);
        Arc::new(Self {
            recv: Mutex::new(HashMap::new()),
            send: Mutex::new(HashMap::new()),
            devices: Mutex::new(Vec::new()),
            next_device_id: AtomicU64::new(1),
            sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            received: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
            tap,
            config,
        })
    }

    /// Inbound dispatch: publish to the tap, then match in precedence order.
    fn process_receive(&self, at: Timestamp, frame: &CanFrame) -> bool {
        self.received.fetch_add(1, Ordering::Relaxed);

        if self.config.log_recv_frames {
            debug!("bus received frame {frame:?}");
        }

        // Publish before matching so taps observe every frame in arrival
        // order, matched or not. A send error only means nobody subscribed.
        let _ = self.tap.send(TappedFrame { at, frame: *frame });

        let slot = {
            let recv = lock(&self.recv);
            recv.get(&frame.id)
                .or_else(|| recv.get(&id::pgn_with_source(frame.id)))
                .or_else(|| recv.get(&id::pgn_broadcast(frame.id)))
                .cloned()
        };

        match slot {
            Some(slot) => {
                slot.mark_received(at, frame);
                self.decoded.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                trace!("no registration for inbound frame {:#X}", frame.id);
                false
            }
        }
    }

    /// Outbound fan-out in device attach order.
    async fn fan_out(&self, frame: &CanFrame) -> SendReport {
        if self.config.log_send_frames {
            debug!("bus sending frame {frame:?}");
        }

        if self.config.loop_frames {
            self.process_receive(Timestamp::now(), frame);
        }

        let devices: Vec<_> = lock(&self.devices).iter().map(|(_, d)| Arc::clone(d)).collect();

        let mut failures = 0usize;
        for device in &devices {
            if let Err(e) = device.send_frame(frame).await {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                failures += 1;
                debug!("device '{}' transmit failed: {}", device.name(), e);
            }
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        SendReport { devices: devices.len(), failures }
    }

    fn send_slots(&self) -> Vec<Arc<MessageSlot>> {
        lock(&self.send).values().cloned().collect()
    }
}

/// Cloneable, non-owning entry point devices use to inject inbound frames.
///
/// Handles stay valid for the lifetime of the bus that issued them; I/O
/// tasks hold one instead of a reference to the bus itself.
#[derive(Clone)]
pub struct BusHandle {
    shared: Arc<BusShared>,
}

impl BusHandle {
    /// Dispatch one inbound wire frame. Returns whether a registration
    /// matched.
    pub fn process_receive(&self, at: Timestamp, frame: &CanFrame) -> bool {
        self.shared.process_receive(at, frame)
    }

    /// Send a frame through the bus fan-out path.
    pub async fn send_frame(&self, frame: &CanFrame) -> SendReport {
        self.shared.fan_out(frame).await
    }

    /// Subscribe to the received-frame tap.
    pub fn frames(&self) -> impl Stream<Item = TappedFrame> + Send + 'static + use<> {
        frame_stream(&self.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakBusHandle {
        WeakBusHandle { shared: Arc::downgrade(&self.shared) }
    }
}

/// Weak counterpart of [`BusHandle`] for holders that must observe bus
/// teardown instead of keeping the bus alive.
#[derive(Clone)]
pub(crate) struct WeakBusHandle {
    shared: Weak<BusShared>,
}

impl WeakBusHandle {
    pub(crate) fn upgrade(&self) -> Option<BusHandle> {
        self.shared.upgrade().map(|shared| BusHandle { shared })
    }
}

fn frame_stream(shared: &Arc<BusShared>) -> impl Stream<Item = TappedFrame> + Send + 'static + use<> {
    // Lagging subscribers skip ahead; routing itself never blocks on them.
    BroadcastStream::new(shared.tap.subscribe()).filter_map(|item| item.ok())
}

/// CAN bus or network imitation.
///
/// The hosting application owns the bus (and its devices); components hold
/// [`BusHandle`]s and [`MessageSlot`] handles.
pub struct CanBus {
    shared: Arc<BusShared>,
    library: Arc<DbcLibrary>,
    scheduler: Mutex<Option<(CancellationToken, tokio::task::JoinHandle<()>)>>,
}

impl CanBus {
    /// Create a bus over a codec library.
    pub fn new(library: Arc<DbcLibrary>, config: BusConfig) -> Self {
        Self { shared: BusShared::new(config), library, scheduler: Mutex::new(None) }
    }

    /// A cloneable handle for device I/O tasks and transports.
    pub fn handle(&self) -> BusHandle {
        BusHandle { shared: Arc::clone(&self.shared) }
    }

    /// Subscribe to the received-frame tap.
    pub fn frames(&self) -> impl Stream<Item = TappedFrame> + Send + 'static + use<> {
        frame_stream(&self.shared)
    }

    /// Snapshot of the traffic counters.
    pub fn counters(&self) -> BusCounters {
        BusCounters {
            sent: self.shared.sent.load(Ordering::Relaxed),
            send_errors: self.shared.send_errors.load(Ordering::Relaxed),
            received: self.shared.received.load(Ordering::Relaxed),
            decoded: self.shared.decoded.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic sender when configured.
    ///
    /// Idempotent: activating an already-active bus does nothing.
    pub fn activate(&self) {
        if !self.shared.config.periodic_send {
            return;
        }
        let mut scheduler = lock(&self.scheduler);
        if scheduler.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = scheduler::spawn(
            Arc::clone(&self.shared),
            self.shared.config.interval_step(),
            cancel.clone(),
        );
        *scheduler = Some((cancel, task));
        info!("bus periodic sender started ({:?} step)", self.shared.config.interval_step());
    }

    /// Stop the periodic sender and wait for it to finish.
    pub async fn deactivate(&self) {
        let stopped = lock(&self.scheduler).take();
        if let Some((cancel, task)) = stopped {
            cancel.cancel();
            let _ = task.await;
            info!("bus periodic sender stopped");
        }
    }

    /// Whether the periodic sender is running.
    pub fn is_active(&self) -> bool {
        lock(&self.scheduler).is_some()
    }

    // --- registration -----------------------------------------------------

    /// Register a receive message by DBC name.
    ///
    /// `can_id` overrides the codec's wire identifier. Registering the same
    /// message under the same resolved identifier returns the existing slot;
    /// registering a different message there replaces it.
    pub fn register_recv(&self, name: &str, can_id: Option<u32>) -> Result<Arc<MessageSlot>> {
        let codec = self.lookup(name)?;
        let resolved = can_id.unwrap_or_else(|| codec.wire_id());
        Ok(Self::insert_dynamic(&self.shared.recv, resolved, codec))
    }

    /// Register a send message by DBC name.
    pub fn register_send(&self, name: &str, can_id: Option<u32>) -> Result<Arc<MessageSlot>> {
        let codec = self.lookup(name)?;
        let resolved = can_id.unwrap_or_else(|| codec.wire_id());
        Ok(Self::insert_dynamic(&self.shared.send, resolved, codec))
    }

    /// Register a J1939 receive message: the codec's PGN with the given
    /// source address.
    pub fn register_recv_j1939(&self, name: &str, source_address: u8) -> Result<Arc<MessageSlot>> {
        let codec = self.lookup(name)?;
        let resolved = id::j1939_id(codec.wire_id(), source_address);
        Ok(Self::insert_dynamic(&self.shared.recv, resolved, codec))
    }

    /// Register a J1939 send message: the codec's PGN with the given source
    /// address.
    pub fn register_send_j1939(&self, name: &str, source_address: u8) -> Result<Arc<MessageSlot>> {
        let codec = self.lookup(name)?;
        let resolved = id::j1939_id(codec.wire_id(), source_address);
        Ok(Self::insert_dynamic(&self.shared.send, resolved, codec))
    }

    /// Register a receive message backed by a static codec.
    pub fn register_recv_static(
        &self,
        message: Box<dyn StaticMessage>,
        can_id: Option<u32>,
    ) -> Arc<MessageSlot> {
        let resolved = can_id.unwrap_or_else(|| message.wire_id());
        let slot = MessageSlot::fixed(resolved, message);
        lock(&self.shared.recv).insert(resolved, Arc::clone(&slot));
        slot
    }

    /// Register a send message backed by a static codec.
    pub fn register_send_static(
        &self,
        message: Box<dyn StaticMessage>,
        can_id: Option<u32>,
    ) -> Arc<MessageSlot> {
        let resolved = can_id.unwrap_or_else(|| message.wire_id());
        let slot = MessageSlot::fixed(resolved, message);
        lock(&self.shared.send).insert(resolved, Arc::clone(&slot));
        slot
    }

    /// Remove a receive registration. This is the only deletion path.
    pub fn unregister_recv(&self, can_id: u32) {
        lock(&self.shared.recv).remove(&can_id);
    }

    /// Remove a send registration.
    pub fn unregister_send(&self, can_id: u32) {
        lock(&self.shared.send).remove(&can_id);
    }

    fn lookup(&self, name: &str) -> Result<Arc<crate::dbc::MessageCodec>> {
        self.library
            .find(name)
            .ok_or_else(|| HarnessError::MessageNotFound { message: name.to_string() })
    }

    fn insert_dynamic(
        registry: &Mutex<HashMap<u32, Arc<MessageSlot>>>,
        resolved: u32,
        codec: Arc<crate::dbc::MessageCodec>,
    ) -> Arc<MessageSlot> {
        let mut registry = lock(registry);
        if let Some(existing) = registry.get(&resolved) {
            // Accidental double registration of the same message is
            // idempotent; a different message under the same identifier
            // replaces it below.
            if existing.name() == codec.name() && existing.codec().is_some() {
                return Arc::clone(existing);
            }
        }
        let slot = MessageSlot::dynamic(resolved, codec);
        registry.insert(resolved, Arc::clone(&slot));
        slot
    }

    // --- traffic ----------------------------------------------------------

    /// Dispatch one inbound frame (see module docs for matching precedence).
    pub fn process_receive(&self, at: Timestamp, frame: &CanFrame) -> bool {
        self.shared.process_receive(at, frame)
    }

    /// Send a frame: loop back when configured, then fan out to every
    /// attached device in attach order.
    pub async fn send_frame(&self, frame: &CanFrame) -> SendReport {
        self.shared.fan_out(frame).await
    }

    // --- devices ----------------------------------------------------------

    /// Attach a transport device. Returns a token for [`detach_device`].
    ///
    /// [`detach_device`]: Self::detach_device
    pub fn attach_device(&self, device: Arc<dyn TransportDevice>) -> u64 {
        let token = self.shared.next_device_id.fetch_add(1, Ordering::Relaxed);
        debug!("device '{}' attached to bus", device.name());
        lock(&self.shared.devices).push((token, device));
        token
    }

    /// Detach a previously attached device.
    pub fn detach_device(&self, token: u64) -> bool {
        let mut devices = lock(&self.shared.devices);
        let before = devices.len();
        devices.retain(|(t, _)| *t != token);
        before != devices.len()
    }

    /// Number of attached devices.
    pub fn device_count(&self) -> usize {
        lock(&self.shared.devices).len()
    }
}

impl Drop for CanBus {
    fn drop(&mut self) {
        // Best effort: the task notices cancellation even though nobody
        // awaits it here.
        if let Some((cancel, _)) = lock(&self.scheduler).take() {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for CanBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanBus")
            .field("counters", &self.counters())
            .field("devices", &self.device_count())
            .field("active", &self.is_active())
            .finish()
    }
}
