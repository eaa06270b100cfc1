//! Message registrations: the per-identifier slots a bus routes into.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::warn;

use crate::dbc::{MessageCodec, SignalValues};
use crate::error::Result;
use crate::types::{CanFrame, FrameFlags, MAX_FRAME_DATA, Timestamp, id};

/// Default staleness threshold for [`MessageSlot::is_alive`].
pub const DEFAULT_ALIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Caller-supplied codec for messages with a compile-time-known layout.
///
/// Implementations typically wrap a typed payload struct behind interior
/// mutability: `decode` parses inbound frame bytes into it, `encode` renders
/// it into the outbound payload. Both are fallible, but neither failure is
/// fatal to the bus - the slot logs and carries on, because dropping frames
/// would desynchronize the simulated bus state.
pub trait StaticMessage: Send + Sync + 'static {
    /// Message name for logs and lookups.
    fn name(&self) -> &str;

    /// Default wire identifier.
    fn wire_id(&self) -> u32;

    /// Payload length in bytes.
    fn byte_len(&self) -> u8;

    /// Cycle-time hint for periodic transmission.
    fn interval_hint(&self) -> Duration {
        crate::dbc::DEFAULT_INTERVAL
    }

    /// Parse inbound payload bytes.
    fn decode(&self, data: &[u8]) -> Result<()>;

    /// Render the outbound payload; returns the number of bytes written.
    fn encode(&self, data: &mut [u8]) -> Result<u8>;
}

enum SlotCodec {
    Dynamic(Arc<MessageCodec>),
    Static(Box<dyn StaticMessage>),
}

struct FrameState {
    frame: CanFrame,
    received_at: Option<Timestamp>,
    sent_at: Option<Timestamp>,
}

/// One registered message: the identifier it was registered under, its
/// codec, and the last frame seen or staged for sending.
///
/// The bus owns the slot's entry in its registry; callers keep `Arc` handles
/// for reading signals and staging payloads. The frame state is the one
/// piece of data touched from two contexts (application writes, scheduler
/// reads), so it sits behind its own fine-grained lock held only across the
/// copy, never across I/O.
pub struct MessageSlot {
    registered_id: u32,
    codec: SlotCodec,
    state: Mutex<FrameState>,
    alive_timeout: Duration,
}

impl MessageSlot {
    pub(crate) fn dynamic(registered_id: u32, codec: Arc<MessageCodec>) -> Arc<Self> {
        Arc::new(Self {
            registered_id,
            state: Mutex::new(FrameState {
                frame: CanFrame::empty(registered_id),
                received_at: None,
                sent_at: None,
            }),
            codec: SlotCodec::Dynamic(codec),
            alive_timeout: DEFAULT_ALIVE_TIMEOUT,
        })
    }

    pub(crate) fn fixed(registered_id: u32, message: Box<dyn StaticMessage>) -> Arc<Self> {
        Arc::new(Self {
            registered_id,
            state: Mutex::new(FrameState {
                frame: CanFrame::empty(registered_id),
                received_at: None,
                sent_at: None,
            }),
            codec: SlotCodec::Static(message),
            alive_timeout: DEFAULT_ALIVE_TIMEOUT,
        })
    }

    fn state(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Message name.
    pub fn name(&self) -> &str {
        match &self.codec {
            SlotCodec::Dynamic(codec) => codec.name(),
            SlotCodec::Static(message) => message.name(),
        }
    }

    /// The identifier this slot is registered under on its bus.
    pub fn registered_id(&self) -> u32 {
        self.registered_id
    }

    /// The message's default wire identifier from its codec.
    pub fn wire_id(&self) -> u32 {
        match &self.codec {
            SlotCodec::Dynamic(codec) => codec.wire_id(),
            SlotCodec::Static(message) => message.wire_id(),
        }
    }

    /// Payload length in bytes.
    pub fn byte_len(&self) -> u8 {
        match &self.codec {
            SlotCodec::Dynamic(codec) => codec.byte_len(),
            SlotCodec::Static(message) => message.byte_len(),
        }
    }

    /// Cycle-time hint for periodic transmission.
    pub fn interval_hint(&self) -> Duration {
        match &self.codec {
            SlotCodec::Dynamic(codec) => codec.interval_hint(),
            SlotCodec::Static(message) => message.interval_hint(),
        }
    }

    /// The dynamic codec backing this slot, if any.
    pub fn codec(&self) -> Option<&Arc<MessageCodec>> {
        match &self.codec {
            SlotCodec::Dynamic(codec) => Some(codec),
            SlotCodec::Static(_) => None,
        }
    }

    /// Whether a frame was received less than the staleness threshold ago.
    ///
    /// False before the first receive.
    pub fn is_alive(&self, now: Timestamp) -> bool {
        self.state()
            .received_at
            .is_some_and(|at| now.duration_since(at) < self.alive_timeout)
    }

    /// Timestamp of the last received frame.
    pub fn last_received(&self) -> Option<Timestamp> {
        self.state().received_at
    }

    /// Timestamp of the last prepared send.
    pub fn last_sent(&self) -> Option<Timestamp> {
        self.state().sent_at
    }

    /// Copy of the current frame.
    pub fn frame(&self) -> CanFrame {
        self.state().frame
    }

    /// Mutate the staged frame under the slot lock.
    pub fn update_frame<F: FnOnce(&mut CanFrame)>(&self, mutate: F) {
        mutate(&mut self.state().frame);
    }

    /// Encode physical signal values into the staged frame (dynamic slots).
    pub fn set_signals(&self, values: &SignalValues) -> Result<()> {
        match &self.codec {
            SlotCodec::Dynamic(codec) => {
                // Encode outside the lock; the application task is the only
                // writer, so the copy-out/copy-in window is safe.
                let mut data = self.state().frame.data;
                codec.encode(values, &mut data)?;
                self.state().frame.data = data;
                Ok(())
            }
            SlotCodec::Static(message) => Err(crate::error::HarnessError::encode(
                message.name(),
                "slot is backed by a static codec",
            )),
        }
    }

    /// Decode the last frame into physical signal values (dynamic slots).
    pub fn signals(&self) -> Result<SignalValues> {
        match &self.codec {
            SlotCodec::Dynamic(codec) => codec.decode(self.frame().payload()),
            SlotCodec::Static(message) => Err(crate::error::HarnessError::decode(
                message.name(),
                "slot is backed by a static codec",
            )),
        }
    }

    /// Store an inbound frame and run the receive hook.
    ///
    /// Static codecs decode here; a decode failure is logged and the frame
    /// is retained anyway.
    pub(crate) fn mark_received(&self, at: Timestamp, frame: &CanFrame) {
        {
            let mut state = self.state();
            state.frame = *frame;
            state.received_at = Some(at);
        }

        if let SlotCodec::Static(message) = &self.codec {
            if let Err(e) = message.decode(frame.payload()) {
                warn!("static message '{}' decode failed: {}", message.name(), e);
            }
        }
    }

    /// Stamp identifier/length (and render static payloads) on the staged
    /// frame, record the send timestamp, and return a copy for transmission.
    pub(crate) fn prepare_send(&self, now: Timestamp) -> CanFrame {
        let byte_len = self.byte_len();

        if let SlotCodec::Static(message) = &self.codec {
            let mut data = [0u8; MAX_FRAME_DATA];
            match message.encode(&mut data[..usize::from(byte_len)]) {
                Ok(_written) => self.update_frame(|frame| frame.data = data),
                // Send the previously staged payload rather than dropping
                // the frame.
                Err(e) => warn!("static message '{}' encode failed: {}", message.name(), e),
            }
        }

        let mut state = self.state();
        state.frame.id = self.registered_id;
        state.frame.len = byte_len;
        if id::is_extended_value(self.registered_id) {
            state.frame.flags = state.frame.flags.with(FrameFlags::EXTENDED);
        }
        state.sent_at = Some(now);
        state.frame
    }
}

impl std::fmt::Debug for MessageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSlot")
            .field("name", &self.name())
            .field("registered_id", &format_args!("{:#X}", self.registered_id))
            .field("byte_len", &self.byte_len())
            .finish()
    }
}
