//! Signal and message codecs backed by DBC definitions.

use std::collections::HashMap;
use std::time::Duration;

use crate::dbc::layout::SignalLayout;
use crate::error::{HarnessError, Result};
use crate::types::MAX_FRAME_DATA;

/// Default cycle-time hint for messages without a `GenMsgCycleTime`
/// attribute.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Decoded physical signal values, keyed by signal name.
pub type SignalValues = HashMap<String, f64>;

/// Description of one signal's placement and scaling.
///
/// Normally produced from a `can_dbc::Signal`, but constructible directly so
/// codecs can be assembled without a DBC document (tests, generated tables).
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub name: String,
    /// DBC start bit (LSB position for Intel order, MSB for Motorola).
    pub start_bit: u16,
    pub bit_len: u16,
    pub big_endian: bool,
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
}

impl SignalSpec {
    fn from_dbc(signal: &can_dbc::Signal) -> Self {
        Self {
            name: signal.name().clone(),
            start_bit: *signal.start_bit() as u16,
            bit_len: *signal.signal_size() as u16,
            big_endian: matches!(signal.byte_order(), can_dbc::ByteOrder::BigEndian),
            signed: matches!(signal.value_type(), can_dbc::ValueType::Signed),
            factor: *signal.factor(),
            offset: *signal.offset(),
            min: *signal.min(),
            max: *signal.max(),
            unit: signal.unit().clone(),
        }
    }
}

/// One signal's codec: precomputed layout plus scaling.
#[derive(Debug, Clone)]
struct SignalCodec {
    spec: SignalSpec,
    layout: SignalLayout,
}

impl SignalCodec {
    fn new(spec: SignalSpec) -> Self {
        let layout = if spec.big_endian {
            SignalLayout::big_endian(spec.start_bit, spec.bit_len)
        } else {
            SignalLayout::little_endian(spec.start_bit, spec.bit_len)
        };
        Self { spec, layout }
    }

    /// Physical value from payload bytes: extract, sign-extend, scale.
    fn decode(&self, data: &[u8; MAX_FRAME_DATA]) -> f64 {
        let raw = self.layout.extract(data);
        let value = if self.spec.signed {
            let shift = 64 - u32::from(self.spec.bit_len);
            (((raw as i64) << shift) >> shift) as f64
        } else {
            raw as f64
        };
        value * self.spec.factor + self.spec.offset
    }

    /// Pack a physical value: unscale, round, clamp to the raw range.
    fn encode(&self, data: &mut [u8; MAX_FRAME_DATA], physical: f64) {
        let physical = if self.spec.min < self.spec.max {
            physical.clamp(self.spec.min, self.spec.max)
        } else {
            physical
        };
        let unscaled = ((physical - self.spec.offset) / self.spec.factor).round();

        let raw = if self.spec.signed {
            let clamped = if self.spec.bit_len >= 64 {
                unscaled as i64
            } else {
                let half = 1i64 << (self.spec.bit_len - 1);
                (unscaled as i64).clamp(-half, half - 1)
            };
            (clamped as u64) & self.layout.raw_mask()
        } else {
            (unscaled.max(0.0) as u64).min(self.layout.raw_mask())
        };

        self.layout.pack(data, raw);
    }
}

/// Serializer for one DBC message: wire identifier, byte length and the
/// signal pack/unpack table.
///
/// Codecs are immutable after construction and shared by `Arc` between every
/// registration that refers to the same message.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    name: String,
    wire_id: u32,
    byte_len: u8,
    comment: String,
    interval: Duration,
    signals: Vec<SignalCodec>,
}

impl MessageCodec {
    /// Build a codec from explicit parts.
    pub fn new(
        name: impl Into<String>,
        wire_id: u32,
        byte_len: u8,
        comment: impl Into<String>,
        interval: Duration,
        signals: Vec<SignalSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            wire_id,
            byte_len,
            comment: comment.into(),
            interval,
            signals: signals.into_iter().map(SignalCodec::new).collect(),
        }
    }

    /// Build a codec for one message of a parsed DBC document, pulling the
    /// message comment and `GenMsgCycleTime` attribute when present.
    pub(crate) fn from_dbc(message: &can_dbc::Message, dbc: &can_dbc::DBC) -> Self {
        let wire_id = message.message_id().raw();

        let comment = dbc
            .comments()
            .iter()
            .find_map(|comment| match comment {
                can_dbc::Comment::Message { message_id, comment } if message_id.raw() == wire_id => {
                    Some(comment.clone())
                }
                _ => None,
            })
            .unwrap_or_default();

        let interval = message_cycle_time(dbc, wire_id).unwrap_or(DEFAULT_INTERVAL);

        Self::new(
            message.message_name().clone(),
            wire_id,
            (*message.message_size()).min(MAX_FRAME_DATA as u64) as u8,
            comment,
            interval,
            message.signals().iter().map(SignalSpec::from_dbc).collect(),
        )
    }

    /// Message name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire identifier as declared in the DBC document.
    pub fn wire_id(&self) -> u32 {
        self.wire_id
    }

    /// Message length in bytes.
    pub fn byte_len(&self) -> u8 {
        self.byte_len
    }

    /// Message comment (empty when the document has none).
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Cycle-time hint used by periodic transmission.
    pub fn interval_hint(&self) -> Duration {
        self.interval
    }

    /// Names of the signals in this message.
    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.iter().map(|signal| signal.spec.name.as_str())
    }

    /// Decode every signal of a payload into physical values.
    ///
    /// The payload must carry at least the message's declared byte length.
    pub fn decode(&self, payload: &[u8]) -> Result<SignalValues> {
        if payload.len() < usize::from(self.byte_len) {
            return Err(HarnessError::decode(
                &self.name,
                format!("payload is {} bytes, message needs {}", payload.len(), self.byte_len),
            ));
        }

        let mut data = [0u8; MAX_FRAME_DATA];
        data[..payload.len().min(MAX_FRAME_DATA)]
            .copy_from_slice(&payload[..payload.len().min(MAX_FRAME_DATA)]);

        let mut values = SignalValues::with_capacity(self.signals.len());
        for signal in &self.signals {
            values.insert(signal.spec.name.clone(), signal.decode(&data));
        }
        Ok(values)
    }

    /// Encode physical values into a payload buffer.
    ///
    /// Signals absent from `values` keep their current bits in `data`;
    /// values for unknown signal names are an error.
    pub fn encode(&self, values: &SignalValues, data: &mut [u8; MAX_FRAME_DATA]) -> Result<()> {
        for name in values.keys() {
            if !self.signals.iter().any(|signal| signal.spec.name == *name) {
                return Err(HarnessError::SignalNotFound {
                    signal: name.clone(),
                    message: self.name.clone(),
                });
            }
        }

        for signal in &self.signals {
            if let Some(physical) = values.get(&signal.spec.name) {
                signal.encode(data, *physical);
            }
        }
        Ok(())
    }
}

/// Extract the `GenMsgCycleTime` attribute for a message, in milliseconds.
fn message_cycle_time(dbc: &can_dbc::DBC, wire_id: u32) -> Option<Duration> {
    dbc.attribute_values().iter().find_map(|attribute| {
        if attribute.attribute_name().as_str() != "GenMsgCycleTime" {
            return None;
        }
        match attribute.attribute_value() {
            can_dbc::AttributeValuedForObjectType::MessageDefinitionAttributeValue(
                message_id,
                Some(value),
            ) if message_id.raw() == wire_id => attribute_millis(value),
            _ => None,
        }
    })
}

fn attribute_millis(value: &can_dbc::AttributeValue) -> Option<Duration> {
    let millis = match value {
        can_dbc::AttributeValue::AttributeValueU64(v) => *v as f64,
        can_dbc::AttributeValue::AttributeValueI64(v) => *v as f64,
        can_dbc::AttributeValue::AttributeValueF64(v) => *v,
        can_dbc::AttributeValue::AttributeValueCharString(_) => return None,
    };
    (millis > 0.0).then(|| Duration::from_secs_f64(millis / 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engine_codec() -> MessageCodec {
        MessageCodec::new(
            "EngineData",
            0x1F0,
            8,
            "engine state",
            Duration::from_millis(100),
            vec![
                SignalSpec {
                    name: "Temperature".into(),
                    start_bit: 0,
                    bit_len: 12,
                    big_endian: true,
                    signed: true,
                    factor: 0.01,
                    offset: 250.0,
                    min: 229.52,
                    max: 270.47,
                    unit: "degK".into(),
                },
                SignalSpec {
                    name: "Rpm".into(),
                    start_bit: 24,
                    bit_len: 16,
                    big_endian: false,
                    signed: false,
                    factor: 0.125,
                    offset: 0.0,
                    min: 0.0,
                    max: 8000.0,
                    unit: "rpm".into(),
                },
                SignalSpec {
                    name: "Enable".into(),
                    start_bit: 7,
                    bit_len: 1,
                    big_endian: true,
                    signed: false,
                    factor: 1.0,
                    offset: 0.0,
                    min: 0.0,
                    max: 1.0,
                    unit: String::new(),
                },
            ],
        )
    }

    #[test]
    fn encode_then_decode_recovers_values() {
        let codec = engine_codec();
        let mut values = SignalValues::new();
        values.insert("Temperature".into(), 244.14);
        values.insert("Rpm".into(), 1450.5);
        values.insert("Enable".into(), 1.0);

        let mut data = [0u8; MAX_FRAME_DATA];
        codec.encode(&values, &mut data).unwrap();
        let decoded = codec.decode(&data).unwrap();

        assert!((decoded["Temperature"] - 244.14).abs() < 0.005);
        assert!((decoded["Rpm"] - 1450.5).abs() < 0.0625);
        assert_eq!(decoded["Enable"], 1.0);
    }

    #[test]
    fn signed_signal_round_trips_negative_values() {
        let codec = engine_codec();
        let mut values = SignalValues::new();
        // 244.14 degK is raw -586 in the 12-bit two's complement encoding.
        values.insert("Temperature".into(), 244.14);

        let mut data = [0u8; MAX_FRAME_DATA];
        codec.encode(&values, &mut data).unwrap();
        // MSB of the signed raw value lands in byte 0 bit 0.
        assert_eq!(data[0] & 0x01, 0x01);
        assert_eq!(data[1], 0xB6);
    }

    #[test]
    fn encode_rejects_unknown_signal() {
        let codec = engine_codec();
        let mut values = SignalValues::new();
        values.insert("Boost".into(), 1.0);

        let mut data = [0u8; MAX_FRAME_DATA];
        let err = codec.encode(&values, &mut data).unwrap_err();
        assert!(matches!(err, HarnessError::SignalNotFound { .. }));
    }

    #[test]
    fn encode_clamps_to_physical_range() {
        let codec = engine_codec();
        let mut values = SignalValues::new();
        values.insert("Rpm".into(), 20_000.0);

        let mut data = [0u8; MAX_FRAME_DATA];
        codec.encode(&values, &mut data).unwrap();
        let decoded = codec.decode(&data).unwrap();
        assert!((decoded["Rpm"] - 8000.0).abs() < 0.0625);
    }

    #[test]
    fn decode_rejects_short_payload() {
        let codec = engine_codec();
        let err = codec.decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, HarnessError::Decode { .. }));
    }

    #[test]
    fn partial_encode_leaves_other_signals_untouched() {
        let codec = engine_codec();
        let mut data = [0u8; MAX_FRAME_DATA];

        let mut first = SignalValues::new();
        first.insert("Rpm".into(), 3000.0);
        codec.encode(&first, &mut data).unwrap();

        let mut second = SignalValues::new();
        second.insert("Enable".into(), 1.0);
        codec.encode(&second, &mut data).unwrap();

        let decoded = codec.decode(&data).unwrap();
        assert!((decoded["Rpm"] - 3000.0).abs() < 0.0625);
        assert_eq!(decoded["Enable"], 1.0);
    }

    proptest! {
        #[test]
        fn prop_unsigned_round_trip_within_half_factor(rpm in 0.0f64..8000.0) {
            let codec = engine_codec();
            let mut values = SignalValues::new();
            values.insert("Rpm".into(), rpm);

            let mut data = [0u8; MAX_FRAME_DATA];
            codec.encode(&values, &mut data).unwrap();
            let decoded = codec.decode(&data).unwrap();
            prop_assert!((decoded["Rpm"] - rpm).abs() <= 0.125 / 2.0 + f64::EPSILON);
        }

        #[test]
        fn prop_signed_round_trip_within_half_factor(temp in 229.52f64..270.47) {
            let codec = engine_codec();
            let mut values = SignalValues::new();
            values.insert("Temperature".into(), temp);

            let mut data = [0u8; MAX_FRAME_DATA];
            codec.encode(&values, &mut data).unwrap();
            let decoded = codec.decode(&data).unwrap();
            prop_assert!((decoded["Temperature"] - temp).abs() <= 0.01 / 2.0 + 1e-9);
        }
    }
}
