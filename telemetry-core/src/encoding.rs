//! Fixed-layout message encoding.
//!
//! A [`Layout`] is an ordered list of slots `(field, repeat, width)`. Encoding
//! writes each field as a big-endian integer of exactly `width` bytes, repeated
//! `repeat` times, in slot order. The output length depends only on the
//! layout, never on the magnitude of the values: a value that does not fit its
//! width is an [`EncodingError::Overflow`], not a wider field.
//!
//! Free-form text (the accumulated distance log) goes through
//! [`MessageEncoder::digest_text`] instead and is signed as its 64-byte
//! SHA-512 digest.

use crate::distance::TripState;
use crate::types::VehicleClass;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Decimal places kept for coordinates.
pub const COORDINATE_DECIMALS: i32 = 7;

const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Widest slot supported (one `u64`).
pub const MAX_SLOT_WIDTH: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("Value {value} of field {field} does not fit in {width} bytes")]
    Overflow { field: FieldId, width: u8, value: u64 },

    #[error("Missing field: {0}")]
    MissingField(FieldId),

    #[error("Field {0} is out of range")]
    OutOfRange(FieldId),

    #[error("Invalid slot for {field}: width {width}, repeat {repeat}")]
    InvalidSlot { field: FieldId, width: u8, repeat: u8 },

    #[error("Message length mismatch: layout expects {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Repeated copies of field {0} disagree")]
    InconsistentRepeat(FieldId),
}

/// Integer-valued telemetry fields a layout can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    OriginLatitude,
    OriginLongitude,
    Latitude,
    Longitude,
    Distance,
    VehicleCode,
    Timestamp,
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldId::OriginLatitude => "origin_latitude",
            FieldId::OriginLongitude => "origin_longitude",
            FieldId::Latitude => "latitude",
            FieldId::Longitude => "longitude",
            FieldId::Distance => "distance",
            FieldId::VehicleCode => "vehicle_code",
            FieldId::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Shift latitude from `[-90, 90]` to `[0, 180]` and keep 7 decimals.
pub fn encode_latitude(latitude: f64) -> Result<u64, EncodingError> {
    encode_coordinate(latitude, 90.0, FieldId::Latitude)
}

/// Shift longitude from `[-180, 180]` to `[0, 360]` and keep 7 decimals.
pub fn encode_longitude(longitude: f64) -> Result<u64, EncodingError> {
    encode_coordinate(longitude, 180.0, FieldId::Longitude)
}

pub fn decode_latitude(value: u64) -> f64 {
    value as f64 / COORDINATE_SCALE - 90.0
}

pub fn decode_longitude(value: u64) -> f64 {
    value as f64 / COORDINATE_SCALE - 180.0
}

fn encode_coordinate(degrees: f64, bound: f64, field: FieldId) -> Result<u64, EncodingError> {
    if !degrees.is_finite() || degrees < -bound || degrees > bound {
        return Err(EncodingError::OutOfRange(field));
    }
    Ok(((degrees + bound) * COORDINATE_SCALE).round() as u64)
}

/// Values for the fields of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryFields {
    values: BTreeMap<FieldId, u64>,
}

impl TelemetryFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: FieldId, value: u64) -> &mut Self {
        self.values.insert(field, value);
        self
    }

    pub fn get(&self, field: FieldId) -> Option<u64> {
        self.values.get(&field).copied()
    }

    /// Fields of a trip: origin and current fix, total distance, vehicle, time.
    pub fn from_trip(trip: &TripState, vehicle: VehicleClass) -> Result<Self, EncodingError> {
        let origin_latitude = encode_latitude(trip.origin.latitude)
            .map_err(|_| EncodingError::OutOfRange(FieldId::OriginLatitude))?;
        let origin_longitude = encode_longitude(trip.origin.longitude)
            .map_err(|_| EncodingError::OutOfRange(FieldId::OriginLongitude))?;

        let mut fields = Self::new();
        fields
            .set(FieldId::OriginLatitude, origin_latitude)
            .set(FieldId::OriginLongitude, origin_longitude)
            .set(FieldId::Latitude, encode_latitude(trip.current.latitude)?)
            .set(FieldId::Longitude, encode_longitude(trip.current.longitude)?)
            .set(FieldId::Distance, trip.distances.total_m())
            .set(FieldId::VehicleCode, vehicle.code());
        // Pre-epoch timestamps stay unset; only layouts that use them fail.
        if let Ok(timestamp) = u64::try_from(trip.current.timestamp) {
            fields.set(FieldId::Timestamp, timestamp);
        }
        Ok(fields)
    }
}

/// One layout slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub field: FieldId,
    pub repeat: u8,
    pub width: u8,
}

impl Slot {
    pub fn new(field: FieldId, repeat: u8, width: u8) -> Self {
        Self { field, repeat, width }
    }

    fn validate(&self) -> Result<(), EncodingError> {
        if self.width == 0 || self.width > MAX_SLOT_WIDTH || self.repeat == 0 {
            return Err(EncodingError::InvalidSlot {
                field: self.field,
                width: self.width,
                repeat: self.repeat,
            });
        }
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        usize::from(self.width) * usize::from(self.repeat)
    }
}

/// Ordered list of slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Slot>", into = "Vec<Slot>")]
pub struct Layout {
    slots: Vec<Slot>,
}

impl TryFrom<Vec<Slot>> for Layout {
    type Error = EncodingError;

    fn try_from(slots: Vec<Slot>) -> Result<Self, Self::Error> {
        Layout::new(slots)
    }
}

impl From<Layout> for Vec<Slot> {
    fn from(layout: Layout) -> Self {
        layout.slots
    }
}

impl Layout {
    pub fn new(slots: Vec<Slot>) -> Result<Self, EncodingError> {
        for slot in &slots {
            slot.validate()?;
        }
        Ok(Self { slots })
    }

    /// The 512-bit circuit input: 16 four-byte words.
    ///
    /// origin lat ×4, origin lon ×4, lat ×4, lon ×3, vehicle ×1
    pub fn trip() -> Self {
        Self {
            slots: vec![
                Slot::new(FieldId::OriginLatitude, 4, 4),
                Slot::new(FieldId::OriginLongitude, 4, 4),
                Slot::new(FieldId::Latitude, 4, 4),
                Slot::new(FieldId::Longitude, 3, 4),
                Slot::new(FieldId::VehicleCode, 1, 4),
            ],
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        self.slots.iter().map(Slot::encoded_len).sum()
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::trip()
    }
}

/// Bytes handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    bytes: Vec<u8>,
    preimage: Option<String>,
}

impl EncodedMessage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, preimage: None }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Text that was hashed to produce this message (digest mode only).
    pub fn preimage(&self) -> Option<&str> {
        self.preimage.as_deref()
    }
}

/// Encoder bound to one layout.
#[derive(Debug, Clone, Default)]
pub struct MessageEncoder {
    layout: Layout,
}

impl MessageEncoder {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn encode(&self, fields: &TelemetryFields) -> Result<EncodedMessage, EncodingError> {
        let mut bytes = Vec::with_capacity(self.layout.encoded_len());
        for slot in &self.layout.slots {
            slot.validate()?;
            let value = fields
                .get(slot.field)
                .ok_or(EncodingError::MissingField(slot.field))?;
            let word = fixed_width_be(value, slot.width).ok_or(EncodingError::Overflow {
                field: slot.field,
                width: slot.width,
                value,
            })?;
            for _ in 0..slot.repeat {
                bytes.extend_from_slice(&word);
            }
        }
        Ok(EncodedMessage::from_bytes(bytes))
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(&self, message: &[u8]) -> Result<TelemetryFields, EncodingError> {
        let expected = self.layout.encoded_len();
        if message.len() != expected {
            return Err(EncodingError::LengthMismatch {
                expected,
                actual: message.len(),
            });
        }

        let mut fields = TelemetryFields::new();
        let mut offset = 0;
        for slot in &self.layout.slots {
            slot.validate()?;
            let width = usize::from(slot.width);
            let first = read_be(&message[offset..offset + width]);
            for copy in 1..usize::from(slot.repeat) {
                let start = offset + copy * width;
                if read_be(&message[start..start + width]) != first {
                    return Err(EncodingError::InconsistentRepeat(slot.field));
                }
            }
            if let Some(previous) = fields.get(slot.field) {
                if previous != first {
                    return Err(EncodingError::InconsistentRepeat(slot.field));
                }
            }
            fields.set(slot.field, first);
            offset += slot.encoded_len();
        }
        Ok(fields)
    }

    /// SHA-512 of UTF-8 text; the text is kept as the message preimage.
    pub fn digest_text(text: &str) -> EncodedMessage {
        let digest = Sha512::digest(text.as_bytes());
        EncodedMessage {
            bytes: digest.to_vec(),
            preimage: Some(text.to_string()),
        }
    }
}

fn fixed_width_be(value: u64, width: u8) -> Option<Vec<u8>> {
    let width = usize::from(width);
    let full = value.to_be_bytes();
    let spill = full.len() - width;
    if full[..spill].iter().any(|&b| b != 0) {
        return None;
    }
    Some(full[spill..].to_vec())
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::TripState;
    use crate::types::{DeviceId, TelemetrySample};
    use proptest::prelude::*;

    fn sample(lat: f64, lon: f64) -> TelemetrySample {
        TelemetrySample::new(DeviceId("98765".to_string()), lat, lon, 1_717_351_192)
    }

    #[test]
    fn test_trip_layout_is_64_bytes() {
        assert_eq!(Layout::trip().encoded_len(), 64);
    }

    #[test]
    fn test_encode_trip_layout() {
        let trip = TripState::start(sample(47.0, 8.0));
        let fields = TelemetryFields::from_trip(&trip, VehicleClass::Bike).unwrap();
        let message = MessageEncoder::default().encode(&fields).unwrap();

        assert_eq!(message.len(), 64);
        assert_eq!(&message.as_bytes()[..4], &1_370_000_000u32.to_be_bytes());
        assert_eq!(&message.as_bytes()[16..20], &1_880_000_000u32.to_be_bytes());
        assert_eq!(&message.as_bytes()[60..], &1_000_000_001u32.to_be_bytes());
    }

    #[test]
    fn test_small_values_keep_full_width() {
        let layout = Layout::new(vec![Slot::new(FieldId::Distance, 1, 4)]).unwrap();
        let mut fields = TelemetryFields::new();
        fields.set(FieldId::Distance, 1);
        let message = MessageEncoder::new(layout).encode(&fields).unwrap();
        assert_eq!(message.as_bytes(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let layout = Layout::new(vec![Slot::new(FieldId::Distance, 2, 2)]).unwrap();
        let mut fields = TelemetryFields::new();
        fields.set(FieldId::Distance, 65_536);
        let result = MessageEncoder::new(layout).encode(&fields);
        assert_eq!(
            result,
            Err(EncodingError::Overflow {
                field: FieldId::Distance,
                width: 2,
                value: 65_536
            })
        );
    }

    #[test]
    fn test_missing_field() {
        let fields = TelemetryFields::new();
        assert_eq!(
            MessageEncoder::default().encode(&fields),
            Err(EncodingError::MissingField(FieldId::OriginLatitude))
        );
    }

    #[test]
    fn test_invalid_slots() {
        assert!(Layout::new(vec![Slot::new(FieldId::Distance, 1, 0)]).is_err());
        assert!(Layout::new(vec![Slot::new(FieldId::Distance, 1, 9)]).is_err());
        assert!(Layout::new(vec![Slot::new(FieldId::Distance, 0, 4)]).is_err());
    }

    #[test]
    fn test_coordinates_out_of_range() {
        assert_eq!(encode_latitude(90.5), Err(EncodingError::OutOfRange(FieldId::Latitude)));
        assert_eq!(encode_longitude(f64::NAN), Err(EncodingError::OutOfRange(FieldId::Longitude)));
        assert_eq!(encode_latitude(-90.0), Ok(0));
        assert_eq!(encode_longitude(180.0), Ok(3_600_000_000));
    }

    #[test]
    fn test_decode_round_trip() {
        let trip = TripState::start(sample(-33.8688, 151.2093));
        let fields = TelemetryFields::from_trip(&trip, VehicleClass::Car).unwrap();
        let encoder = MessageEncoder::default();
        let message = encoder.encode(&fields).unwrap();
        let decoded = encoder.decode(message.as_bytes()).unwrap();
        assert_eq!(decoded.get(FieldId::VehicleCode), Some(VehicleClass::Car.code()));
        assert_eq!(decoded.get(FieldId::Latitude), fields.get(FieldId::Latitude));
    }

    #[test]
    fn test_decode_detects_tampered_repeat() {
        let trip = TripState::start(sample(47.0, 8.0));
        let fields = TelemetryFields::from_trip(&trip, VehicleClass::Bike).unwrap();
        let encoder = MessageEncoder::default();
        let mut bytes = encoder.encode(&fields).unwrap().as_bytes().to_vec();
        bytes[5] ^= 0x01;
        assert_eq!(
            encoder.decode(&bytes),
            Err(EncodingError::InconsistentRepeat(FieldId::OriginLatitude))
        );
        assert!(matches!(
            encoder.decode(&bytes[..63]),
            Err(EncodingError::LengthMismatch { expected: 64, actual: 63 })
        ));
    }

    #[test]
    fn test_digest_text() {
        let message = MessageEncoder::digest_text("42");
        assert_eq!(message.len(), 64);
        assert_eq!(message.preimage(), Some("42"));
        assert_eq!(message, MessageEncoder::digest_text("42"));
    }

    #[test]
    fn test_layout_from_config() {
        let json = r#"[
            {"field": "latitude", "repeat": 8, "width": 4},
            {"field": "longitude", "repeat": 8, "width": 4}
        ]"#;
        let layout: Layout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.encoded_len(), 64);

        let zero_width = r#"[{"field":"latitude","repeat":1,"width":0}]"#;
        assert!(serde_json::from_str::<Layout>(zero_width).is_err());
    }

    proptest! {
        #[test]
        fn prop_latitude_round_trip(micro in -90_000_000i64..=90_000_000i64) {
            let lat = micro as f64 / 1_000_000.0;
            let decoded = decode_latitude(encode_latitude(lat).unwrap());
            prop_assert!((decoded - lat).abs() < 1e-7);
        }

        #[test]
        fn prop_longitude_round_trip(micro in -180_000_000i64..=180_000_000i64) {
            let lon = micro as f64 / 1_000_000.0;
            let decoded = decode_longitude(encode_longitude(lon).unwrap());
            prop_assert!((decoded - lon).abs() < 1e-7);
        }

        #[test]
        fn prop_encoded_length_is_fixed(value in any::<u32>(), width in 4u8..=8) {
            let layout = Layout::new(vec![Slot::new(FieldId::Distance, 3, width)]).unwrap();
            let mut fields = TelemetryFields::new();
            fields.set(FieldId::Distance, u64::from(value));
            let message = MessageEncoder::new(layout).encode(&fields).unwrap();
            prop_assert_eq!(message.len(), 3 * usize::from(width));
        }

        #[test]
        fn prop_value_beyond_width_overflows(width in 1u8..=7, extra in 0u64..1000) {
            let value = (1u64 << (8 * u32::from(width))) + extra;
            let layout = Layout::new(vec![Slot::new(FieldId::Timestamp, 1, width)]).unwrap();
            let mut fields = TelemetryFields::new();
            fields.set(FieldId::Timestamp, value);
            let result = MessageEncoder::new(layout).encode(&fields);
            let is_overflow = matches!(result, Err(EncodingError::Overflow { .. }));
            prop_assert!(is_overflow);
        }
    }
}
