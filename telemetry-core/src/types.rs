//! Core types shared across the attestation pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier (the `pebbleId` of the downstream applet).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle category carried in the signed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Bike,
    EScooter,
    Scooter,
    Car,
}

impl VehicleClass {
    /// Numeric code encoded into the message.
    pub fn code(&self) -> u64 {
        match self {
            VehicleClass::Bike => 1_000_000_001,
            VehicleClass::EScooter => 1_000_000_002,
            VehicleClass::Scooter => 1_000_000_003,
            VehicleClass::Car => 1_000_000_004,
        }
    }

    /// Short class number, `1..=4`, appended to the distance report.
    pub fn ordinal(&self) -> u8 {
        match self {
            VehicleClass::Bike => 1,
            VehicleClass::EScooter => 2,
            VehicleClass::Scooter => 3,
            VehicleClass::Car => 4,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1_000_000_001 => Some(VehicleClass::Bike),
            1_000_000_002 => Some(VehicleClass::EScooter),
            1_000_000_003 => Some(VehicleClass::Scooter),
            1_000_000_004 => Some(VehicleClass::Car),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleClass::Bike => write!(f, "Bike"),
            VehicleClass::EScooter => write!(f, "E-Scooter"),
            VehicleClass::Scooter => write!(f, "Scooter"),
            VehicleClass::Car => write!(f, "Car"),
        }
    }
}

/// One telemetry reading, produced once per sampling interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Degrees, `[-90, 90]`
    pub latitude: f64,
    /// Degrees, `[-180, 180]`
    pub longitude: f64,
    /// Metres above sea level, if the receiver reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Seconds since Unix epoch (UTC)
    pub timestamp: i64,
    pub device_id: DeviceId,
}

impl TelemetrySample {
    pub fn new(device_id: DeviceId, latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            timestamp,
            device_id,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
}

/// Serde support for byte buffers: written as a CBOR byte string rather
/// than an array of integers, and read back from either form.
pub(crate) mod serde_byte_buf {
    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct ByteBufVisitor;

        impl<'de> Visitor<'de> for ByteBufVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(ByteBufVisitor)
    }
}
