//! Publishing envelope.
//!
//! ```text
//! Event
//! ├── header { event_type, token, timestamp }
//! └── payload   JSON DevicePayload, as bytes
//! ```
//!
//! The broker-side schema is the protobuf `Event` message (see [`proto`]);
//! canonical CBOR is kept as an alternative container. Either can travel as
//! raw bytes or as lowercase hex for brokers that only carry strings.

use crate::serialization::{from_canonical_cbor, to_canonical_cbor, SerializationError};
use crate::types::DeviceId;
use chrono::{DateTime, Utc};
use prost::Message as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Event type expected by the downstream applet.
pub const DEFAULT_EVENT_TYPE: &str = "DEVICE_DATA";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Protobuf decoding failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Wire schema shared with the broker.
///
/// ```text
/// message Header { string event_type = 1; string token = 2; int64 timestamp = 3; }
/// message Event  { Header header = 1; bytes payload = 2; }
/// ```
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Header {
        #[prost(string, tag = "1")]
        pub event_type: String,
        #[prost(string, tag = "2")]
        pub token: String,
        #[prost(int64, tag = "3")]
        pub timestamp: i64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Event {
        #[prost(message, optional, tag = "1")]
        pub header: Option<Header>,
        #[prost(bytes = "vec", tag = "2")]
        pub payload: Vec<u8>,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub event_type: String,
    pub token: String,
    /// Seconds since Unix epoch
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: EnvelopeHeader,
    #[serde(with = "crate::types::serde_byte_buf")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Encode as the protobuf `Event` message.
    pub fn to_protobuf(&self) -> Vec<u8> {
        proto::Event {
            header: Some(proto::Header {
                event_type: self.header.event_type.clone(),
                token: self.header.token.clone(),
                timestamp: self.header.timestamp,
            }),
            payload: self.payload.clone(),
        }
        .encode_to_vec()
    }

    /// Decode a protobuf `Event`, applying the same checks as [`EnvelopeBuilder::build`].
    pub fn from_protobuf(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let event = proto::Event::decode(bytes)?;
        let header = event.header.ok_or(EnvelopeError::MissingField("header"))?;
        EnvelopeBuilder::new()
            .event_type(header.event_type)
            .token(header.token)
            .timestamp_secs(header.timestamp)
            .payload(event.payload)
            .build()
    }

    /// Serialize to canonical CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, SerializationError> {
        to_canonical_cbor(self)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, SerializationError> {
        from_canonical_cbor(bytes)
    }

    /// Bytes to hand the transport for the given wire encoding.
    pub fn to_wire(&self, encoding: WireEncoding) -> Result<Vec<u8>, EnvelopeError> {
        let bytes = match encoding {
            WireEncoding::Protobuf | WireEncoding::ProtobufHex => self.to_protobuf(),
            WireEncoding::Cbor | WireEncoding::CborHex => self.to_cbor()?,
        };
        if encoding.is_hex() {
            Ok(hex::encode(bytes).into_bytes())
        } else {
            Ok(bytes)
        }
    }

    /// Inverse of [`to_wire`](Self::to_wire).
    pub fn from_wire(wire: &[u8], encoding: WireEncoding) -> Result<Self, EnvelopeError> {
        let bytes = if encoding.is_hex() {
            Cow::Owned(hex::decode(wire)?)
        } else {
            Cow::Borrowed(wire)
        };
        match encoding {
            WireEncoding::Protobuf | WireEncoding::ProtobufHex => Self::from_protobuf(&bytes),
            WireEncoding::Cbor | WireEncoding::CborHex => Ok(Self::from_cbor(&bytes)?),
        }
    }

    /// Decode the JSON payload document.
    pub fn device_payload(&self) -> Result<DevicePayload, EnvelopeError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// How serialized envelopes travel over the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEncoding {
    /// Raw protobuf `Event` bytes, what the broker decodes.
    #[default]
    Protobuf,
    ProtobufHex,
    Cbor,
    CborHex,
}

impl WireEncoding {
    pub fn is_hex(&self) -> bool {
        matches!(self, WireEncoding::ProtobufHex | WireEncoding::CborHex)
    }
}

/// Payload document read by the downstream applet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePayload {
    pub timestamp: String,
    #[serde(rename = "pebbleId")]
    pub pebble_id: String,
    /// Witness tokens, followed by the digest preimage in digest mode.
    pub message: String,
}

impl DevicePayload {
    pub fn new(device_id: &DeviceId, timestamp: i64, tokens: &str, preimage: Option<&str>) -> Self {
        let message = match preimage {
            Some(text) => format!("{} {}", tokens, text),
            None => tokens.to_string(),
        };
        Self {
            timestamp: timestamp.to_string(),
            pebble_id: device_id.to_string(),
            message,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Builder for constructing envelopes.
pub struct EnvelopeBuilder {
    event_type: Option<String>,
    token: Option<String>,
    timestamp: Option<i64>,
    payload: Option<Vec<u8>>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self {
            event_type: None,
            token: None,
            timestamp: None,
            payload: None,
        }
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts.timestamp());
        self
    }

    pub fn timestamp_secs(mut self, secs: i64) -> Self {
        self.timestamp = Some(secs);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn device_payload(self, payload: &DevicePayload) -> Result<Self, EnvelopeError> {
        Ok(self.payload(payload.to_json()?))
    }

    pub fn build(self) -> Result<Envelope, EnvelopeError> {
        let event_type = non_empty(self.event_type, "event_type")?;
        let token = non_empty(self.token, "token")?;
        let timestamp = self.timestamp.ok_or(EnvelopeError::MissingField("timestamp"))?;
        let payload = self.payload.ok_or(EnvelopeError::MissingField("payload"))?;

        Ok(Envelope {
            header: EnvelopeHeader {
                event_type,
                token,
                timestamp,
            },
            payload,
        })
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, EnvelopeError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EnvelopeError::MissingField(field)),
    }
}
