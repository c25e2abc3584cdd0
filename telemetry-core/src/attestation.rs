//! Per-cycle attestation: encode the trip, sign it, render the witness and
//! wrap it in an envelope.
//!
//! Each publish cycle builds its own [`Attestor`]; the key pair is shared
//! across cycles but the signing context is not.

use crate::crypto::{self, Signature, SignatureError, Signer};
use crate::curve::CurvePoint;
use crate::distance::TripState;
use crate::encoding::{EncodedMessage, EncodingError, MessageEncoder, TelemetryFields};
use crate::envelope::{DevicePayload, Envelope, EnvelopeBuilder, EnvelopeError, DEFAULT_EVENT_TYPE};
use crate::keys::KeyPair;
use crate::types::VehicleClass;
use crate::witness::{FormatError, WitnessTokens};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("Encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Witness formatting failed: {0}")]
    Format(#[from] FormatError),

    #[error("Envelope construction failed: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Signature check failed: {0}")]
    Signature(#[from] SignatureError),
}

/// What gets signed each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationMode {
    /// Current and origin position laid out per the encoder's layout.
    #[default]
    Layout,
    /// SHA-512 of the accumulated segment distances and vehicle number.
    DistanceDigest,
}

/// A signed message ready for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedAttestation {
    pub message: EncodedMessage,
    pub signature: Signature,
    pub public_key: CurvePoint,
    pub tokens: WitnessTokens,
}

impl SignedAttestation {
    pub fn verify(&self) -> Result<(), SignatureError> {
        crypto::verify_strict(&self.public_key, &self.signature, self.message.as_bytes())
    }
}

/// Header values and mode shared by every attestor of a session.
#[derive(Debug, Clone)]
pub struct AttestorSettings {
    pub mode: AttestationMode,
    pub vehicle: VehicleClass,
    pub event_type: String,
    pub auth_token: String,
}

impl AttestorSettings {
    pub fn new(vehicle: VehicleClass, auth_token: impl Into<String>) -> Self {
        Self {
            mode: AttestationMode::Layout,
            vehicle,
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            auth_token: auth_token.into(),
        }
    }
}

pub struct Attestor {
    signer: Signer,
    encoder: MessageEncoder,
    settings: AttestorSettings,
}

impl Attestor {
    pub fn new(keys: KeyPair, encoder: MessageEncoder, settings: AttestorSettings) -> Self {
        Self {
            signer: Signer::new(keys),
            encoder,
            settings,
        }
    }

    pub fn public_key(&self) -> CurvePoint {
        self.signer.public_key()
    }

    pub fn encode(&self, trip: &TripState) -> Result<EncodedMessage, AttestError> {
        match self.settings.mode {
            AttestationMode::Layout => {
                let fields = TelemetryFields::from_trip(trip, self.settings.vehicle)?;
                Ok(self.encoder.encode(&fields)?)
            }
            AttestationMode::DistanceDigest => {
                let preimage = trip.distances.preimage(self.settings.vehicle);
                Ok(MessageEncoder::digest_text(&preimage))
            }
        }
    }

    pub fn attest(&self, trip: &TripState) -> Result<SignedAttestation, AttestError> {
        let message = self.encode(trip)?;
        let signature = self.signer.sign(message.as_bytes());
        let public_key = self.signer.public_key();
        let tokens = WitnessTokens::format(&signature, &public_key, message.as_bytes())?;
        Ok(SignedAttestation {
            message,
            signature,
            public_key,
            tokens,
        })
    }

    pub fn payload(&self, attestation: &SignedAttestation, trip: &TripState) -> DevicePayload {
        DevicePayload::new(
            &trip.current.device_id,
            trip.current.timestamp,
            &attestation.tokens.to_string(),
            attestation.message.preimage(),
        )
    }

    /// Attest the trip and wrap it in an envelope stamped `issued_at`.
    pub fn envelope(
        &self,
        trip: &TripState,
        issued_at: DateTime<Utc>,
    ) -> Result<Envelope, AttestError> {
        let attestation = self.attest(trip)?;
        let payload = self.payload(&attestation, trip);
        let envelope = EnvelopeBuilder::new()
            .event_type(self.settings.event_type.as_str())
            .token(self.settings.auth_token.as_str())
            .timestamp(issued_at)
            .device_payload(&payload)?
            .build()?;
        Ok(envelope)
    }
}
