//! # Telemetry Core
//!
//! Signed location attestations that a ZoKrates EdDSA circuit can verify.
//!
//! ## Key Features
//! - **Baby Jubjub EdDSA**: deterministic signatures over the BN254 scalar field
//! - **Fixed-layout encoding**: every field at a declared width, 512-bit messages
//! - **Witness formatting**: the 21-token line the ZoKrates CLI consumes
//! - **Envelopes**: canonical CBOR container with a JSON payload document

pub mod attestation;
pub mod crypto;
pub mod curve;
pub mod distance;
pub mod encoding;
pub mod envelope;
pub mod field;
pub mod keys;
pub mod serialization;
pub mod types;
pub mod witness;

pub use attestation::{AttestError, AttestationMode, Attestor, AttestorSettings, SignedAttestation};
pub use crypto::{sign, verify, verify_strict, Signature, SignatureError, Signer};
pub use curve::{CurveError, CurvePoint};
pub use distance::{haversine_m, DistanceLog, TripState};
pub use encoding::{
    EncodedMessage, EncodingError, FieldId, Layout, MessageEncoder, Slot, TelemetryFields,
};
pub use envelope::{
    DevicePayload, Envelope, EnvelopeBuilder, EnvelopeError, EnvelopeHeader, WireEncoding,
    DEFAULT_EVENT_TYPE,
};
pub use field::{FieldElement, FieldError, Scalar};
pub use keys::{
    derive_public_key, FixedSeed, KeyError, KeyPair, KeyProvider, KeySource, SecureRandom,
};
pub use types::*;
pub use witness::{FormatError, WitnessBatch, WitnessTokens};
