//! Key material: public key derivation and pluggable key providers.
//!
//! A [`KeyPair`] is created once per signing session from a [`KeyProvider`].
//! Two providers exist: [`FixedSeed`] for reproducible runs and regression
//! fixtures, and [`SecureRandom`] for production devices. Private scalars are
//! never serialized and are redacted from `Debug` output.

use crate::curve::CurvePoint;
use crate::field::{FieldError, Scalar};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("Invalid key encoding: {0}")]
    Encoding(#[from] FieldError),
}

/// Derive the public point `A = k·G`.
pub fn derive_public_key(private: &Scalar) -> Result<CurvePoint, KeyError> {
    if private.is_zero() {
        return Err(KeyError::InvalidKey("private scalar is zero"));
    }
    Ok(CurvePoint::mul_generator(private))
}

/// Private scalar and its public point.
#[derive(Clone)]
pub struct KeyPair {
    private: Scalar,
    public: CurvePoint,
}

impl KeyPair {
    pub fn from_scalar(private: Scalar) -> Result<Self, KeyError> {
        let public = derive_public_key(&private)?;
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> CurvePoint {
        self.public
    }

    pub(crate) fn private_scalar(&self) -> &Scalar {
        &self.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Source of private key material.
pub trait KeyProvider: Send + Sync {
    /// Short provider name for logs (never the key itself).
    fn name(&self) -> &str;

    /// Produce a private scalar in `[1, L)`.
    fn private_scalar(&self) -> Result<Scalar, KeyError>;

    fn key_pair(&self) -> Result<KeyPair, KeyError> {
        KeyPair::from_scalar(self.private_scalar()?)
    }
}

/// Deterministic provider returning the same scalar every time.
pub struct FixedSeed {
    seed: Scalar,
}

impl FixedSeed {
    pub fn new(seed: Scalar) -> Result<Self, KeyError> {
        if seed.is_zero() {
            return Err(KeyError::InvalidKey("seed is zero"));
        }
        Ok(Self { seed })
    }

    /// Parse a decimal seed; values `>= L` are rejected, not reduced.
    pub fn from_decimal(seed: &str) -> Result<Self, KeyError> {
        Self::new(Scalar::from_decimal(seed)?)
    }
}

impl KeyProvider for FixedSeed {
    fn name(&self) -> &str {
        "fixed-seed"
    }

    fn private_scalar(&self) -> Result<Scalar, KeyError> {
        Ok(self.seed)
    }
}

/// Provider drawing from the operating system's CSPRNG.
///
/// 64 random bytes are reduced modulo `L`, which keeps the bias negligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecureRandom;

impl KeyProvider for SecureRandom {
    fn name(&self) -> &str {
        "secure-random"
    }

    fn private_scalar(&self) -> Result<Scalar, KeyError> {
        loop {
            let mut wide = [0u8; 64];
            OsRng.fill_bytes(&mut wide);
            let scalar = Scalar::from_be_bytes_mod_order(&wide);
            if !scalar.is_zero() {
                return Ok(scalar);
            }
        }
    }
}

/// Configuration form of a key provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeySource {
    FixedSeed { seed: String },
    SecureRandom,
}

impl KeySource {
    pub fn provider(&self) -> Result<Box<dyn KeyProvider>, KeyError> {
        match self {
            KeySource::FixedSeed { seed } => Ok(Box::new(FixedSeed::from_decimal(seed)?)),
            KeySource::SecureRandom => Ok(Box::new(SecureRandom)),
        }
    }
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::SecureRandom
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::FixedSeed { .. } => f.write_str("FixedSeed { .. }"),
            KeySource::SecureRandom => f.write_str("SecureRandom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const SEED: &str =
        "1997011358982923168928344992199991480689546837621580239342656433234255379025";

    #[test]
    fn test_known_public_key() {
        let keys = FixedSeed::from_decimal(SEED).unwrap().key_pair().unwrap();
        let public = keys.public_key();
        assert_eq!(
            public.x().to_decimal(),
            "14897476871502190904409029696666322856887678969656209656241038339251270171395"
        );
        assert_eq!(
            public.y().to_decimal(),
            "16668832459046858928951622951481252834155254151733002984053501254009901876174"
        );
    }

    #[test]
    fn test_fixed_and_variable_base_agree() {
        let seed = Scalar::from_decimal(SEED).unwrap();
        let fixed = derive_public_key(&seed).unwrap();
        assert_eq!(fixed, CurvePoint::generator().mul(&seed));
    }

    #[test]
    fn test_zero_key_rejected() {
        assert_eq!(
            derive_public_key(&Scalar::zero()),
            Err(KeyError::InvalidKey("private scalar is zero"))
        );
        assert!(FixedSeed::from_decimal("0").is_err());
    }

    #[test]
    fn test_seed_out_of_range_rejected() {
        let result = FixedSeed::from_decimal(crate::field::SUBGROUP_ORDER);
        assert!(matches!(result, Err(KeyError::Encoding(FieldError::NotCanonical(_)))));
    }

    #[test]
    fn test_secure_random_keys_differ() {
        let a = SecureRandom.key_pair().unwrap();
        let b = SecureRandom.key_pair().unwrap();
        assert_ne!(a.public_key(), b.public_key());
        assert!(a.public_key().is_in_prime_subgroup());
    }

    #[test]
    fn test_debug_redacts_private_scalar() {
        let keys = FixedSeed::from_decimal(SEED).unwrap().key_pair().unwrap();
        let rendered = format!("{:?}", keys);
        assert!(!rendered.contains(SEED));
        let source = KeySource::FixedSeed { seed: SEED.to_string() };
        assert!(!format!("{:?}", source).contains(SEED));
    }

    #[test]
    fn test_key_source_config() {
        let source: KeySource =
            serde_json::from_str(&format!(r#"{{"kind":"fixed_seed","seed":"{}"}}"#, SEED)).unwrap();
        assert_eq!(source.provider().unwrap().name(), "fixed-seed");
        let random: KeySource = serde_json::from_str(r#"{"kind":"secure_random"}"#).unwrap();
        assert_eq!(random.provider().unwrap().name(), "secure-random");
    }
}
