//! Prime field arithmetic for the Baby Jubjub curve.
//!
//! Two moduli are in play:
//! - the base field `p` (the BN254 scalar field, i.e. the native field of the
//!   ZoKrates circuit) for point coordinates, see [`FieldElement`];
//! - the prime subgroup order `L` for private keys, nonces and the signature
//!   scalar `S`, see [`Scalar`].
//!
//! Both types are always reduced. Constructors that take raw integers are
//! strict: they reject anything `>= modulus` instead of silently reducing.
//! Explicit reduction is available where the algorithm calls for it
//! ([`Scalar::from_be_bytes_mod_order`]).

use ark_ff::{BigInteger, Field, One, PrimeField, Zero};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Decimal rendering of the base field modulus `p`.
pub const BASE_FIELD_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Decimal rendering of the prime subgroup order `L`.
pub const SUBGROUP_ORDER: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

/// Errors raised when constructing field values from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("Invalid decimal integer (length {0})")]
    InvalidDecimal(usize),

    #[error("Value is not below the {0} modulus")]
    NotCanonical(&'static str),
}

macro_rules! prime_field_newtype {
    ($name:ident, $inner:ty, $label:literal) => {
        impl $name {
            pub fn zero() -> Self {
                Self(<$inner>::zero())
            }

            pub fn one() -> Self {
                Self(<$inner>::one())
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            /// Parse a 32-byte big-endian integer, rejecting values `>= modulus`.
            pub fn from_be_bytes(bytes: &[u8; 32]) -> Result<Self, FieldError> {
                let candidate = Self(<$inner>::from_be_bytes_mod_order(bytes));
                if candidate.to_be_bytes() == *bytes {
                    Ok(candidate)
                } else {
                    Err(FieldError::NotCanonical($label))
                }
            }

            /// 32-byte big-endian representation.
            pub fn to_be_bytes(&self) -> [u8; 32] {
                let raw = self.0.into_bigint().to_bytes_be();
                let mut out = [0u8; 32];
                out[32 - raw.len()..].copy_from_slice(&raw);
                out
            }

            /// Parse a decimal integer, rejecting values `>= modulus`.
            pub fn from_decimal(s: &str) -> Result<Self, FieldError> {
                if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(FieldError::InvalidDecimal(s.len()));
                }
                let value = BigUint::parse_bytes(s.as_bytes(), 10)
                    .ok_or(FieldError::InvalidDecimal(s.len()))?;
                let raw = value.to_bytes_be();
                if raw.len() > 32 {
                    return Err(FieldError::NotCanonical($label));
                }
                let mut bytes = [0u8; 32];
                bytes[32 - raw.len()..].copy_from_slice(&raw);
                Self::from_be_bytes(&bytes)
            }

            /// Canonical decimal rendering (no leading zeros, `"0"` for zero).
            pub fn to_decimal(&self) -> String {
                BigUint::from_bytes_be(&self.to_be_bytes()).to_str_radix(10)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(<$inner>::from(value))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_decimal())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_decimal())
            }
        }

        impl FromStr for $name {
            type Err = FieldError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_decimal(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = FieldError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_decimal(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_decimal()
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul for $name {
            type Output = Self;

            fn mul(self, rhs: Self) -> Self {
                Self(self.0 * rhs.0)
            }
        }

        impl Neg for $name {
            type Output = Self;

            fn neg(self) -> Self {
                Self(-self.0)
            }
        }
    };
}

/// Element of the base field `p`.
///
/// Serialized as a decimal string, the form the ZoKrates tooling reads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldElement(pub(crate) ark_ed_on_bn254::Fq);

prime_field_newtype!(FieldElement, ark_ed_on_bn254::Fq, "base field");

impl FieldElement {
    /// Multiplicative inverse, `None` for zero.
    pub fn invert(&self) -> Option<Self> {
        self.0.inverse().map(Self)
    }

    pub fn square(&self) -> Self {
        Self(self.0.square())
    }
}

/// Integer modulo the prime subgroup order `L`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scalar(pub(crate) ark_ed_on_bn254::Fr);

prime_field_newtype!(Scalar, ark_ed_on_bn254::Fr, "subgroup order");

impl Scalar {
    /// Reduce an arbitrary-length big-endian integer modulo `L`.
    pub fn from_be_bytes_mod_order(bytes: &[u8]) -> Self {
        Self(ark_ed_on_bn254::Fr::from_be_bytes_mod_order(bytes))
    }
}
