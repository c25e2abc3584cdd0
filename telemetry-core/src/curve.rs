//! Twisted Edwards point arithmetic on Baby Jubjub.
//!
//! Curve: `a·x² + y² = 1 + d·x²·y²` over the BN254 scalar field with
//! `a = 168700`, `d = 168696` (the parameters of the ZoKrates standard
//! library). `a` is a square and `d` is not, so the addition law is complete:
//! the same formula handles doubling and the identity `(0, 1)`.
//!
//! Scalar multiplication always walks all 256 bits of the scalar and merges
//! the conditional addition with an arithmetic select, so the sequence of
//! field operations does not depend on secret bits.

use crate::field::{FieldElement, FieldError, Scalar};
use ark_ff::MontFp;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Curve coefficient `a`.
pub const COEFF_A: u64 = 168700;

/// Curve coefficient `d`.
pub const COEFF_D: u64 = 168696;

const GENERATOR_X: FieldElement = FieldElement(MontFp!(
    "16540640123574156134436876038791482806971768689494387082833631921987005038935"
));
const GENERATOR_Y: FieldElement = FieldElement(MontFp!(
    "20819045374670962167435360035096875258406992893633759881276124905556507972311"
));

/// Bits walked by every scalar multiplication.
const SCALAR_BITS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("Point is not on the curve")]
    NotOnCurve,

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] FieldError),
}

/// Affine point on Baby Jubjub.
///
/// Fields are private: every value of this type lies on the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PointRepr", into = "PointRepr")]
pub struct CurvePoint {
    x: FieldElement,
    y: FieldElement,
}

#[derive(Serialize, Deserialize)]
struct PointRepr {
    x: FieldElement,
    y: FieldElement,
}

impl TryFrom<PointRepr> for CurvePoint {
    type Error = CurveError;

    fn try_from(repr: PointRepr) -> Result<Self, Self::Error> {
        CurvePoint::new(repr.x, repr.y)
    }
}

impl From<CurvePoint> for PointRepr {
    fn from(point: CurvePoint) -> Self {
        PointRepr { x: point.x, y: point.y }
    }
}

impl CurvePoint {
    /// Build a point from raw coordinates, checking the curve equation.
    pub fn new(x: FieldElement, y: FieldElement) -> Result<Self, CurveError> {
        let point = Self { x, y };
        if point.satisfies_curve_equation() {
            Ok(point)
        } else {
            Err(CurveError::NotOnCurve)
        }
    }

    /// Build a point from decimal coordinates.
    pub fn from_decimal(x: &str, y: &str) -> Result<Self, CurveError> {
        Self::new(FieldElement::from_decimal(x)?, FieldElement::from_decimal(y)?)
    }

    /// Neutral element `(0, 1)`.
    pub fn identity() -> Self {
        Self {
            x: FieldElement::zero(),
            y: FieldElement::one(),
        }
    }

    /// Generator of the prime-order subgroup used by the ZoKrates verifier.
    pub fn generator() -> Self {
        Self {
            x: GENERATOR_X,
            y: GENERATOR_Y,
        }
    }

    pub fn x(&self) -> FieldElement {
        self.x
    }

    pub fn y(&self) -> FieldElement {
        self.y
    }

    pub fn is_identity(&self) -> bool {
        self.x.is_zero() && self.y == FieldElement::one()
    }

    fn satisfies_curve_equation(&self) -> bool {
        let x2 = self.x.square();
        let y2 = self.y.square();
        let lhs = FieldElement::from(COEFF_A) * x2 + y2;
        let rhs = FieldElement::one() + FieldElement::from(COEFF_D) * x2 * y2;
        lhs == rhs
    }

    /// Complete twisted Edwards addition.
    pub fn add(&self, other: &Self) -> Self {
        let x1x2 = self.x * other.x;
        let y1y2 = self.y * other.y;
        let t = FieldElement::from(COEFF_D) * x1x2 * y1y2;

        let num_x = self.x * other.y + self.y * other.x;
        let num_y = y1y2 - FieldElement::from(COEFF_A) * x1x2;
        let den_x = FieldElement::one() + t;
        let den_y = FieldElement::one() - t;

        // Both denominators are nonzero for curve points (d is a non-square).
        let inv = (den_x * den_y).invert().unwrap_or_else(FieldElement::zero);
        Self {
            x: num_x * den_y * inv,
            y: num_y * den_x * inv,
        }
    }

    pub fn double(&self) -> Self {
        self.add(self)
    }

    pub fn neg(&self) -> Self {
        Self { x: -self.x, y: self.y }
    }

    /// Variable-base multiplication by a scalar already reduced mod `L`.
    pub fn mul(&self, scalar: &Scalar) -> Self {
        let bytes = scalar.to_be_bytes();
        let mut base = *self;
        let mut acc = Self::identity();
        for bit in bits_le(&bytes) {
            let sum = acc.add(&base);
            acc = Self::select(bit, &sum, &acc);
            base = base.double();
        }
        acc
    }

    /// Multiplication by an arbitrary non-negative big-endian integer.
    ///
    /// The integer is used unreduced, so the result is exact for points of
    /// any order. Iteration count depends only on `k.len()`.
    pub fn mul_uint_be(&self, k: &[u8]) -> Self {
        let mut base = *self;
        let mut acc = Self::identity();
        for bit in bits_le(k) {
            let sum = acc.add(&base);
            acc = Self::select(bit, &sum, &acc);
            base = base.double();
        }
        acc
    }

    /// Fixed-base multiplication `k·G` using the precomputed doubling table.
    pub fn mul_generator(scalar: &Scalar) -> Self {
        let table = generator_table();
        let bytes = scalar.to_be_bytes();
        let mut acc = Self::identity();
        for (power, bit) in table.iter().zip(bits_le(&bytes)) {
            let sum = acc.add(power);
            acc = Self::select(bit, &sum, &acc);
        }
        acc
    }

    /// `true` if `L·P` is the identity.
    pub fn is_in_prime_subgroup(&self) -> bool {
        // L itself is not a valid Scalar, so multiply by the raw integer.
        let order = num_bigint::BigUint::parse_bytes(crate::field::SUBGROUP_ORDER.as_bytes(), 10)
            .map(|l| l.to_bytes_be())
            .unwrap_or_default();
        !order.is_empty() && self.mul_uint_be(&order).is_identity()
    }

    /// `if_one` when `bit == 1`, `if_zero` when `bit == 0`, without branching.
    fn select(bit: u8, if_one: &Self, if_zero: &Self) -> Self {
        let b = FieldElement::from(u64::from(bit & 1));
        Self {
            x: if_zero.x + b * (if_one.x - if_zero.x),
            y: if_zero.y + b * (if_one.y - if_zero.y),
        }
    }
}

/// Bits of a big-endian integer, least significant first.
fn bits_le(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes
        .iter()
        .rev()
        .flat_map(|byte| (0..8).map(move |i| (byte >> i) & 1))
}

/// `[G, 2G, 4G, …, 2^255·G]`
fn generator_table() -> &'static [CurvePoint] {
    static TABLE: OnceLock<Vec<CurvePoint>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Vec::with_capacity(SCALAR_BITS);
        let mut power = CurvePoint::generator();
        for _ in 0..SCALAR_BITS {
            table.push(power);
            power = power.double();
        }
        table
    })
}
