//! EdDSA over Baby Jubjub, compatible with the ZoKrates `verifyEddsa` circuit.
//!
//! Nonce and challenge both come from SHA-256 so that signing is
//! deterministic: signing the same message with the same key twice yields
//! the same `(R, S)`. The challenge binds only the x-coordinates of `R` and
//! `A`, exactly as the circuit recomputes it.

use crate::curve::CurvePoint;
use crate::field::Scalar;
use crate::keys::{KeyError, KeyPair, KeyProvider};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Point is not in the prime-order subgroup: {0}")]
    NotInSubgroup(&'static str),
}

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute SHA-512 hash of data.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// EdDSA signature `(R, S)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: CurvePoint,
    pub s: Scalar,
}

/// `r = SHA-256(k ‖ M) mod L`
fn nonce(private: &Scalar, message: &[u8]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(private.to_be_bytes());
    hasher.update(message);
    Scalar::from_be_bytes_mod_order(&hasher.finalize())
}

/// `SHA-256(R.x ‖ A.x ‖ M)`, the circuit's `hRAM`.
fn challenge_digest(r: &CurvePoint, public: &CurvePoint, message: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(r.x().to_be_bytes());
    hasher.update(public.x().to_be_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// `h = hRAM mod L`
fn challenge(r: &CurvePoint, public: &CurvePoint, message: &[u8]) -> Scalar {
    Scalar::from_be_bytes_mod_order(&challenge_digest(r, public, message))
}

/// Sign a message with a key pair.
pub fn sign(keys: &KeyPair, message: &[u8]) -> Signature {
    let k = keys.private_scalar();
    let r = nonce(k, message);
    let big_r = CurvePoint::mul_generator(&r);
    let h = challenge(&big_r, &keys.public_key(), message);
    Signature {
        r: big_r,
        s: r + h * *k,
    }
}

/// Check `S·G == R + h·A`, rejecting points outside the prime subgroup.
pub fn verify(public: &CurvePoint, signature: &Signature, message: &[u8]) -> bool {
    verify_strict(public, signature, message).is_ok()
}

pub fn verify_strict(
    public: &CurvePoint,
    signature: &Signature,
    message: &[u8],
) -> Result<(), SignatureError> {
    if !signature.r.is_in_prime_subgroup() {
        return Err(SignatureError::NotInSubgroup("R"));
    }
    if !public.is_in_prime_subgroup() {
        return Err(SignatureError::NotInSubgroup("public key"));
    }

    let h = challenge(&signature.r, public, message);
    let lhs = CurvePoint::mul_generator(&signature.s);
    let rhs = signature.r.add(&public.mul(&h));
    if lhs == rhs {
        Ok(())
    } else {
        Err(SignatureError::InvalidSignature)
    }
}

/// A signer holding one key pair for the lifetime of a signing session.
pub struct Signer {
    keys: KeyPair,
}

impl Signer {
    /// Create a new signer from a key pair.
    pub fn new(keys: KeyPair) -> Self {
        Self { keys }
    }

    /// Draw a key pair from a provider.
    pub fn from_provider(provider: &dyn KeyProvider) -> Result<Self, KeyError> {
        Ok(Self::new(provider.key_pair()?))
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        sign(&self.keys, message)
    }

    /// Get the public key.
    pub fn public_key(&self) -> CurvePoint {
        self.keys.public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveError;
    use crate::field::FieldElement;
    use crate::keys::{FixedSeed, SecureRandom};
    use proptest::prelude::*;

    const SEED: &str = "1997011358982923168928344992199991480689546837621580239342656433234255379025";

    fn fixed_signer() -> Signer {
        let seed = FixedSeed::from_decimal(SEED).unwrap();
        Signer::from_provider(&seed).unwrap()
    }

    #[test]
    fn test_sha256() {
        let data = b"test data";
        let hash1 = sha256(data);
        let hash2 = sha256(data);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 32);
    }

    #[test]
    fn test_sha512() {
        assert_eq!(
            hex::encode(&sha512(b"42")[..8]),
            "39ca7ce9ecc69f69"
        );
    }

    #[test]
    fn test_determinism_vector() {
        let signer = fixed_signer();
        let message = sha512(b"42");
        let signature = signer.sign(&message);

        assert_eq!(
            signature.r.x().to_decimal(),
            "4436069027135859476811037528022032356682947758891004773240211138988704365480"
        );
        assert_eq!(
            signature.r.y().to_decimal(),
            "15822687462990442104140783711915634320383831076252329131515337057282553070309"
        );
        assert_eq!(
            signature.s.to_decimal(),
            "90978508396835653902595223398975776997647037343059196800965109972729486754"
        );
        assert_eq!(signer.sign(&message), signature);
        assert!(verify(&signer.public_key(), &signature, &message));
    }

    #[test]
    fn test_circuit_equation_with_unreduced_challenge() {
        let signer = fixed_signer();
        let public = signer.public_key();
        let message = sha512(b"42");
        let signature = signer.sign(&message);

        let mut preimage = Vec::with_capacity(128);
        preimage.extend_from_slice(&signature.r.x().to_be_bytes());
        preimage.extend_from_slice(&public.x().to_be_bytes());
        preimage.extend_from_slice(&message);
        let h_ram = sha256(&preimage);
        assert_eq!(h_ram, challenge_digest(&signature.r, &public, &message));

        let lhs = CurvePoint::mul_generator(&signature.s);
        let rhs = signature.r.add(&public.mul_uint_be(&h_ram));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_challenge_ignores_y_coordinates() {
        let signer = fixed_signer();
        let message = sha512(b"42");
        let signature = signer.sign(&message);
        let expected = Scalar::from_be_bytes_mod_order(&sha256(
            &[
                &signature.r.x().to_be_bytes()[..],
                &signer.public_key().x().to_be_bytes()[..],
                &message[..],
            ]
            .concat(),
        ));
        assert_eq!(challenge(&signature.r, &signer.public_key(), &message), expected);
    }

    #[test]
    fn test_negated_r_rejected() {
        let message = sha512(b"42");
        let signer = fixed_signer();
        let mut signature = signer.sign(&message);
        signature.r = signature.r.neg();
        assert!(signature.r.is_in_prime_subgroup());
        assert_eq!(
            verify_strict(&signer.public_key(), &signature, &message),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_wrong_key_rejected() {
        let message = sha512(b"42");
        let signature = fixed_signer().sign(&message);
        let other = Signer::from_provider(&SecureRandom).unwrap();
        assert_eq!(
            verify_strict(&other.public_key(), &signature, &message),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_small_order_r_rejected() {
        let message = sha512(b"42");
        let signer = fixed_signer();
        let mut signature = signer.sign(&message);
        let order_two = CurvePoint::new(
            crate::field::FieldElement::zero(),
            -crate::field::FieldElement::one(),
        )
        .unwrap();
        signature.r = signature.r.add(&order_two);
        assert_eq!(
            verify_strict(&signer.public_key(), &signature, &message),
            Err(SignatureError::NotInSubgroup("R"))
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_sign_then_verify(message in proptest::collection::vec(any::<u8>(), 0..128)) {
            let signer = Signer::from_provider(&SecureRandom).unwrap();
            let signature = signer.sign(&message);
            prop_assert!(verify(&signer.public_key(), &signature, &message));
        }

        #[test]
        fn prop_tampered_message_rejected(bit in 0usize..512) {
            let signer = fixed_signer();
            let message = sha512(b"42");
            let signature = signer.sign(&message);

            let mut tampered = message;
            tampered[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!verify(&signer.public_key(), &signature, &tampered));
        }

        #[test]
        fn prop_tampered_s_rejected(bit in 0usize..248) {
            let signer = fixed_signer();
            let message = sha512(b"42");
            let signature = signer.sign(&message);

            let mut bytes = signature.s.to_be_bytes();
            bytes[31 - bit / 8] ^= 1 << (bit % 8);
            if let Ok(s) = Scalar::from_be_bytes(&bytes) {
                let tampered = Signature { r: signature.r, s };
                prop_assert!(!verify(&signer.public_key(), &tampered, &message));
            }
        }

        #[test]
        fn prop_tampered_r_rejected(bit in 0usize..254, flip_y in any::<bool>()) {
            let signer = fixed_signer();
            let message = sha512(b"42");
            let signature = signer.sign(&message);

            let mut x = signature.r.x().to_be_bytes();
            let mut y = signature.r.y().to_be_bytes();
            let target = if flip_y { &mut y } else { &mut x };
            target[31 - bit / 8] ^= 1 << (bit % 8);

            let tampered = FieldElement::from_be_bytes(&x)
                .and_then(|x| Ok((x, FieldElement::from_be_bytes(&y)?)))
                .map_err(CurveError::from)
                .and_then(|(x, y)| CurvePoint::new(x, y));
            // A flipped coordinate almost always leaves the curve; if not, the equation fails
            if let Ok(r) = tampered {
                let tampered = Signature { r, s: signature.s };
                prop_assert!(!verify(&signer.public_key(), &tampered, &message));
            }
        }
    }
}
