//! Exponential ElGamal over the election group.
//!
//! The group is written additively: a ciphertext of `m` under public key `h` with
//! randomness `r` is `(r·g, m·g + r·h)`, and the homomorphic "product" of two
//! ciphertexts is their component-wise sum.

use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use std::ops::{Add, AddAssign};

/// The joint election encryption key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(#[serde(with = "RistrettoPointHex")] pub RistrettoPoint);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciphertext {
    #[serde(with = "RistrettoPointHex")]
    pub alpha: RistrettoPoint,

    #[serde(with = "RistrettoPointHex")]
    pub beta: RistrettoPoint,
}

impl Ciphertext {
    /// Encryption of zero with zero randomness; the neutral element for tallying.
    pub fn zero() -> Self {
        Ciphertext {
            alpha: RistrettoPoint::identity(),
            beta: RistrettoPoint::identity(),
        }
    }

    /// Canonical byte form, used in proof transcripts.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.alpha.compress().as_bytes());
        bytes[32..].copy_from_slice(self.beta.compress().as_bytes());
        bytes
    }
}

impl Add for Ciphertext {
    type Output = Ciphertext;

    fn add(self, other: Ciphertext) -> Ciphertext {
        Ciphertext {
            alpha: self.alpha + other.alpha,
            beta: self.beta + other.beta,
        }
    }
}

impl AddAssign for Ciphertext {
    fn add_assign(&mut self, other: Ciphertext) {
        self.alpha += other.alpha;
        self.beta += other.beta;
    }
}

impl PublicKey {
    /// Encrypt `m` with caller-chosen randomness.
    pub fn encrypt_with(&self, params: &ElectionParameters, m: u64, r: &Scalar) -> Ciphertext {
        Ciphertext {
            alpha: params.generator * r,
            beta: params.encode(m) + self.0 * r,
        }
    }

    /// Encrypt `m`, returning the ciphertext and the randomness used.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        params: &ElectionParameters,
        m: u64,
        rng: &mut R,
    ) -> (Ciphertext, Scalar) {
        let r = Scalar::random(rng);
        (self.encrypt_with(params, m, &r), r)
    }
}
