use crate::*;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use digest::Digest;
use sha2::Sha512;

/// Prime-order groups an election can run over.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupName {
    Ristretto255,
}

/// Group and generator shared by every cryptographic operation of one election.
///
/// There is no process-wide default: every encryption, proof and decryption takes the
/// parameters explicitly. The `context` string is mixed into every Fiat-Shamir
/// challenge so proofs cannot be replayed across elections.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElectionParameters {
    pub group: GroupName,

    #[serde(with = "RistrettoPointHex")]
    pub generator: RistrettoPoint,

    pub context: String,
}

impl ElectionParameters {
    /// Ristretto255 with the standard base point.
    pub fn new(context: impl Into<String>) -> Self {
        ElectionParameters {
            group: GroupName::Ristretto255,
            generator: RISTRETTO_BASEPOINT_POINT,
            context: context.into(),
        }
    }

    /// `m * g`, the exponential encoding of a small integer.
    pub fn encode(&self, m: u64) -> RistrettoPoint {
        self.generator * Scalar::from(m)
    }

    /// Start a Fiat-Shamir transcript for the given proof kind.
    pub(crate) fn transcript(&self, label: &[u8]) -> Transcript {
        let mut transcript = Transcript { hasher: Sha512::new() };
        transcript.append_bytes(b"verivote");
        transcript.append_bytes(label);
        transcript.append_bytes(self.context.as_bytes());
        transcript.append_point(&self.generator);
        transcript
    }
}

/// Hash accumulator turned into a challenge scalar.
pub(crate) struct Transcript {
    hasher: Sha512,
}

impl Transcript {
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        // Length prefix keeps adjacent fields unambiguous
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub fn append_point(&mut self, point: &RistrettoPoint) {
        self.hasher.update(point.compress().as_bytes());
    }

    pub fn append_u64(&mut self, value: u64) {
        self.hasher.update(&value.to_le_bytes());
    }

    pub fn challenge(self) -> Scalar {
        Scalar::from_hash(self.hasher)
    }
}
