//! Non-interactive zero-knowledge proofs (Fiat-Shamir over SHA-512).

use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};

/// One branch of a disjunctive proof: "the ciphertext encrypts `min + i`".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProofBranch {
    #[serde(with = "RistrettoPointHex")]
    pub commitment_a: RistrettoPoint,

    #[serde(with = "RistrettoPointHex")]
    pub commitment_b: RistrettoPoint,

    #[serde(with = "ScalarHex")]
    pub challenge: Scalar,

    #[serde(with = "ScalarHex")]
    pub response: Scalar,
}

/// Proof that a ciphertext encrypts an integer in `min..=min + branches.len() - 1`.
///
/// A 0/1 proof is a range proof with `min = 0` and two branches. The declared range
/// is public: a validator can compare it with the question bounds before doing any
/// group arithmetic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RangeProof {
    pub min: u32,
    pub branches: Vec<ProofBranch>,
}

impl RangeProof {
    /// Highest value covered by the proof, or `None` for an empty proof.
    pub fn max(&self) -> Option<u32> {
        if self.branches.is_empty() {
            return None;
        }
        self.min.checked_add(self.branches.len() as u32 - 1)
    }

    /// Prove that `ciphertext = encrypt(value, r)` with `min <= value <= max`.
    pub fn prove<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        public_key: &PublicKey,
        ciphertext: &Ciphertext,
        value: u32,
        r: &Scalar,
        min: u32,
        max: u32,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if value < min || value > max {
            return Err(Error::ProofGeneration("plaintext outside the proven range"));
        }

        let real = (value - min) as usize;
        let w = Scalar::random(rng);
        let mut branches = Vec::with_capacity((max - min + 1) as usize);
        let mut fake_sum = Scalar::zero();

        for (i, candidate) in (min..=max).enumerate() {
            if i == real {
                branches.push(ProofBranch {
                    commitment_a: params.generator * w,
                    commitment_b: public_key.0 * w,
                    challenge: Scalar::zero(),
                    response: Scalar::zero(),
                });
                continue;
            }

            // Simulated branch
            let challenge = Scalar::random(rng);
            let response = Scalar::random(rng);
            let shifted = ciphertext.beta - params.encode(candidate as u64);
            branches.push(ProofBranch {
                commitment_a: params.generator * response - ciphertext.alpha * challenge,
                commitment_b: public_key.0 * response - shifted * challenge,
                challenge,
                response,
            });
            fake_sum += challenge;
        }

        let challenge = Self::challenge(params, public_key, ciphertext, min, &branches);
        let real_challenge = challenge - fake_sum;
        branches[real].challenge = real_challenge;
        branches[real].response = w + real_challenge * r;

        Ok(RangeProof { min, branches })
    }

    /// Verify the proof. Callers are expected to have bounded `branches.len()` already.
    pub fn verify(
        &self,
        params: &ElectionParameters,
        public_key: &PublicKey,
        ciphertext: &Ciphertext,
    ) -> bool {
        if self.max().is_none() {
            return false;
        }

        let mut challenge_sum = Scalar::zero();
        for (i, branch) in self.branches.iter().enumerate() {
            let candidate = self.min as u64 + i as u64;
            let shifted = ciphertext.beta - params.encode(candidate);

            if params.generator * branch.response != branch.commitment_a + ciphertext.alpha * branch.challenge {
                return false;
            }
            if public_key.0 * branch.response != branch.commitment_b + shifted * branch.challenge {
                return false;
            }
            challenge_sum += branch.challenge;
        }

        challenge_sum == Self::challenge(params, public_key, ciphertext, self.min, &self.branches)
    }

    fn challenge(
        params: &ElectionParameters,
        public_key: &PublicKey,
        ciphertext: &Ciphertext,
        min: u32,
        branches: &[ProofBranch],
    ) -> Scalar {
        let mut transcript = params.transcript(b"range");
        transcript.append_point(&public_key.0);
        transcript.append_bytes(&ciphertext.to_bytes());
        transcript.append_u64(min as u64);
        transcript.append_u64(branches.len() as u64);
        for branch in branches {
            transcript.append_point(&branch.commitment_a);
            transcript.append_point(&branch.commitment_b);
        }
        transcript.challenge()
    }
}

/// Chaum-Pedersen proof that `log_g(y0) == log_base(y1)`.
///
/// Used by trustees to show a decryption factor `x·alpha` was computed with the same
/// secret `x` as their published verification key `x·g`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DlogEqualityProof {
    #[serde(with = "RistrettoPointHex")]
    pub commitment_a: RistrettoPoint,

    #[serde(with = "RistrettoPointHex")]
    pub commitment_b: RistrettoPoint,

    #[serde(with = "ScalarHex")]
    pub response: Scalar,
}

impl DlogEqualityProof {
    pub fn prove<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        secret: &Scalar,
        y0: &RistrettoPoint,
        base: &RistrettoPoint,
        y1: &RistrettoPoint,
        rng: &mut R,
    ) -> Self {
        let w = Scalar::random(rng);
        let commitment_a = params.generator * w;
        let commitment_b = base * w;
        let c = Self::challenge(params, y0, base, y1, &commitment_a, &commitment_b);

        DlogEqualityProof {
            commitment_a,
            commitment_b,
            response: w + c * secret,
        }
    }

    pub fn verify(
        &self,
        params: &ElectionParameters,
        y0: &RistrettoPoint,
        base: &RistrettoPoint,
        y1: &RistrettoPoint,
    ) -> bool {
        let c = Self::challenge(params, y0, base, y1, &self.commitment_a, &self.commitment_b);
        params.generator * self.response == self.commitment_a + y0 * c
            && base * self.response == self.commitment_b + y1 * c
    }

    fn challenge(
        params: &ElectionParameters,
        y0: &RistrettoPoint,
        base: &RistrettoPoint,
        y1: &RistrettoPoint,
        commitment_a: &RistrettoPoint,
        commitment_b: &RistrettoPoint,
    ) -> Scalar {
        let mut transcript = params.transcript(b"dlog-eq");
        transcript.append_point(y0);
        transcript.append_point(base);
        transcript.append_point(y1);
        transcript.append_point(commitment_a);
        transcript.append_point(commitment_b);
        transcript.challenge()
    }
}

/// Schnorr proof of knowledge of `x` such that `y = x·g`, bound to a trustee index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeProof {
    #[serde(with = "RistrettoPointHex")]
    pub commitment: RistrettoPoint,

    #[serde(with = "ScalarHex")]
    pub response: Scalar,
}

impl KnowledgeProof {
    pub fn prove<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        secret: &Scalar,
        y: &RistrettoPoint,
        index: usize,
        rng: &mut R,
    ) -> Self {
        let w = Scalar::random(rng);
        let commitment = params.generator * w;
        let c = Self::challenge(params, y, &commitment, index);
        KnowledgeProof {
            commitment,
            response: w + c * secret,
        }
    }

    pub fn verify(&self, params: &ElectionParameters, y: &RistrettoPoint, index: usize) -> bool {
        let c = Self::challenge(params, y, &self.commitment, index);
        params.generator * self.response == self.commitment + y * c
    }

    fn challenge(
        params: &ElectionParameters,
        y: &RistrettoPoint,
        commitment: &RistrettoPoint,
        index: usize,
    ) -> Scalar {
        let mut transcript = params.transcript(b"knowledge");
        transcript.append_u64(index as u64);
        transcript.append_point(y);
        transcript.append_point(commitment);
        transcript.challenge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (ElectionParameters, PublicKey, Scalar, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::from_seed([9; 32]);
        let params = ElectionParameters::new("proof-tests");
        let secret = Scalar::random(&mut rng);
        let pk = PublicKey(params.generator * secret);
        (params, pk, secret, rng)
    }

    #[test]
    fn range_proof_accepts_each_value_in_range() {
        let (params, pk, _, mut rng) = setup();
        for value in 1..=3 {
            let (ct, r) = pk.encrypt(&params, value as u64, &mut rng);
            let proof = RangeProof::prove(&params, &pk, &ct, value, &r, 1, 3, &mut rng).unwrap();
            assert_eq!(proof.max(), Some(3));
            assert!(proof.verify(&params, &pk, &ct));
        }
    }

    #[test]
    fn range_proof_rejects_wrong_ciphertext() {
        let (params, pk, _, mut rng) = setup();
        let (ct, r) = pk.encrypt(&params, 1, &mut rng);
        let proof = RangeProof::prove(&params, &pk, &ct, 1, &r, 0, 1, &mut rng).unwrap();

        let (two, _) = pk.encrypt(&params, 2, &mut rng);
        assert!(!proof.verify(&params, &pk, &two));

        // A ciphertext of 2 cannot be proven to lie in 0..=1
        let (two, r2) = pk.encrypt(&params, 2, &mut rng);
        assert!(RangeProof::prove(&params, &pk, &two, 2, &r2, 0, 1, &mut rng).is_err());

        // Lying about the plaintext yields a proof that does not verify
        let forged = RangeProof::prove(&params, &pk, &two, 1, &r2, 0, 1, &mut rng).unwrap();
        assert!(!forged.verify(&params, &pk, &two));
    }

    #[test]
    fn range_proof_is_bound_to_context() {
        let (params, pk, _, mut rng) = setup();
        let (ct, r) = pk.encrypt(&params, 0, &mut rng);
        let proof = RangeProof::prove(&params, &pk, &ct, 0, &r, 0, 1, &mut rng).unwrap();

        let other = ElectionParameters::new("another-election");
        assert!(!proof.verify(&other, &pk, &ct));

        let empty = RangeProof { min: 0, branches: vec![] };
        assert!(!empty.verify(&params, &pk, &ct));
    }

    #[test]
    fn dlog_equality_roundtrip() {
        let (params, _, secret, mut rng) = setup();
        let base = params.generator * Scalar::random(&mut rng);
        let y0 = params.generator * secret;
        let y1 = base * secret;

        let proof = DlogEqualityProof::prove(&params, &secret, &y0, &base, &y1, &mut rng);
        assert!(proof.verify(&params, &y0, &base, &y1));

        let wrong = base * (secret + Scalar::one());
        assert!(!proof.verify(&params, &y0, &base, &wrong));
    }

    #[test]
    fn knowledge_proof_bound_to_index() {
        let (params, _, secret, mut rng) = setup();
        let y = params.generator * secret;
        let proof = KnowledgeProof::prove(&params, &secret, &y, 1, &mut rng);
        assert!(proof.verify(&params, &y, 1));
        assert!(!proof.verify(&params, &y, 2));
    }
}
