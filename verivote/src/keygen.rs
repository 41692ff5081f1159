use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeSet;

/// How the election key is split between trustees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum TrusteeScheme {
    /// Every trustee holds an independent key; all of them must decrypt.
    Full,

    /// Joint-Feldman shared key; any `quorum` trustees can decrypt.
    Threshold { quorum: usize },
}

impl Default for TrusteeScheme {
    fn default() -> Self {
        TrusteeScheme::Full
    }
}

impl TrusteeScheme {
    /// Number of partial decryptions needed with `num_trustees` trustees.
    pub fn quorum(&self, num_trustees: usize) -> usize {
        match self {
            TrusteeScheme::Full => num_trustees,
            TrusteeScheme::Threshold { quorum } => *quorum,
        }
    }

    /// Number of polynomial coefficients each trustee commits to.
    pub fn coefficient_count(&self) -> usize {
        match self {
            TrusteeScheme::Full => 1,
            TrusteeScheme::Threshold { quorum } => *quorum,
        }
    }
}

/// Public output of the first key-generation round: Feldman commitments to the
/// trustee's secret polynomial, plus a proof of knowledge of the constant term.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeygenCommitment {
    pub index: usize,

    #[serde(with = "RistrettoPointsHex")]
    pub coefficients: Vec<RistrettoPoint>,

    pub proof: KnowledgeProof,
}

impl KeygenCommitment {
    /// Evaluate the committed polynomial "in the exponent" at `x`.
    fn evaluate(&self, x: usize) -> RistrettoPoint {
        let x = Scalar::from(x as u64);
        self.coefficients
            .iter()
            .rev()
            .fold(RistrettoPoint::identity(), |acc, c| acc * x + c)
    }

    fn verify(&self, params: &ElectionParameters) -> bool {
        match self.coefficients.first() {
            Some(constant) => self.proof.verify(params, constant, self.index),
            None => false,
        }
    }
}

/// A private polynomial evaluation sent from one trustee to another.
///
/// Transport (and its encryption) is the trustees' business; the engine never sees
/// these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyShareFragment {
    pub from: usize,
    pub to: usize,

    #[serde(with = "ScalarHex")]
    pub value: Scalar,
}

/// A trustee's finished key share.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrusteeKey {
    pub index: usize,

    #[serde(with = "ScalarHex")]
    pub secret: Scalar,

    /// Public key share, `secret·g`.
    #[serde(with = "RistrettoPointHex")]
    pub verification_key: RistrettoPoint,
}

/// Secret state of one trustee during key generation.
pub struct TrusteeKeyGenerator {
    index: usize,
    coefficients: Vec<Scalar>,
}

impl TrusteeKeyGenerator {
    /// Start key generation for the trustee at `index` (1-based).
    pub fn new<R: RngCore + CryptoRng>(
        index: usize,
        scheme: TrusteeScheme,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if index == 0 {
            return Err(Error::InvalidCommitment(index));
        }
        let coefficients = (0..scheme.coefficient_count().max(1))
            .map(|_| Scalar::random(rng))
            .collect();
        Ok(TrusteeKeyGenerator { index, coefficients })
    }

    /// Derive the polynomial from a trustee-held seed, so the trustee can rebuild its
    /// generator state instead of storing it.
    pub fn from_seed(seed: &[u8; 32], index: usize, scheme: TrusteeScheme) -> Result<Self, Error> {
        use hkdf::Hkdf;
        use rand_chacha::rand_core::SeedableRng;
        use rand_chacha::ChaCha20Rng;
        use sha2::Sha256;

        let h = Hkdf::<Sha256>::new(Some(&(index as u64).to_le_bytes()), seed);
        let mut okm = [0u8; 32];
        h.expand(b"verivote_trustee_polynomial", &mut okm)
            .map_err(|_| Error::ProofGeneration("key derivation failed"))?;

        let mut rng = ChaCha20Rng::from_seed(okm);
        TrusteeKeyGenerator::new(index, scheme, &mut rng)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn commitment<R: RngCore + CryptoRng>(
        &self,
        params: &ElectionParameters,
        rng: &mut R,
    ) -> KeygenCommitment {
        let coefficients: Vec<RistrettoPoint> =
            self.coefficients.iter().map(|a| params.generator * a).collect();
        let proof = KnowledgeProof::prove(params, &self.coefficients[0], &coefficients[0], self.index, rng);

        KeygenCommitment {
            index: self.index,
            coefficients,
            proof,
        }
    }

    /// The share of this trustee's polynomial destined for trustee `to`.
    pub fn fragment_for(&self, to: usize) -> KeyShareFragment {
        let x = Scalar::from(to as u64);
        let value = self
            .coefficients
            .iter()
            .rev()
            .fold(Scalar::zero(), |acc, a| acc * x + a);

        KeyShareFragment {
            from: self.index,
            to,
            value,
        }
    }

    /// Verify received fragments against their commitments and produce the final key.
    ///
    /// Under the full scheme fragments are ignored: the trustee's key is its own
    /// constant term.
    pub fn finish(
        self,
        params: &ElectionParameters,
        scheme: TrusteeScheme,
        commitments: &[KeygenCommitment],
        fragments: &[KeyShareFragment],
    ) -> Result<TrusteeKey, Error> {
        let secret = match scheme {
            TrusteeScheme::Full => self.coefficients[0],
            TrusteeScheme::Threshold { .. } => {
                let mut secret = Scalar::zero();
                for commitment in commitments {
                    let fragment = fragments
                        .iter()
                        .find(|f| f.from == commitment.index && f.to == self.index)
                        .ok_or(Error::InvalidKeyShare {
                            from: commitment.index,
                            to: self.index,
                        })?;

                    if params.generator * fragment.value != commitment.evaluate(self.index) {
                        return Err(Error::InvalidKeyShare {
                            from: fragment.from,
                            to: self.index,
                        });
                    }
                    secret += fragment.value;
                }
                secret
            }
        };

        Ok(TrusteeKey {
            index: self.index,
            secret,
            verification_key: params.generator * secret,
        })
    }
}

/// Joint election key and every trustee's verification key, derived from the
/// published commitments alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKeySet {
    pub public_key: PublicKey,

    /// Verification key of trustee `i` at position `i - 1`.
    #[serde(with = "RistrettoPointsHex")]
    pub verification_keys: Vec<RistrettoPoint>,
}

impl PublicKeySet {
    pub fn from_commitments(
        params: &ElectionParameters,
        scheme: TrusteeScheme,
        commitments: &[KeygenCommitment],
    ) -> Result<Self, Error> {
        let n = commitments.len();
        let quorum = scheme.quorum(n);
        if n == 0 || quorum == 0 || quorum > n {
            return Err(Error::InsufficientQuorum { need: quorum, have: n });
        }

        let mut seen = BTreeSet::new();
        for commitment in commitments {
            if commitment.index == 0 || commitment.index > n {
                return Err(Error::InvalidCommitment(commitment.index));
            }
            if !seen.insert(commitment.index) {
                return Err(Error::DuplicateTrusteeIndex(commitment.index));
            }
            if commitment.coefficients.len() != scheme.coefficient_count() || !commitment.verify(params) {
                return Err(Error::InvalidCommitment(commitment.index));
            }
        }

        let public_key = commitments
            .iter()
            .fold(RistrettoPoint::identity(), |acc, c| acc + c.coefficients[0]);

        let verification_keys = (1..=n)
            .map(|i| match scheme {
                TrusteeScheme::Full => commitments
                    .iter()
                    .find(|c| c.index == i)
                    .map(|c| c.coefficients[0])
                    .unwrap_or_else(RistrettoPoint::identity),
                TrusteeScheme::Threshold { .. } => commitments
                    .iter()
                    .fold(RistrettoPoint::identity(), |acc, c| acc + c.evaluate(i)),
            })
            .collect();

        Ok(PublicKeySet {
            public_key: PublicKey(public_key),
            verification_keys,
        })
    }

    pub fn verification_key(&self, index: usize) -> Option<&RistrettoPoint> {
        index.checked_sub(1).and_then(|i| self.verification_keys.get(i))
    }
}

/// Runs a complete key generation between in-process trustees.
///
/// Used for the server-held trustee and for demonstrations; real trustees run the
/// same rounds on their own machines.
pub struct KeyCeremony;

impl KeyCeremony {
    pub fn run<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        scheme: TrusteeScheme,
        num_trustees: usize,
        rng: &mut R,
    ) -> Result<(Vec<KeygenCommitment>, Vec<TrusteeKey>), Error> {
        let generators = (1..=num_trustees)
            .map(|index| TrusteeKeyGenerator::new(index, scheme, rng))
            .collect::<Result<Vec<_>, _>>()?;

        let commitments: Vec<KeygenCommitment> =
            generators.iter().map(|g| g.commitment(params, rng)).collect();

        let mut fragments = Vec::new();
        if let TrusteeScheme::Threshold { .. } = scheme {
            for generator in &generators {
                for to in 1..=num_trustees {
                    fragments.push(generator.fragment_for(to));
                }
            }
        }

        let keys = generators
            .into_iter()
            .map(|g| g.finish(params, scheme, &commitments, &fragments))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((commitments, keys))
    }
}
