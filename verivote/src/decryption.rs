use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use uuid::Uuid;

/// `x_i·alpha` for one tally entry, with proof that `x_i` matches the trustee's
/// verification key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecryptionFactor {
    #[serde(with = "RistrettoPointHex")]
    pub factor: RistrettoPoint,
    pub proof: DlogEqualityProof,
}

/// One trustee's contribution to decrypting the tally: a factor per question per
/// answer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PartialDecryption {
    pub election_id: Uuid,
    pub trustee_id: Uuid,
    pub trustee_index: usize,
    pub factors: Vec<Vec<DecryptionFactor>>,
}

impl PartialDecryption {
    /// One factor per tally entry, for this tally's election.
    pub fn matches_shape(&self, tally: &Tally) -> bool {
        self.election_id == tally.election_id
            && self.factors.len() == tally.entries.len()
            && self
                .factors
                .iter()
                .zip(&tally.entries)
                .all(|(factors, entries)| factors.len() == entries.len())
    }

    /// Check shape and every proof against the trustee's verification key.
    pub fn verify(&self, params: &ElectionParameters, verification_key: &RistrettoPoint, tally: &Tally) -> bool {
        if !self.matches_shape(tally) {
            return false;
        }

        for (factors, entries) in self.factors.iter().zip(&tally.entries) {
            for (factor, entry) in factors.iter().zip(entries) {
                if !factor.proof.verify(params, verification_key, &entry.alpha, &factor.factor) {
                    return false;
                }
            }
        }
        true
    }
}

impl TrusteeKey {
    /// Produce this trustee's partial decryption of the tally.
    pub fn partial_decrypt<R: RngCore + CryptoRng>(
        &self,
        params: &ElectionParameters,
        trustee_id: Uuid,
        tally: &Tally,
        rng: &mut R,
    ) -> Result<PartialDecryption, Error> {
        if params.generator * self.secret != self.verification_key {
            return Err(Error::ProofGeneration("secret share does not match verification key"));
        }

        let factors = tally
            .entries
            .iter()
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        let factor = entry.alpha * self.secret;
                        let proof = DlogEqualityProof::prove(
                            params,
                            &self.secret,
                            &self.verification_key,
                            &entry.alpha,
                            &factor,
                            rng,
                        );
                        DecryptionFactor { factor, proof }
                    })
                    .collect()
            })
            .collect();

        Ok(PartialDecryption {
            election_id: tally.election_id,
            trustee_id,
            trustee_index: self.index,
            factors,
        })
    }
}

/// Lagrange coefficient at zero for share `i` among shares `indices`.
pub fn lagrange_coefficient(i: usize, indices: &[usize]) -> Scalar {
    let xi = Scalar::from(i as u64);
    let mut numerator = Scalar::one();
    let mut denominator = Scalar::one();

    for &j in indices.iter().filter(|&&j| j != i) {
        let xj = Scalar::from(j as u64);
        numerator *= xj;
        denominator *= xj - xi;
    }

    numerator * denominator.invert()
}

/// Combine `(trustee index, factor)` pairs for one ciphertext into `x·alpha`.
pub fn combine_factors(scheme: TrusteeScheme, factors: &[(usize, RistrettoPoint)]) -> RistrettoPoint {
    match scheme {
        TrusteeScheme::Full => factors
            .iter()
            .fold(RistrettoPoint::identity(), |acc, (_, f)| acc + f),
        TrusteeScheme::Threshold { .. } => {
            let indices: Vec<usize> = factors.iter().map(|(i, _)| *i).collect();
            factors.iter().fold(RistrettoPoint::identity(), |acc, (i, f)| {
                acc + f * lagrange_coefficient(*i, &indices)
            })
        }
    }
}

/// Lookup from `m·g` to `m` for `m` in `0..=bound`.
pub struct DiscreteLogTable {
    bound: u64,
    table: HashMap<[u8; 32], u64>,
}

impl DiscreteLogTable {
    pub fn new(params: &ElectionParameters, bound: u64) -> Self {
        let mut table = HashMap::with_capacity(bound as usize + 1);
        let mut point = RistrettoPoint::identity();
        for m in 0..=bound {
            table.insert(point.compress().to_bytes(), m);
            point += params.generator;
        }
        DiscreteLogTable { bound, table }
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    pub fn lookup(&self, point: &RistrettoPoint) -> Result<u64, Error> {
        self.table
            .get(point.compress().as_bytes())
            .copied()
            .ok_or(Error::DiscreteLogNotFound { bound: self.bound })
    }
}

/// Recover the plaintext counts of a tally from verified partial decryptions.
///
/// Under the full scheme every trustee's partial is required. Under a threshold
/// scheme the first `quorum` partials by trustee index are used.
pub fn decrypt_tally(
    params: &ElectionParameters,
    scheme: TrusteeScheme,
    num_trustees: usize,
    tally: &Tally,
    partials: &[&PartialDecryption],
) -> Result<Vec<Vec<u64>>, Error> {
    let quorum = scheme.quorum(num_trustees);
    if quorum == 0 || partials.len() < quorum {
        return Err(Error::InsufficientQuorum {
            need: quorum,
            have: partials.len(),
        });
    }

    let mut chosen: Vec<&PartialDecryption> = partials.to_vec();
    chosen.sort_by_key(|p| p.trustee_index);
    chosen.truncate(quorum);

    if let Some(malformed) = chosen.iter().find(|p| !p.matches_shape(tally)) {
        return Err(Error::InvalidPartialDecryption(malformed.trustee_id));
    }

    let table = DiscreteLogTable::new(params, tally.num_tallied);

    tally
        .entries
        .iter()
        .enumerate()
        .map(|(q, entries)| {
            entries
                .iter()
                .enumerate()
                .map(|(a, entry)| {
                    let factors: Vec<(usize, RistrettoPoint)> = chosen
                        .iter()
                        .map(|p| (p.trustee_index, p.factors[q][a].factor))
                        .collect();
                    let plaintext = entry.beta - combine_factors(scheme, &factors);
                    table.lookup(&plaintext)
                })
                .collect::<Result<Vec<u64>, Error>>()
        })
        .collect()
}
