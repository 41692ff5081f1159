use crate::*;
use chrono::{DateTime, Utc};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Opaque reference to a voter, resolved by the eligibility oracle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoterId(pub String);

impl std::fmt::Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        VoterId(id.to_owned())
    }
}

/// The encrypted selections for one question.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedAnswer {
    /// One ciphertext per answer, in answer order, each encrypting 0 or 1.
    pub choices: Vec<Ciphertext>,

    /// 0/1 proof for each entry of `choices`.
    pub individual_proofs: Vec<RangeProof>,

    /// Proof that the sum of `choices` lies within the question's selection bounds.
    pub overall_proof: RangeProof,
}

impl EncryptedAnswer {
    /// Encrypt selections for a question with `answer_count` answers and prove the
    /// selection count lies in `min..=max`.
    pub fn encrypt_with_range<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        public_key: &PublicKey,
        answer_count: usize,
        selected: &[usize],
        min: u32,
        max: u32,
        rng: &mut R,
    ) -> Result<Self, Error> {
        let mut marks = vec![false; answer_count];
        for &i in selected {
            match marks.get_mut(i) {
                Some(mark) => *mark = true,
                None => return Err(Error::ProofGeneration("selection outside the answer list")),
            }
        }

        let mut choices = Vec::with_capacity(answer_count);
        let mut individual_proofs = Vec::with_capacity(answer_count);
        let mut r_sum = Scalar::zero();
        let mut count = 0u32;

        for mark in marks {
            let value = mark as u32;
            let (ciphertext, r) = public_key.encrypt(params, value as u64, rng);
            let proof = RangeProof::prove(params, public_key, &ciphertext, value, &r, 0, 1, rng)?;
            choices.push(ciphertext);
            individual_proofs.push(proof);
            r_sum += r;
            count += value;
        }

        let sum = sum_ciphertexts(&choices);
        let overall_proof = RangeProof::prove(params, public_key, &sum, count, &r_sum, min, max, rng)?;

        Ok(EncryptedAnswer {
            choices,
            individual_proofs,
            overall_proof,
        })
    }

    /// Encrypt selections for `question` with its own bounds.
    pub fn encrypt<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        public_key: &PublicKey,
        question: &Question,
        selected: &[usize],
        rng: &mut R,
    ) -> Result<Self, Error> {
        EncryptedAnswer::encrypt_with_range(
            params,
            public_key,
            question.answers.len(),
            selected,
            question.min,
            question.max_selections(),
            rng,
        )
    }

    /// Homomorphic sum of all choices: an encryption of the selection count.
    pub fn sum(&self) -> Ciphertext {
        sum_ciphertexts(&self.choices)
    }
}

fn sum_ciphertexts(ciphertexts: &[Ciphertext]) -> Ciphertext {
    ciphertexts.iter().fold(Ciphertext::zero(), |acc, c| acc + *c)
}

/// A voter's encrypted ballot. Immutable once cast.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBallot {
    pub election_id: Uuid,
    pub answers: Vec<EncryptedAnswer>,
}

impl EncryptedBallot {
    /// Encrypt one list of selected answer indices per question.
    pub fn encrypt<R: RngCore + CryptoRng>(
        params: &ElectionParameters,
        public_key: &PublicKey,
        election_id: Uuid,
        questions: &[Question],
        selections: &[Vec<usize>],
        rng: &mut R,
    ) -> Result<Self, Error> {
        if questions.len() != selections.len() {
            return Err(Error::ProofGeneration("one selection list is needed per question"));
        }

        let answers = questions
            .iter()
            .zip(selections)
            .map(|(question, selected)| EncryptedAnswer::encrypt(params, public_key, question, selected, rng))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncryptedBallot { election_id, answers })
    }

    /// Receipt hash: SHA-256 hex of the canonical encoding.
    pub fn hash(&self) -> String {
        content_hash(self)
    }

    /// Shape checks. Cheap, and run before anything else so that oversized proofs
    /// never reach the group arithmetic.
    pub fn check_structure(
        &self,
        election_id: Uuid,
        questions: &[Question],
        limits: &BallotLimits,
    ) -> Result<(), RejectReason> {
        if self.election_id != election_id
            || self.answers.len() != questions.len()
            || self.answers.len() > limits.max_questions
        {
            return Err(RejectReason::MalformedCiphertext);
        }

        for (answer, question) in self.answers.iter().zip(questions) {
            let n = question.answers.len();
            if answer.choices.len() != n || n > limits.max_answers || answer.individual_proofs.len() != n {
                return Err(RejectReason::MalformedCiphertext);
            }

            let binary = |p: &RangeProof| p.min == 0 && p.branches.len() == 2;
            if !answer.individual_proofs.iter().all(binary) {
                return Err(RejectReason::MalformedCiphertext);
            }

            let overall = &answer.overall_proof;
            if overall.branches.is_empty()
                || overall.branches.len() > limits.max_proof_branches
                || overall.max().is_none()
            {
                return Err(RejectReason::MalformedCiphertext);
            }
        }

        Ok(())
    }

    /// Every overall proof must declare a range inside its question's bounds.
    pub fn check_selection_bounds(&self, questions: &[Question]) -> Result<(), RejectReason> {
        for (answer, question) in self.answers.iter().zip(questions) {
            let proof = &answer.overall_proof;
            let within = match proof.max() {
                Some(max) => proof.min >= question.min && max <= question.max_selections(),
                None => false,
            };
            if !within {
                return Err(RejectReason::OutOfBoundsSelectionCount);
            }
        }
        Ok(())
    }

    /// Verify every 0/1 proof and every overall proof.
    pub fn verify_proofs(&self, params: &ElectionParameters, public_key: &PublicKey) -> Result<(), RejectReason> {
        for answer in &self.answers {
            for (ciphertext, proof) in answer.choices.iter().zip(&answer.individual_proofs) {
                if !proof.verify(params, public_key, ciphertext) {
                    return Err(RejectReason::ProofVerificationFailed);
                }
            }
            if !answer.overall_proof.verify(params, public_key, &answer.sum()) {
                return Err(RejectReason::ProofVerificationFailed);
            }
        }
        Ok(())
    }
}

/// A ballot accepted into the ballot box.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CastBallot {
    pub seq: u64,
    pub voter: VoterId,
    pub ballot: EncryptedBallot,
    pub hash: String,
    pub cast_at: DateTime<Utc>,
}

/// Handed to the voter on acceptance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CastReceipt {
    pub hash: String,
    pub seq: u64,
    pub cast_at: DateTime<Utc>,
}

impl From<&CastBallot> for CastReceipt {
    fn from(cast: &CastBallot) -> Self {
        CastReceipt {
            hash: cast.hash.clone(),
            seq: cast.seq,
            cast_at: cast.cast_at,
        }
    }
}

#[derive(Debug, Default)]
struct BallotBoxInner {
    ballots: Vec<CastBallot>,
    current: BTreeMap<VoterId, usize>,
}

/// Append-only, totally ordered list of cast ballots.
///
/// Recasting appends a new ballot and moves the voter's "current" pointer; superseded
/// ballots stay in the box so their receipts remain verifiable.
#[derive(Debug, Default)]
pub struct BallotBox {
    inner: Mutex<BallotBoxInner>,
}

impl BallotBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted ballots.
    pub fn from_ballots(mut ballots: Vec<CastBallot>) -> Self {
        ballots.sort_by_key(|b| b.seq);
        let mut current = BTreeMap::new();
        for (i, cast) in ballots.iter().enumerate() {
            current.insert(cast.voter.clone(), i);
        }
        BallotBox {
            inner: Mutex::new(BallotBoxInner { ballots, current }),
        }
    }

    pub fn append(&self, voter: VoterId, ballot: EncryptedBallot) -> CastBallot {
        match self.append_with(voter, ballot, |_| Ok::<(), Infallible>(())) {
            Ok(cast) => cast,
            Err(never) => match never {},
        }
    }

    /// Append a ballot once `persist` has accepted it.
    ///
    /// `persist` runs under the box lock with the ballot's final sequence number. When
    /// it fails the box is left unchanged.
    pub fn append_with<E, F>(&self, voter: VoterId, ballot: EncryptedBallot, persist: F) -> Result<CastBallot, E>
    where
        F: FnOnce(&CastBallot) -> Result<(), E>,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let cast = CastBallot {
            seq: inner.ballots.len() as u64,
            hash: ballot.hash(),
            voter: voter.clone(),
            ballot,
            cast_at: Utc::now(),
        };
        persist(&cast)?;

        let position = inner.ballots.len();
        inner.ballots.push(cast.clone());
        inner.current.insert(voter, position);
        Ok(cast)
    }

    /// Latest ballot of every voter, in cast order.
    pub fn current(&self) -> Vec<CastBallot> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut positions: Vec<usize> = inner.current.values().copied().collect();
        positions.sort_unstable();
        positions.into_iter().map(|i| inner.ballots[i].clone()).collect()
    }

    /// Every ballot ever cast, superseded ones included.
    pub fn all(&self) -> Vec<CastBallot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).ballots.clone()
    }

    pub fn current_for(&self, voter: &VoterId) -> Option<CastBallot> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.current.get(voter).map(|&i| inner.ballots[i].clone())
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<CastBallot> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.ballots.iter().find(|b| b.hash == hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn voter_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).current.len()
    }
}

impl Clone for BallotBox {
    fn clone(&self) -> Self {
        BallotBox::from_ballots(self.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (ElectionParameters, PublicKey, Vec<Question>, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::from_seed([11; 32]);
        let params = ElectionParameters::new("ballot-tests");
        let pk = PublicKey(params.generator * Scalar::random(&mut rng));
        let questions = vec![
            Question::new("q1", &["a", "b", "c"]),
            Question::new("q2", &["x", "y"]).with_bounds(1, None),
        ];
        (params, pk, questions, rng)
    }

    #[test]
    fn encrypted_ballot_validates() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();
        let ballot = EncryptedBallot::encrypt(
            &params,
            &pk,
            election_id,
            &questions,
            &[vec![1], vec![0, 1]],
            &mut rng,
        )
        .unwrap();

        let limits = BallotLimits::default();
        assert_eq!(ballot.check_structure(election_id, &questions, &limits), Ok(()));
        assert_eq!(ballot.check_selection_bounds(&questions), Ok(()));
        assert_eq!(ballot.verify_proofs(&params, &pk), Ok(()));
    }

    #[test]
    fn selections_must_fit_question() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();

        // Two selections on a pick-one question
        assert!(EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![0, 1], vec![0]], &mut rng).is_err());

        // q2 requires at least one selection
        assert!(EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![0], vec![]], &mut rng).is_err());

        assert!(EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![5], vec![0]], &mut rng).is_err());
    }

    #[test]
    fn structure_problems_are_malformed() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();
        let limits = BallotLimits::default();
        let ballot =
            EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![], vec![0]], &mut rng).unwrap();

        assert_eq!(
            ballot.check_structure(Uuid::new_v4(), &questions, &limits),
            Err(RejectReason::MalformedCiphertext)
        );

        let mut missing = ballot.clone();
        missing.answers[0].choices.pop();
        assert_eq!(
            missing.check_structure(election_id, &questions, &limits),
            Err(RejectReason::MalformedCiphertext)
        );

        let tight = BallotLimits {
            max_proof_branches: 1,
            ..BallotLimits::default()
        };
        assert_eq!(
            ballot.check_structure(election_id, &questions, &tight),
            Err(RejectReason::MalformedCiphertext)
        );
    }

    #[test]
    fn swapped_ciphertext_fails_proofs() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();
        let mut ballot =
            EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![0], vec![1]], &mut rng).unwrap();

        ballot.answers[0].choices.swap(0, 1);
        assert_eq!(
            ballot.verify_proofs(&params, &pk),
            Err(RejectReason::ProofVerificationFailed)
        );
    }

    #[test]
    fn ballot_box_tracks_current_ballot() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();
        let mut encrypt = |sel: usize| {
            EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![sel], vec![0]], &mut rng).unwrap()
        };

        let bb = BallotBox::new();
        let first = bb.append(VoterId::from("alice"), encrypt(0));
        bb.append(VoterId::from("bob"), encrypt(1));
        let recast = bb.append(VoterId::from("alice"), encrypt(2));

        assert_eq!(bb.len(), 3);
        assert_eq!(bb.voter_count(), 2);
        let current: Vec<u64> = bb.current().iter().map(|b| b.seq).collect();
        assert_eq!(current, vec![1, 2]);
        assert_eq!(bb.current_for(&VoterId::from("alice")).unwrap().seq, recast.seq);
        assert!(bb.find_by_hash(&first.hash).is_some());

        let restored = BallotBox::from_ballots(bb.all());
        assert_eq!(restored.current_for(&VoterId::from("alice")).unwrap().hash, recast.hash);
    }

    #[test]
    fn failed_persist_leaves_box_unchanged() {
        let (params, pk, questions, mut rng) = setup();
        let election_id = Uuid::new_v4();
        let mut encrypt = |sel: usize| {
            EncryptedBallot::encrypt(&params, &pk, election_id, &questions, &[vec![sel], vec![0]], &mut rng).unwrap()
        };

        let bb = BallotBox::new();
        let first = bb.append(VoterId::from("alice"), encrypt(0));

        let failed = bb.append_with(VoterId::from("alice"), encrypt(1), |cast| {
            assert_eq!(cast.seq, 1);
            Err("disk full")
        });
        assert_eq!(failed.unwrap_err(), "disk full");
        assert_eq!(bb.len(), 1);
        assert_eq!(bb.current_for(&VoterId::from("alice")).unwrap().hash, first.hash);

        let persisted = bb.append_with(VoterId::from("bob"), encrypt(1), |_| Ok::<(), &str>(())).unwrap();
        assert_eq!(persisted.seq, 1);
        assert_eq!(bb.voter_count(), 2);
    }
}
