use crate::*;
use indexmap::IndexMap;
use rayon::prelude::*;
use uuid::Uuid;

/// Encrypted per-question, per-answer totals.
///
/// Derived data: recomputing it from the same ballots always gives the same bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub election_id: Uuid,
    pub entries: Vec<Vec<Ciphertext>>,
    pub num_tallied: u64,
}

impl Tally {
    /// Fold ballots into a tally. Ballots must already have passed validation.
    ///
    /// Above `parallel_threshold` ballots the fold runs as a rayon map-reduce; the
    /// group is commutative so the split does not change the result.
    pub fn compute(
        election_id: Uuid,
        questions: &[Question],
        ballots: &[CastBallot],
        parallel_threshold: usize,
    ) -> Tally {
        let zero: Vec<Vec<Ciphertext>> = questions
            .iter()
            .map(|q| vec![Ciphertext::zero(); q.answers.len()])
            .collect();

        let entries = if ballots.len() > parallel_threshold {
            ballots
                .par_iter()
                .map(|cast| ballot_entries(&cast.ballot))
                .reduce(|| zero.clone(), add_entries)
        } else {
            ballots
                .iter()
                .map(|cast| ballot_entries(&cast.ballot))
                .fold(zero, add_entries)
        };

        Tally {
            election_id,
            entries,
            num_tallied: ballots.len() as u64,
        }
    }
}

fn ballot_entries(ballot: &EncryptedBallot) -> Vec<Vec<Ciphertext>> {
    ballot.answers.iter().map(|a| a.choices.clone()).collect()
}

fn add_entries(mut acc: Vec<Vec<Ciphertext>>, other: Vec<Vec<Ciphertext>>) -> Vec<Vec<Ciphertext>> {
    for (acc_q, other_q) in acc.iter_mut().zip(other) {
        for (a, b) in acc_q.iter_mut().zip(other_q) {
            *a += b;
        }
    }
    acc
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QuestionResult {
    pub short_name: String,

    /// Answer label to count, in answer order.
    pub totals: IndexMap<String, u64>,

    pub winners: Vec<String>,
}

/// Plaintext outcome of an election.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElectionResult {
    pub election_id: Uuid,
    pub num_ballots: u64,
    pub questions: Vec<QuestionResult>,
}

impl ElectionResult {
    pub fn new(election_id: Uuid, questions: &[Question], counts: Vec<Vec<u64>>, num_ballots: u64) -> Self {
        let questions = questions
            .iter()
            .zip(counts)
            .map(|(question, counts)| {
                let totals: IndexMap<String, u64> = question.answers.iter().cloned().zip(counts).collect();
                QuestionResult {
                    short_name: question.short_name.clone(),
                    winners: question.winners(&totals, num_ballots),
                    totals,
                }
            })
            .collect();

        ElectionResult {
            election_id,
            num_ballots,
            questions,
        }
    }

    pub fn question(&self, short_name: &str) -> Option<&QuestionResult> {
        self.questions.iter().find(|q| q.short_name == short_name)
    }
}
