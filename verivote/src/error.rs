use crate::*;

use thiserror::Error;
use uuid::Uuid;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("verivote validation: election is not ready: {}", display_issues(.0))]
    Validation(Vec<Issue>),

    #[error("verivote: {operation} is not allowed while the election is {state}")]
    InvalidState {
        operation: &'static str,
        state: ElectionState,
    },

    #[error("verivote: ballot rejected: {0}")]
    BallotRejected(RejectReason),

    #[error("verivote: partial decryption from trustee {0} failed to verify")]
    InvalidPartialDecryption(Uuid),

    #[error("verivote: not enough partial decryptions: need {need}, found {have}")]
    InsufficientQuorum { need: usize, have: usize },

    #[error("verivote: proof generation failed: {0}")]
    ProofGeneration(&'static str),

    #[error("verivote: no vote count in 0..={bound} matches the decrypted tally")]
    DiscreteLogNotFound { bound: u64 },

    #[error("verivote: trustee {0} does not exist in election")]
    UnknownTrustee(Uuid),

    #[error("verivote: key commitment from trustee index {0} is invalid")]
    InvalidCommitment(usize),

    #[error("verivote: key share from trustee index {from} to {to} does not match its commitment")]
    InvalidKeyShare { from: usize, to: usize },

    #[error("verivote: duplicate trustee index {0}")]
    DuplicateTrusteeIndex(usize),

    #[error("verivote: the helios trustee requires the full trustee scheme")]
    HeliosTrusteeRequiresFullScheme,

    #[error("verivote: unknown record schema: {0}")]
    UnknownSchema(String),

    #[error("verivote: invalid record identifier: {0}")]
    BadIdentifier(String),

    #[error("verivote: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("verivote: CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("verivote: store error: {0}")]
    Store(#[from] StoreError),
}

/// Reasons a ballot can be turned away. The voter may correct and resubmit.
#[derive(Serialize, Deserialize, Debug, Error, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("malformed ciphertext")]
    MalformedCiphertext,

    #[error("proof verification failed")]
    ProofVerificationFailed,

    #[error("selection count out of bounds")]
    OutOfBoundsSelectionCount,

    #[error("election is not open for voting")]
    ElectionNotOpen,

    #[error("voter is not eligible")]
    VoterIneligible,
}

impl From<RejectReason> for Error {
    fn from(reason: RejectReason) -> Self {
        Error::BallotRejected(reason)
    }
}

fn display_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_issue() {
        let err = Error::Validation(vec![Issue::NoQuestions, Issue::NoTrustees]);
        let msg = err.to_string();
        assert!(msg.contains("no questions defined"));
        assert!(msg.contains("no trustees defined"));
    }

    #[test]
    fn reject_reason_converts() {
        let err: Error = RejectReason::VoterIneligible.into();
        match err {
            Error::BallotRejected(RejectReason::VoterIneligible) => {}
            other => panic!("unexpected error: {}", other),
        }
    }
}
