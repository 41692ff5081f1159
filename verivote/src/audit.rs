use crate::*;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};

/// What happened. Detail text carries the specifics.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ElectionCreated,
    ElectionUpdated,
    TrusteeAdded,
    Frozen,
    VotingClosed,
    BallotAccepted,
    BallotRejected,
    TallyComputed,
    PartialDecryptionAccepted,
    PartialDecryptionRejected,
    DecryptionsCombined,
    ResultReleased,
    Archived,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            AuditAction::ElectionCreated => "election_created",
            AuditAction::ElectionUpdated => "election_updated",
            AuditAction::TrusteeAdded => "trustee_added",
            AuditAction::Frozen => "frozen",
            AuditAction::VotingClosed => "voting_closed",
            AuditAction::BallotAccepted => "ballot_accepted",
            AuditAction::BallotRejected => "ballot_rejected",
            AuditAction::TallyComputed => "tally_computed",
            AuditAction::PartialDecryptionAccepted => "partial_decryption_accepted",
            AuditAction::PartialDecryptionRejected => "partial_decryption_rejected",
            AuditAction::DecryptionsCombined => "decryptions_combined",
            AuditAction::ResultReleased => "result_released",
            AuditAction::Archived => "archived",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub detail: String,

    /// Hash of the previous entry, empty for the first one.
    pub prev_hash: String,

    /// SHA-256 over the canonical encoding of every other field.
    pub hash: String,
}

// Everything but the entry's own hash, in a fixed order
#[derive(Serialize)]
struct HashedFields<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    actor: &'a str,
    action: AuditAction,
    detail: &'a str,
    prev_hash: &'a str,
}

impl AuditLogEntry {
    fn compute_hash(&self) -> String {
        content_hash(&HashedFields {
            seq: self.seq,
            timestamp: &self.timestamp,
            actor: &self.actor,
            action: self.action,
            detail: &self.detail,
            prev_hash: &self.prev_hash,
        })
    }
}

/// Append-only, hash-chained log of everything that happened to one election.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries.
    pub fn from_entries(mut entries: Vec<AuditLogEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        AuditLog {
            entries: Mutex::new(entries),
        }
    }

    /// Append an entry and return a copy of it.
    pub fn append(&self, actor: &str, action: AuditAction, detail: impl Into<String>) -> AuditLogEntry {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let (seq, prev_hash) = match entries.last() {
            Some(last) => (last.seq + 1, last.hash.clone()),
            None => (0, String::new()),
        };

        let mut entry = AuditLogEntry {
            seq,
            timestamp: Utc::now(),
            actor: actor.to_owned(),
            action,
            detail: detail.into(),
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        info!(
            "audit #{} {} by {}: {}",
            entry.seq, entry.action, entry.actor, entry.detail
        );

        entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries with `seq >= from`.
    pub fn entries_since(&self, from: u64) -> Vec<AuditLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let start = entries.iter().position(|e| e.seq >= from).unwrap_or(entries.len());
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check sequence numbers, back-links and hashes of the whole chain.
    pub fn verify_chain(&self) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        verify_entries(&entries)
    }
}

impl Clone for AuditLog {
    fn clone(&self) -> Self {
        AuditLog::from_entries(self.entries())
    }
}

/// Verify a chain of entries obtained elsewhere (for example from a store).
pub fn verify_entries(entries: &[AuditLogEntry]) -> bool {
    let mut prev_hash = "";
    for (i, entry) in entries.iter().enumerate() {
        if entry.seq != i as u64 || entry.prev_hash != prev_hash {
            return false;
        }
        if entry.compute_hash() != entry.hash {
            return false;
        }
        prev_hash = &entry.hash;
    }
    true
}
