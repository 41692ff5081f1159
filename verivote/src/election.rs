use crate::*;
use chrono::{DateTime, Utc};
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

const ADMIN: &str = "admin";
const SYSTEM: &str = "system";

/// Lifecycle of an election. States only ever move forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    Setup,
    Frozen,
    TallyComputed,
    DecryptionsCombined,
    ResultReleased,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ElectionState::Setup => "setup",
            ElectionState::Frozen => "frozen",
            ElectionState::TallyComputed => "tally_computed",
            ElectionState::DecryptionsCombined => "decryptions_combined",
            ElectionState::ResultReleased => "result_released",
        };
        write!(f, "{}", name)
    }
}

/// Something that has to be fixed before an election can be frozen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum Issue {
    NoQuestions,
    NoTrustees,
    NoVoters,
    InvalidQuestion { index: usize, short_name: String },
    QuorumUnreachable { quorum: usize, trustees: usize },
    InvalidTrusteeKeys { reason: String },
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Issue::NoQuestions => write!(f, "no questions defined"),
            Issue::NoTrustees => write!(f, "no trustees defined"),
            Issue::NoVoters => write!(f, "no voters and open registration is disabled"),
            Issue::InvalidQuestion { index, short_name } => write!(
                f,
                "question {} ({}) has no answers or unsatisfiable selection bounds",
                index, short_name
            ),
            Issue::QuorumUnreachable { quorum, trustees } => write!(
                f,
                "a quorum of {} cannot be reached with {} trustees",
                quorum, trustees
            ),
            Issue::InvalidTrusteeKeys { reason } => write!(f, "trustee keys are inconsistent: {}", reason),
        }
    }
}

/// An election and everything that happens to it.
///
/// Configuration (questions, voters, trustees) can only change during `Setup`. The
/// ballot box and audit log are internally synchronized so ballots can be accepted
/// through a shared reference; every other transition takes `&mut self`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Election {
    pub id: Uuid,
    pub short_name: String,
    pub name: String,

    params: ElectionParameters,
    questions: Vec<Question>,
    voters: BTreeSet<VoterId>,
    open_registration: bool,
    scheme: TrusteeScheme,
    trustees: Vec<Trustee>,
    state: ElectionState,

    /// Joint public key and verification keys, derived at freeze.
    public_keys: Option<PublicKeySet>,

    voting_ends_at: Option<DateTime<Utc>>,
    voting_closed_at: Option<DateTime<Utc>>,
    frozen_at: Option<DateTime<Utc>>,
    archived_at: Option<DateTime<Utc>>,

    tally: Option<Tally>,

    /// Verified partial decryptions by trustee id.
    partial_decryptions: BTreeMap<Uuid, PartialDecryption>,

    /// Only readable once released. Persisted as its own record at release.
    #[serde(skip)]
    result: Option<ElectionResult>,

    #[serde(skip)]
    ballot_box: BallotBox,

    #[serde(skip)]
    audit: AuditLog,
}

impl Election {
    /// Create a new election in `Setup`.
    ///
    /// The election id doubles as the proof context, so proofs made for one election
    /// never verify in another.
    pub fn new(short_name: &str, name: &str) -> Self {
        let id = Uuid::new_v4();
        let election = Election {
            id,
            short_name: short_name.to_owned(),
            name: name.to_owned(),
            params: ElectionParameters::new(id.to_string()),
            questions: vec![],
            voters: BTreeSet::new(),
            open_registration: false,
            scheme: TrusteeScheme::Full,
            trustees: vec![],
            state: ElectionState::Setup,
            public_keys: None,
            voting_ends_at: None,
            voting_closed_at: None,
            frozen_at: None,
            archived_at: None,
            tally: None,
            partial_decryptions: BTreeMap::new(),
            result: None,
            ballot_box: BallotBox::new(),
            audit: AuditLog::new(),
        };
        election
            .audit
            .append(ADMIN, AuditAction::ElectionCreated, format!("election {} created", short_name));
        election
    }

    /// Reattach a persisted ballot box, audit log and released result to an election
    /// snapshot.
    pub fn restore(
        mut snapshot: Election,
        ballots: Vec<CastBallot>,
        entries: Vec<AuditLogEntry>,
        result: Option<ElectionResult>,
    ) -> Self {
        snapshot.ballot_box = BallotBox::from_ballots(ballots);
        snapshot.audit = AuditLog::from_entries(entries);
        snapshot.result = result;
        snapshot
    }

    pub fn params(&self) -> &ElectionParameters {
        &self.params
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn voters(&self) -> &BTreeSet<VoterId> {
        &self.voters
    }

    pub fn open_registration(&self) -> bool {
        self.open_registration
    }

    pub fn scheme(&self) -> TrusteeScheme {
        self.scheme
    }

    pub fn trustees(&self) -> &[Trustee] {
        &self.trustees
    }

    /// Get a trustee with the given ID
    pub fn get_trustee(&self, trustee_id: Uuid) -> Option<&Trustee> {
        self.trustees.iter().find(|t| t.id == trustee_id)
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_keys.as_ref().map(|k| &k.public_key)
    }

    pub fn public_keys(&self) -> Option<&PublicKeySet> {
        self.public_keys.as_ref()
    }

    pub fn voting_ends_at(&self) -> Option<DateTime<Utc>> {
        self.voting_ends_at
    }

    pub fn voting_closed_at(&self) -> Option<DateTime<Utc>> {
        self.voting_closed_at
    }

    pub fn frozen_at(&self) -> Option<DateTime<Utc>> {
        self.frozen_at
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn tally(&self) -> Option<&Tally> {
        self.tally.as_ref()
    }

    pub fn partial_decryptions(&self) -> impl Iterator<Item = &PartialDecryption> {
        self.partial_decryptions.values()
    }

    pub fn ballot_box(&self) -> &BallotBox {
        &self.ballot_box
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    fn require(&self, operation: &'static str, state: ElectionState) -> Result<(), Error> {
        if self.state != state {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    // Setup
    // -----

    pub fn add_question(&mut self, question: Question) -> Result<(), Error> {
        self.require("add_question", ElectionState::Setup)?;
        self.audit.append(
            ADMIN,
            AuditAction::ElectionUpdated,
            format!("question {} added", question.short_name),
        );
        self.questions.push(question);
        Ok(())
    }

    pub fn set_questions(&mut self, questions: Vec<Question>) -> Result<(), Error> {
        self.require("set_questions", ElectionState::Setup)?;
        self.audit.append(
            ADMIN,
            AuditAction::ElectionUpdated,
            format!("{} questions set", questions.len()),
        );
        self.questions = questions;
        Ok(())
    }

    pub fn add_voter(&mut self, voter: VoterId) -> Result<(), Error> {
        self.require("add_voter", ElectionState::Setup)?;
        self.audit
            .append(ADMIN, AuditAction::ElectionUpdated, format!("voter {} added", voter));
        self.voters.insert(voter);
        Ok(())
    }

    /// Returns whether the voter was on the roster.
    pub fn remove_voter(&mut self, voter: &VoterId) -> Result<bool, Error> {
        self.require("remove_voter", ElectionState::Setup)?;
        let removed = self.voters.remove(voter);
        if removed {
            self.audit
                .append(ADMIN, AuditAction::ElectionUpdated, format!("voter {} removed", voter));
        }
        Ok(removed)
    }

    pub fn set_open_registration(&mut self, open: bool) -> Result<(), Error> {
        self.require("set_open_registration", ElectionState::Setup)?;
        self.audit.append(
            ADMIN,
            AuditAction::ElectionUpdated,
            format!("open registration {}", if open { "enabled" } else { "disabled" }),
        );
        self.open_registration = open;
        Ok(())
    }

    pub fn set_trustee_scheme(&mut self, scheme: TrusteeScheme) -> Result<(), Error> {
        self.require("set_trustee_scheme", ElectionState::Setup)?;
        self.audit.append(
            ADMIN,
            AuditAction::ElectionUpdated,
            format!("trustee scheme set to {:?}", scheme),
        );
        self.scheme = scheme;
        Ok(())
    }

    pub fn set_voting_ends_at(&mut self, ends_at: Option<DateTime<Utc>>) -> Result<(), Error> {
        self.require("set_voting_ends_at", ElectionState::Setup)?;
        self.voting_ends_at = ends_at;
        Ok(())
    }

    fn push_trustee(&mut self, trustee: Trustee) -> Result<Uuid, Error> {
        if self.trustees.iter().any(|t| t.index == trustee.index) {
            return Err(Error::DuplicateTrusteeIndex(trustee.index));
        }
        self.audit.append(
            ADMIN,
            AuditAction::TrusteeAdded,
            format!(
                "trustee {} ({}) added at index {}{}",
                trustee.id,
                trustee.name,
                trustee.index,
                if trustee.is_server_held() { ", server held" } else { "" }
            ),
        );
        let id = trustee.id;
        self.trustees.push(trustee);
        Ok(id)
    }

    /// Register a trustee by its published key commitment.
    pub fn add_trustee(&mut self, name: &str, commitment: KeygenCommitment) -> Result<Uuid, Error> {
        self.require("add_trustee", ElectionState::Setup)?;
        let trustee = Trustee::new(self.id, commitment.index, name, commitment);
        self.push_trustee(trustee)
    }

    /// Register a trustee whose key share the server keeps.
    pub fn add_helios_trustee(
        &mut self,
        name: &str,
        commitment: KeygenCommitment,
        key: TrusteeKey,
    ) -> Result<Uuid, Error> {
        self.require("add_helios_trustee", ElectionState::Setup)?;
        if key.index != commitment.index {
            return Err(Error::InvalidCommitment(commitment.index));
        }
        let mut trustee = Trustee::new(self.id, commitment.index, name, commitment);
        trustee.custody = Custody::Server { key };
        self.push_trustee(trustee)
    }

    /// Generate a fresh server-held trustee key at the next free index.
    ///
    /// Only possible under the full scheme: a threshold share needs fragments from
    /// every other trustee, which goes through `add_helios_trustee` instead.
    pub fn generate_helios_trustee<R: RngCore + CryptoRng>(
        &mut self,
        name: &str,
        rng: &mut R,
    ) -> Result<Uuid, Error> {
        self.require("generate_helios_trustee", ElectionState::Setup)?;
        if self.scheme != TrusteeScheme::Full {
            return Err(Error::HeliosTrusteeRequiresFullScheme);
        }

        let index = self.trustees.iter().map(|t| t.index).max().unwrap_or(0) + 1;
        let generator = TrusteeKeyGenerator::new(index, TrusteeScheme::Full, rng)?;
        let commitment = generator.commitment(&self.params, rng);
        let key = generator.finish(&self.params, TrusteeScheme::Full, &[], &[])?;

        self.add_helios_trustee(name, commitment, key)
    }

    /// Everything preventing `freeze()`. Empty exactly when freezing would succeed.
    pub fn issues_before_freeze(&self) -> Vec<Issue> {
        let mut issues = Vec::new();

        if self.questions.is_empty() {
            issues.push(Issue::NoQuestions);
        }
        for (index, question) in self.questions.iter().enumerate() {
            if !question.is_well_formed() {
                issues.push(Issue::InvalidQuestion {
                    index,
                    short_name: question.short_name.clone(),
                });
            }
        }

        if self.trustees.is_empty() {
            issues.push(Issue::NoTrustees);
        }

        if self.voters.is_empty() && !self.open_registration {
            issues.push(Issue::NoVoters);
        }

        if !self.trustees.is_empty() {
            let trustees = self.trustees.len();
            let quorum = self.scheme.quorum(trustees);
            if quorum == 0 || quorum > trustees {
                issues.push(Issue::QuorumUnreachable { quorum, trustees });
            } else if let Err(e) = self.derive_public_keys() {
                issues.push(Issue::InvalidTrusteeKeys { reason: e.to_string() });
            }
        }

        issues
    }

    fn derive_public_keys(&self) -> Result<PublicKeySet, Error> {
        let commitments: Vec<KeygenCommitment> = self.trustees.iter().map(|t| t.commitment.clone()).collect();
        PublicKeySet::from_commitments(&self.params, self.scheme, &commitments)
    }

    /// Lock the configuration and derive the election key.
    pub fn freeze(&mut self) -> Result<(), Error> {
        self.require("freeze", ElectionState::Setup)?;

        let issues = self.issues_before_freeze();
        if !issues.is_empty() {
            return Err(Error::Validation(issues));
        }

        self.public_keys = Some(self.derive_public_keys()?);
        self.state = ElectionState::Frozen;
        self.frozen_at = Some(Utc::now());
        self.audit.append(
            ADMIN,
            AuditAction::Frozen,
            format!(
                "{} questions, {} trustees, {} voters",
                self.questions.len(),
                self.trustees.len(),
                self.voters.len()
            ),
        );
        Ok(())
    }

    // Voting
    // ------

    /// Whether ballots are accepted at `now`.
    pub fn voting_open_at(&self, now: DateTime<Utc>) -> bool {
        self.state == ElectionState::Frozen
            && self.voting_closed_at.is_none()
            && self.voting_ends_at.map_or(true, |ends| now < ends)
    }

    pub fn is_voting_closed(&self) -> bool {
        self.voting_closed_at.is_some() || self.voting_ends_at.map_or(false, |ends| Utc::now() >= ends)
    }

    pub fn close_voting(&mut self) -> Result<(), Error> {
        self.require("close_voting", ElectionState::Frozen)?;
        if self.voting_closed_at.is_some() {
            return Err(Error::InvalidState {
                operation: "close_voting",
                state: self.state,
            });
        }

        self.voting_closed_at = Some(Utc::now());
        self.audit.append(
            ADMIN,
            AuditAction::VotingClosed,
            format!("{} ballots cast", self.ballot_box.len()),
        );
        Ok(())
    }

    fn validate_ballot(
        &self,
        voter: &VoterId,
        ballot: &EncryptedBallot,
        oracle: &dyn EligibilityOracle,
        limits: &BallotLimits,
    ) -> Result<(), RejectReason> {
        ballot.check_structure(self.id, &self.questions, limits)?;

        let public_key = match (&self.public_keys, self.voting_open_at(Utc::now())) {
            (Some(keys), true) => &keys.public_key,
            _ => return Err(RejectReason::ElectionNotOpen),
        };

        if !oracle.is_eligible(voter, self) || oracle.is_excluded(voter, self) {
            return Err(RejectReason::VoterIneligible);
        }

        ballot.check_selection_bounds(&self.questions)?;
        ballot.verify_proofs(&self.params, public_key)
    }

    /// Validate a ballot and append it to the ballot box, returning the cast ballot.
    ///
    /// Rejections are audited and leave the ballot box untouched. Callers are
    /// expected to serialize calls per voter.
    pub fn accept_ballot(
        &self,
        voter: VoterId,
        ballot: EncryptedBallot,
        oracle: &dyn EligibilityOracle,
        limits: &BallotLimits,
    ) -> Result<CastBallot, Error> {
        self.accept_ballot_with(voter, ballot, oracle, limits, |_| Ok(()))
    }

    /// As `accept_ballot`, but the ballot only enters the box once `persist` succeeds.
    pub fn accept_ballot_with<F>(
        &self,
        voter: VoterId,
        ballot: EncryptedBallot,
        oracle: &dyn EligibilityOracle,
        limits: &BallotLimits,
        persist: F,
    ) -> Result<CastBallot, Error>
    where
        F: FnOnce(&CastBallot) -> Result<(), Error>,
    {
        if let Err(reason) = self.validate_ballot(&voter, &ballot, oracle, limits) {
            warn!("election {}: ballot from {} rejected: {}", self.id, voter, reason);
            self.audit
                .append(voter.0.as_str(), AuditAction::BallotRejected, reason.to_string());
            return Err(reason.into());
        }

        let cast = self.ballot_box.append_with(voter.clone(), ballot, persist).map_err(|e| {
            warn!("election {}: ballot from {} not stored: {}", self.id, voter, e);
            e
        })?;
        debug!("election {}: ballot {} accepted as #{}", self.id, cast.hash, cast.seq);
        self.audit.append(
            cast.voter.0.as_str(),
            AuditAction::BallotAccepted,
            format!("ballot {} cast as #{}", cast.hash, cast.seq),
        );
        Ok(cast)
    }

    /// Validate and accept a ballot, returning the voter's receipt.
    pub fn cast_ballot(
        &self,
        voter: VoterId,
        ballot: EncryptedBallot,
        oracle: &dyn EligibilityOracle,
        limits: &BallotLimits,
    ) -> Result<CastReceipt, Error> {
        self.accept_ballot(voter, ballot, oracle, limits)
            .map(|cast| CastReceipt::from(&cast))
    }

    /// Find a cast ballot, current or superseded, by its receipt hash.
    pub fn verify_receipt(&self, hash: &str) -> Option<CastBallot> {
        self.ballot_box.find_by_hash(hash)
    }

    // Tallying and decryption
    // -----------------------

    /// Fold every voter's current ballot into the encrypted tally.
    pub fn compute_tally(&mut self, parallel_threshold: usize) -> Result<&Tally, Error> {
        self.require("compute_tally", ElectionState::Frozen)?;
        if !self.is_voting_closed() {
            return Err(Error::InvalidState {
                operation: "compute_tally",
                state: self.state,
            });
        }

        let ballots = self.ballot_box.current();
        let tally = Tally::compute(self.id, &self.questions, &ballots, parallel_threshold);
        self.audit.append(
            SYSTEM,
            AuditAction::TallyComputed,
            format!("{} ballots tallied", tally.num_tallied),
        );

        self.state = ElectionState::TallyComputed;
        Ok(self.tally.insert(tally))
    }

    /// Verify and keep a trustee's partial decryption.
    ///
    /// Resubmitting after a verified partial is a no-op. A failed verification only
    /// affects the submitting trustee.
    pub fn submit_partial_decryption(&mut self, partial: PartialDecryption) -> Result<(), Error> {
        self.require("submit_partial_decryption", ElectionState::TallyComputed)?;

        let trustee = self
            .get_trustee(partial.trustee_id)
            .ok_or(Error::UnknownTrustee(partial.trustee_id))?;
        let trustee_id = trustee.id;

        if self.partial_decryptions.contains_key(&trustee_id) {
            return Ok(());
        }

        let verified = match (&self.tally, &self.public_keys) {
            (Some(tally), Some(keys)) => {
                partial.trustee_index == trustee.index
                    && keys
                        .verification_key(trustee.index)
                        .map_or(false, |vk| partial.verify(&self.params, vk, tally))
            }
            _ => false,
        };

        let actor = format!("trustee:{}", trustee_id);
        if !verified {
            warn!("election {}: partial decryption from trustee {} rejected", self.id, trustee_id);
            self.audit.append(
                &actor,
                AuditAction::PartialDecryptionRejected,
                format!("trustee index {}", partial.trustee_index),
            );
            return Err(Error::InvalidPartialDecryption(trustee_id));
        }

        self.audit.append(
            &actor,
            AuditAction::PartialDecryptionAccepted,
            format!("trustee index {}", partial.trustee_index),
        );
        self.partial_decryptions.insert(trustee_id, partial);
        Ok(())
    }

    /// Partially decrypt for every server-held trustee that has not done so yet.
    /// Returns the number of partials submitted.
    pub fn helios_partial_decrypt<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<usize, Error> {
        self.require("helios_partial_decrypt", ElectionState::TallyComputed)?;

        let tally = match &self.tally {
            Some(tally) => tally,
            None => {
                return Err(Error::InvalidState {
                    operation: "helios_partial_decrypt",
                    state: self.state,
                })
            }
        };

        let mut partials = Vec::new();
        for trustee in &self.trustees {
            if self.partial_decryptions.contains_key(&trustee.id) {
                continue;
            }
            if let Some(key) = trustee.server_key() {
                partials.push(key.partial_decrypt(&self.params, trustee.id, tally, rng)?);
            }
        }

        let submitted = partials.len();
        for partial in partials {
            self.submit_partial_decryption(partial)?;
        }
        Ok(submitted)
    }

    pub fn trustee_status(&self, trustee_id: Uuid) -> Result<TrusteeStatus, Error> {
        if self.get_trustee(trustee_id).is_none() {
            return Err(Error::UnknownTrustee(trustee_id));
        }
        if self.partial_decryptions.contains_key(&trustee_id) {
            Ok(TrusteeStatus::PartialDecryptionSubmitted)
        } else {
            Ok(TrusteeStatus::KeyGenerated)
        }
    }

    fn decrypt_result(&self, operation: &'static str) -> Result<ElectionResult, Error> {
        let tally = match &self.tally {
            Some(tally) => tally,
            None => {
                return Err(Error::InvalidState {
                    operation,
                    state: self.state,
                })
            }
        };

        let partials: Vec<&PartialDecryption> = self.partial_decryptions.values().collect();
        let counts = decrypt_tally(&self.params, self.scheme, self.trustees.len(), tally, &partials)?;
        Ok(ElectionResult::new(self.id, &self.questions, counts, tally.num_tallied))
    }

    /// Combine the verified partial decryptions into plaintext counts.
    pub fn combine_decryptions(&mut self) -> Result<(), Error> {
        self.require("combine_decryptions", ElectionState::TallyComputed)?;
        let result = self.decrypt_result("combine_decryptions")?;

        self.audit.append(
            SYSTEM,
            AuditAction::DecryptionsCombined,
            format!("{} partial decryptions available", self.partial_decryptions.len()),
        );
        self.result = Some(result);
        self.state = ElectionState::DecryptionsCombined;
        Ok(())
    }

    /// The combined result ahead of release.
    ///
    /// A reloaded snapshot never carries the result, so it is decrypted again from the
    /// tally and partial decryptions.
    pub(crate) fn combined_result(&mut self) -> Result<ElectionResult, Error> {
        self.require("release_result", ElectionState::DecryptionsCombined)?;
        match &self.result {
            Some(result) => Ok(result.clone()),
            None => {
                let result = self.decrypt_result("release_result")?;
                self.result = Some(result.clone());
                Ok(result)
            }
        }
    }

    pub fn release_result(&mut self) -> Result<(), Error> {
        self.combined_result()?;
        self.state = ElectionState::ResultReleased;
        self.audit
            .append(ADMIN, AuditAction::ResultReleased, "result released".to_owned());
        Ok(())
    }

    /// The plaintext result, once released.
    pub fn result(&self) -> Result<&ElectionResult, Error> {
        match (&self.result, self.state) {
            (Some(result), ElectionState::ResultReleased) => Ok(result),
            _ => Err(Error::InvalidState {
                operation: "result",
                state: self.state,
            }),
        }
    }

    pub fn archive(&mut self) -> Result<(), Error> {
        self.require("archive", ElectionState::ResultReleased)?;
        if self.archived_at.is_some() {
            return Err(Error::InvalidState {
                operation: "archive",
                state: self.state,
            });
        }
        self.archived_at = Some(Utc::now());
        self.audit.append(ADMIN, AuditAction::Archived, "archived".to_owned());
        Ok(())
    }
}
