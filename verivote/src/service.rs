use crate::*;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, TryLockError};
use uuid::Uuid;

/// Runs one election for concurrent callers.
///
/// Ballots are accepted under the read lock, serialized per voter, so independent
/// voters proceed in parallel. Every other operation is a transition: it takes the
/// write lock, and only one transition runs at a time. A transition that finds
/// another in flight fails with `InvalidState` instead of queueing.
///
/// Each transition and each accepted ballot is persisted through the injected store
/// together with any new audit entries.
pub struct ElectionService {
    election: RwLock<Election>,
    transition: Mutex<()>,
    voter_locks: Mutex<HashMap<VoterId, Arc<Mutex<()>>>>,

    /// State after the last transition, readable while one holds the write lock.
    last_state: Mutex<ElectionState>,

    /// Next audit sequence number not yet written to the store.
    persisted_audit: Mutex<u64>,

    eligibility: Arc<dyn EligibilityOracle>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl ElectionService {
    pub fn new(
        election: Election,
        eligibility: Arc<dyn EligibilityOracle>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let state = election.state();
        let service = ElectionService {
            election: RwLock::new(election),
            transition: Mutex::new(()),
            voter_locks: Mutex::new(HashMap::new()),
            last_state: Mutex::new(state),
            persisted_audit: Mutex::new(0),
            eligibility,
            notifier,
            store,
            config,
        };

        let snapshot = service.read().clone();
        service.persist(&snapshot, true)?;
        Ok(service)
    }

    /// Resume an election previously persisted in `store`.
    pub fn load(
        election_id: Uuid,
        eligibility: Arc<dyn EligibilityOracle>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let election = store.load_election(election_id)?;
        let persisted = election.audit_log().len() as u64;
        let state = election.state();

        Ok(ElectionService {
            election: RwLock::new(election),
            transition: Mutex::new(()),
            voter_locks: Mutex::new(HashMap::new()),
            last_state: Mutex::new(state),
            persisted_audit: Mutex::new(persisted),
            eligibility,
            notifier,
            store,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read access to the election.
    pub fn read(&self) -> RwLockReadGuard<'_, Election> {
        self.election.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn election_id(&self) -> Uuid {
        self.read().id
    }

    pub fn state(&self) -> ElectionState {
        self.read().state()
    }

    pub fn issues_before_freeze(&self) -> Vec<Issue> {
        self.read().issues_before_freeze()
    }

    /// State without waiting on a transition in flight.
    fn current_state(&self) -> ElectionState {
        match self.election.try_read() {
            Ok(election) => election.state(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().state(),
            Err(TryLockError::WouldBlock) => *self.last_state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn voter_lock(&self, voter: &VoterId) -> Arc<Mutex<()>> {
        let mut locks = self.voter_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(voter.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the voter's lock entry unless another submission still holds it.
    fn release_voter_lock(&self, voter: &VoterId, lock: Arc<Mutex<()>>) {
        let mut locks = self.voter_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(voter);
        }
    }

    fn persist_audit(&self, election: &Election) -> Result<(), Error> {
        let mut persisted = self.persisted_audit.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in election.audit_log().entries_since(*persisted) {
            let seq = entry.seq;
            self.store.put(&Record::AuditEntry {
                election_id: election.id,
                entry,
            })?;
            *persisted = seq + 1;
        }
        Ok(())
    }

    fn persist(&self, snapshot: &Election, include_election: bool) -> Result<(), Error> {
        if include_election {
            self.store.put(&Record::Election(Box::new(snapshot.clone())))?;
        }
        self.persist_audit(snapshot)
    }

    fn notify(&self, voter: &VoterId, event: &NotificationEvent) {
        if let Err(e) = self.notifier.notify(voter, event) {
            warn!("notification to {} failed: {}", voter, e);
        }
    }

    /// Run `f` as an exclusive transition, then persist the result.
    fn transition<T, F>(&self, operation: &'static str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Election) -> Result<T, Error>,
    {
        let _gate = match self.transition.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(Error::InvalidState {
                    operation,
                    state: self.current_state(),
                })
            }
        };

        let (outcome, snapshot) = {
            let mut election = self.election.write().unwrap_or_else(PoisonError::into_inner);
            let outcome = f(&mut *election);
            (outcome, election.clone())
        };
        *self.last_state.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.state();

        // Failed transitions can still leave audit entries behind
        self.persist(&snapshot, outcome.is_ok())?;
        let out = outcome?;
        info!("election {}: {} done, now {}", snapshot.id, operation, snapshot.state());
        Ok(out)
    }

    /// Apply a setup change (questions, voters, trustees, ...).
    pub fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Election) -> Result<T, Error>,
    {
        self.transition("update", f)
    }

    pub fn freeze(&self) -> Result<(), Error> {
        self.transition("freeze", |election| {
            election.freeze()?;
            for trustee in election.trustees() {
                self.store.put(&Record::Trustee(trustee.clone()))?;
            }
            Ok(())
        })
    }

    pub fn close_voting(&self) -> Result<(), Error> {
        self.transition("close_voting", |election| election.close_voting())
    }

    /// Validate, persist and accept a ballot. Calls for the same voter are serialized.
    ///
    /// The ballot only enters the ballot box once the store holds it.
    pub fn submit_ballot(&self, voter: VoterId, ballot: EncryptedBallot) -> Result<CastReceipt, Error> {
        let lock = self.voter_lock(&voter);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.accept(&voter, ballot)
        };
        self.release_voter_lock(&voter, lock);
        let cast = outcome?;

        let receipt = CastReceipt::from(&cast);
        self.notify(
            &voter,
            &NotificationEvent::BallotAccepted {
                receipt: receipt.clone(),
            },
        );
        Ok(receipt)
    }

    fn accept(&self, voter: &VoterId, ballot: EncryptedBallot) -> Result<CastBallot, Error> {
        let election = self.read();
        let outcome = election.accept_ballot_with(
            voter.clone(),
            ballot,
            self.eligibility.as_ref(),
            &self.config.limits,
            |cast| Ok(self.store.put(&Record::Ballot(cast.clone()))?),
        );
        self.persist_audit(&election)?;
        outcome
    }

    pub fn verify_receipt(&self, hash: &str) -> Option<CastBallot> {
        self.read().verify_receipt(hash)
    }

    pub fn compute_tally(&self) -> Result<Tally, Error> {
        let threshold = self.config.parallel_tally_threshold;
        let tally = self.transition("compute_tally", |election| {
            election.compute_tally(threshold).map(|t| t.clone())
        })?;
        self.store.put(&Record::Tally(tally.clone()))?;
        Ok(tally)
    }

    pub fn submit_partial_decryption(&self, partial: PartialDecryption) -> Result<(), Error> {
        let record = Record::PartialDecryption(partial.clone());
        self.transition("submit_partial_decryption", |election| {
            election.submit_partial_decryption(partial)
        })?;
        self.store.put(&record)?;
        Ok(())
    }

    /// Partial decryptions for every server-held trustee.
    pub fn helios_partial_decrypt<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<usize, Error> {
        let (submitted, partials) = self.transition("helios_partial_decrypt", |election| {
            let submitted = election.helios_partial_decrypt(rng)?;
            let partials: Vec<PartialDecryption> = election.partial_decryptions().cloned().collect();
            Ok((submitted, partials))
        })?;
        for partial in partials {
            self.store.put(&Record::PartialDecryption(partial))?;
        }
        Ok(submitted)
    }

    pub fn trustee_status(&self, trustee_id: Uuid) -> Result<TrusteeStatus, Error> {
        self.read().trustee_status(trustee_id)
    }

    pub fn combine_decryptions(&self) -> Result<(), Error> {
        self.transition("combine_decryptions", |election| election.combine_decryptions())
    }

    /// Release the result. The plaintext result reaches the store only here, ahead of
    /// the released snapshot.
    pub fn release_result(&self) -> Result<ElectionResult, Error> {
        let (result, voters) = self.transition("release_result", |election| {
            let result = election.combined_result()?;
            self.store.put(&Record::Result(result.clone()))?;
            election.release_result()?;
            let voters: Vec<VoterId> = election.ballot_box().current().into_iter().map(|b| b.voter).collect();
            Ok((result, voters))
        })?;

        let event = NotificationEvent::ResultReleased {
            election_id: result.election_id,
        };
        for voter in &voters {
            self.notify(voter, &event);
        }
        Ok(result)
    }

    pub fn result(&self) -> Result<ElectionResult, Error> {
        self.read().result().map(|r| r.clone())
    }

    pub fn archive(&self) -> Result<(), Error> {
        self.transition("archive", |election| election.archive())
    }
}
