use super::*;
use chrono::{Duration, Utc};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use uuid::Uuid;

fn init_logging() {
    log4rs_test_utils::test_logging::init_logging_once_for(["verivote"], None, None);
}

struct Fixture {
    service: ElectionService,
    keys: Vec<TrusteeKey>,
    trustee_ids: Vec<Uuid>,
    queue: NotificationQueue,
}

// Three external trustees, any two of whom can decrypt
fn threshold_fixture(voters: &[&str], rng: &mut ChaCha20Rng) -> Fixture {
    let mut election = Election::new("board", "Board election");
    election.add_question(Question::new("chair", &["A", "B"])).unwrap();
    for voter in voters {
        election.add_voter(VoterId::from(*voter)).unwrap();
    }

    let scheme = TrusteeScheme::Threshold { quorum: 2 };
    election.set_trustee_scheme(scheme).unwrap();

    // Trustees run the key ceremony among themselves and publish commitments
    let (commitments, keys) = KeyCeremony::run(election.params(), scheme, 3, rng).unwrap();
    let trustee_ids = commitments
        .into_iter()
        .enumerate()
        .map(|(i, c)| election.add_trustee(&format!("Trustee {}", i + 1), c).unwrap())
        .collect();

    let (notifier, queue) = ChannelNotifier::new();
    let service = ElectionService::new(
        election,
        Arc::new(RosterEligibility),
        Arc::new(notifier),
        Arc::new(MemStore::new()),
        EngineConfig::default(),
    )
    .unwrap();

    Fixture {
        service,
        keys,
        trustee_ids,
        queue,
    }
}

fn ballot_for(service: &ElectionService, selections: &[Vec<usize>], rng: &mut ChaCha20Rng) -> EncryptedBallot {
    let election = service.read();
    EncryptedBallot::encrypt(
        election.params(),
        election.public_key().unwrap(),
        election.id,
        election.questions(),
        selections,
        rng,
    )
    .unwrap()
}

fn partial_for(
    service: &ElectionService,
    key: &TrusteeKey,
    trustee_id: Uuid,
    rng: &mut ChaCha20Rng,
) -> PartialDecryption {
    let election = service.read();
    key.partial_decrypt(election.params(), trustee_id, election.tally().unwrap(), rng)
        .unwrap()
}

#[test]
fn end_to_end_threshold_election() {
    init_logging();
    let mut rng = ChaCha20Rng::from_seed([100; 32]);
    let fixture = threshold_fixture(&["alice", "bob", "carol"], &mut rng);
    let service = &fixture.service;

    service.freeze().unwrap();

    // Votes: A, A, B
    for (voter, choice) in &[("alice", 0), ("bob", 0), ("carol", 1)] {
        let ballot = ballot_for(service, &[vec![*choice]], &mut rng);
        service.submit_ballot(VoterId::from(*voter), ballot).unwrap();
    }

    service.close_voting().unwrap();
    let tally = service.compute_tally().unwrap();
    assert_eq!(tally.num_tallied, 3);

    // Trustees 1 and 3 decrypt
    for &i in &[0, 2] {
        let partial = partial_for(service, &fixture.keys[i], fixture.trustee_ids[i], &mut rng);
        service.submit_partial_decryption(partial).unwrap();
    }
    assert_eq!(
        service.trustee_status(fixture.trustee_ids[1]).unwrap(),
        TrusteeStatus::KeyGenerated
    );
    assert_eq!(
        service.trustee_status(fixture.trustee_ids[2]).unwrap(),
        TrusteeStatus::PartialDecryptionSubmitted
    );

    service.combine_decryptions().unwrap();

    // Not readable until released
    assert!(service.result().is_err());

    let result = service.release_result().unwrap();
    let chair = result.question("chair").unwrap();
    assert_eq!(chair.totals["A"], 2);
    assert_eq!(chair.totals["B"], 1);
    assert_eq!(chair.winners, vec!["A".to_owned()]);
    assert_eq!(service.result().unwrap(), result);

    // Three acceptances, three release notices
    assert_eq!(fixture.queue.drain().len(), 6);

    service.archive().unwrap();
    assert!(service.read().archived_at().is_some());
    assert!(service.read().audit_log().verify_chain());
}

#[test]
fn freeze_without_questions_lists_the_issue() {
    let mut rng = ChaCha20Rng::from_seed([101; 32]);
    let mut election = Election::new("empty", "Empty");
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();

    match election.freeze() {
        Err(Error::Validation(issues)) => {
            assert_eq!(issues, vec![Issue::NoQuestions]);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let err = election.freeze().unwrap_err();
    assert!(err.to_string().contains("no questions defined"));
    assert_eq!(election.state(), ElectionState::Setup);
}

#[test]
fn recast_counts_only_the_latest_ballot() {
    let mut rng = ChaCha20Rng::from_seed([102; 32]);
    let fixture = threshold_fixture(&["alice", "bob"], &mut rng);
    let service = &fixture.service;
    service.freeze().unwrap();

    let first = service
        .submit_ballot(VoterId::from("alice"), ballot_for(service, &[vec![0]], &mut rng))
        .unwrap();
    let second = service
        .submit_ballot(VoterId::from("alice"), ballot_for(service, &[vec![1]], &mut rng))
        .unwrap();
    service
        .submit_ballot(VoterId::from("bob"), ballot_for(service, &[vec![0]], &mut rng))
        .unwrap();

    assert_ne!(first.hash, second.hash);
    assert!(first.seq < second.seq);

    // The superseded receipt still resolves
    let old = service.verify_receipt(&first.hash).unwrap();
    assert_eq!(old.voter, VoterId::from("alice"));

    service.close_voting().unwrap();
    let tally = service.compute_tally().unwrap();
    assert_eq!(tally.num_tallied, 2);

    for &i in &[0, 1] {
        let partial = partial_for(service, &fixture.keys[i], fixture.trustee_ids[i], &mut rng);
        service.submit_partial_decryption(partial).unwrap();
    }
    service.combine_decryptions().unwrap();
    let result = service.release_result().unwrap();

    let chair = result.question("chair").unwrap();
    assert_eq!(chair.totals["A"], 1);
    assert_eq!(chair.totals["B"], 1);
    assert!(chair.winners.is_empty());
}

#[test]
fn overlong_selection_proof_is_out_of_bounds() {
    let mut rng = ChaCha20Rng::from_seed([103; 32]);
    let fixture = threshold_fixture(&["alice"], &mut rng);
    let service = &fixture.service;
    service.freeze().unwrap();

    // Both answers selected, with an honest proof that the count is in 0..=2
    let ballot = {
        let election = service.read();
        let answer = EncryptedAnswer::encrypt_with_range(
            election.params(),
            election.public_key().unwrap(),
            2,
            &[0, 1],
            0,
            2,
            &mut rng,
        )
        .unwrap();
        EncryptedBallot {
            election_id: election.id,
            answers: vec![answer],
        }
    };

    match service.submit_ballot(VoterId::from("alice"), ballot) {
        Err(Error::BallotRejected(RejectReason::OutOfBoundsSelectionCount)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(service.read().ballot_box().is_empty());

    let last = service.read().audit_log().entries().pop().unwrap();
    assert_eq!(last.action, AuditAction::BallotRejected);
}

#[test]
fn forged_proof_is_rejected() {
    let mut rng = ChaCha20Rng::from_seed([104; 32]);
    let fixture = threshold_fixture(&["alice"], &mut rng);
    let service = &fixture.service;
    service.freeze().unwrap();

    let mut ballot = ballot_for(service, &[vec![0]], &mut rng);
    let other = ballot_for(service, &[vec![1]], &mut rng);
    ballot.answers[0].overall_proof = other.answers[0].overall_proof.clone();

    assert!(matches!(
        service.submit_ballot(VoterId::from("alice"), ballot),
        Err(Error::BallotRejected(RejectReason::ProofVerificationFailed))
    ));
}

#[test]
fn transitions_only_move_forward() {
    let mut rng = ChaCha20Rng::from_seed([105; 32]);
    let fixture = threshold_fixture(&["alice"], &mut rng);
    let service = &fixture.service;

    match service.compute_tally() {
        Err(Error::InvalidState { operation, state }) => {
            assert_eq!(operation, "compute_tally");
            assert_eq!(state, ElectionState::Setup);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    service.freeze().unwrap();

    // Voting is still open
    assert!(matches!(
        service.compute_tally(),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        service.combine_decryptions(),
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(service.archive(), Err(Error::InvalidState { .. })));

    service.close_voting().unwrap();
    assert!(service.close_voting().is_err());
    service.compute_tally().unwrap();
    assert!(service.freeze().is_err());
    assert_eq!(service.state(), ElectionState::TallyComputed);
}

#[test]
fn any_quorum_decrypts_and_one_fewer_does_not() {
    let mut rng = ChaCha20Rng::from_seed([106; 32]);
    let fixture = threshold_fixture(&["alice", "bob"], &mut rng);
    let service = &fixture.service;
    service.freeze().unwrap();

    service
        .submit_ballot(VoterId::from("alice"), ballot_for(service, &[vec![1]], &mut rng))
        .unwrap();
    service
        .submit_ballot(VoterId::from("bob"), ballot_for(service, &[vec![1]], &mut rng))
        .unwrap();
    service.close_voting().unwrap();
    let tally = service.compute_tally().unwrap();

    let partials: Vec<PartialDecryption> = (0..3)
        .map(|i| partial_for(service, &fixture.keys[i], fixture.trustee_ids[i], &mut rng))
        .collect();

    let params = service.read().params().clone();
    for pair in &[[0, 1], [0, 2], [1, 2]] {
        let chosen: Vec<&PartialDecryption> = pair.iter().map(|&i| &partials[i]).collect();
        let counts = decrypt_tally(&params, TrusteeScheme::Threshold { quorum: 2 }, 3, &tally, &chosen).unwrap();
        assert_eq!(counts, vec![vec![0, 2]]);
    }

    // Through the election: one partial is not enough, and is kept for the retry
    service.submit_partial_decryption(partials[1].clone()).unwrap();
    match service.combine_decryptions() {
        Err(Error::InsufficientQuorum { need, have }) => {
            assert_eq!(need, 2);
            assert_eq!(have, 1);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(service.state(), ElectionState::TallyComputed);

    service.submit_partial_decryption(partials[2].clone()).unwrap();
    service.combine_decryptions().unwrap();
    let result = service.release_result().unwrap();
    assert_eq!(result.question("chair").unwrap().totals["B"], 2);
}

#[test]
fn tally_is_independent_of_ballot_order() {
    let mut rng = ChaCha20Rng::from_seed([107; 32]);
    let params = ElectionParameters::new("order");
    let pk = PublicKey(params.generator * curve25519_dalek::scalar::Scalar::random(&mut rng));
    let election_id = Uuid::new_v4();
    let questions = vec![
        Question::new("q1", &["a", "b", "c"]),
        Question::new("q2", &["x", "y"]).with_bounds(0, None),
    ];

    let selections = [
        vec![vec![0], vec![0, 1]],
        vec![vec![2], vec![]],
        vec![vec![], vec![1]],
        vec![vec![1], vec![0]],
    ];
    let ballots: Vec<CastBallot> = selections
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let ballot = EncryptedBallot::encrypt(&params, &pk, election_id, &questions, s, &mut rng).unwrap();
            CastBallot {
                seq: i as u64,
                voter: VoterId(format!("v{}", i)),
                hash: ballot.hash(),
                ballot,
                cast_at: Utc::now(),
            }
        })
        .collect();

    let reference = canonical_bytes(&Tally::compute(election_id, &questions, &ballots, usize::MAX));

    let mut reversed = ballots.clone();
    reversed.reverse();
    let mut rotated = ballots.clone();
    rotated.rotate_left(1);
    let mut swapped = ballots.clone();
    swapped.swap(0, 2);

    for permutation in &[reversed, rotated, swapped] {
        assert_eq!(canonical_bytes(&Tally::compute(election_id, &questions, permutation, usize::MAX)), reference);
        assert_eq!(canonical_bytes(&Tally::compute(election_id, &questions, permutation, 1)), reference);
    }
}

#[test]
fn invalid_partial_only_affects_its_trustee() {
    let mut rng = ChaCha20Rng::from_seed([108; 32]);
    let fixture = threshold_fixture(&["alice"], &mut rng);
    let service = &fixture.service;
    service.freeze().unwrap();
    service
        .submit_ballot(VoterId::from("alice"), ballot_for(service, &[vec![0]], &mut rng))
        .unwrap();
    service.close_voting().unwrap();
    service.compute_tally().unwrap();

    // Trustee 2 submits a decryption made with trustee 1's key
    let bad = partial_for(service, &fixture.keys[0], fixture.trustee_ids[1], &mut rng);
    match service.submit_partial_decryption(bad) {
        Err(Error::InvalidPartialDecryption(id)) => assert_eq!(id, fixture.trustee_ids[1]),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(
        service.trustee_status(fixture.trustee_ids[1]).unwrap(),
        TrusteeStatus::KeyGenerated
    );

    // Unknown trustees are refused outright
    let stray = partial_for(service, &fixture.keys[0], Uuid::new_v4(), &mut rng);
    assert!(matches!(
        service.submit_partial_decryption(stray),
        Err(Error::UnknownTrustee(_))
    ));

    for &i in &[0, 2] {
        let partial = partial_for(service, &fixture.keys[i], fixture.trustee_ids[i], &mut rng);
        service.submit_partial_decryption(partial).unwrap();
    }
    service.combine_decryptions().unwrap();
    let result = service.release_result().unwrap();
    assert_eq!(result.question("chair").unwrap().totals["A"], 1);
}

#[test]
fn helios_trustee_uses_the_same_protocol() {
    let mut rng = ChaCha20Rng::from_seed([109; 32]);
    let mut election = Election::new("club", "Club election");
    election
        .add_question(Question::new("treasurer", &["Ann", "Ben", "Cat"]).with_result_type(ResultType::Relative))
        .unwrap();
    election.set_open_registration(true).unwrap();

    // One external trustee under the full scheme, plus the server
    let generator = TrusteeKeyGenerator::new(1, TrusteeScheme::Full, &mut rng).unwrap();
    let commitment = generator.commitment(election.params(), &mut rng);
    let external_key = generator
        .finish(election.params(), TrusteeScheme::Full, &[], &[])
        .unwrap();
    let external_id = election.add_trustee("Auditor", commitment).unwrap();
    let helios_id = election.generate_helios_trustee("Helios", &mut rng).unwrap();

    let service = ElectionService::new(
        election,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        Arc::new(MemStore::new()),
        EngineConfig::default(),
    )
    .unwrap();
    service.freeze().unwrap();

    for (i, choice) in [1, 1, 2, 0, 1].iter().enumerate() {
        let ballot = ballot_for(&service, &[vec![*choice]], &mut rng);
        service.submit_ballot(VoterId(format!("member-{}", i)), ballot).unwrap();
    }
    service.close_voting().unwrap();
    service.compute_tally().unwrap();

    assert_eq!(service.helios_partial_decrypt(&mut rng).unwrap(), 1);
    assert_eq!(
        service.trustee_status(helios_id).unwrap(),
        TrusteeStatus::PartialDecryptionSubmitted
    );

    // The full scheme needs every trustee
    assert!(matches!(
        service.combine_decryptions(),
        Err(Error::InsufficientQuorum { need: 2, have: 1 })
    ));

    let partial = partial_for(&service, &external_key, external_id, &mut rng);
    service.submit_partial_decryption(partial).unwrap();
    service.combine_decryptions().unwrap();

    let result = service.release_result().unwrap();
    let treasurer = result.question("treasurer").unwrap();
    assert_eq!(treasurer.totals.values().copied().collect::<Vec<u64>>(), vec![1, 3, 1]);
    assert_eq!(treasurer.winners, vec!["Ben".to_owned()]);
}

#[test]
fn concurrent_voters_are_all_counted() {
    let mut rng = ChaCha20Rng::from_seed([110; 32]);
    let mut election = Election::new("open", "Open election");
    election.add_question(Question::new("q", &["yes", "no"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();

    let service = Arc::new(
        ElectionService::new(
            election,
            Arc::new(RosterEligibility),
            Arc::new(NullNotifier),
            Arc::new(MemStore::new()),
            EngineConfig::default(),
        )
        .unwrap(),
    );
    service.freeze().unwrap();

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let service = service.clone();
            thread::spawn(move || {
                let mut rng = ChaCha20Rng::from_seed([i; 32]);
                let voter = VoterId(format!("voter-{}", i));
                // Each voter changes their mind once
                for choice in &[1, (i % 2) as usize] {
                    let ballot = ballot_for(&service, &[vec![*choice]], &mut rng);
                    service.submit_ballot(voter.clone(), ballot).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(service.read().ballot_box().len(), 16);
    let seqs: Vec<u64> = service.read().ballot_box().all().iter().map(|b| b.seq).collect();
    assert_eq!(seqs, (0..16).collect::<Vec<u64>>());

    service.close_voting().unwrap();
    service.compute_tally().unwrap();
    service.helios_partial_decrypt(&mut rng).unwrap();
    service.combine_decryptions().unwrap();
    let result = service.release_result().unwrap();

    let q = result.question("q").unwrap();
    assert_eq!(q.totals["yes"], 4);
    assert_eq!(q.totals["no"], 4);
    assert!(service.read().audit_log().verify_chain());
}

// Blocks the first election snapshot write until released
struct BlockingStore {
    inner: MemStore,
    blocks_on: RecordType,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Store for BlockingStore {
    fn put(&self, record: &Record) -> Result<(), StoreError> {
        if record.record_type() == self.blocks_on {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                let release = self.release.lock().unwrap().take().unwrap();
                release.recv().unwrap();
            }
        }
        self.inner.put(record)
    }

    fn get(&self, id: &RecordId) -> Result<Record, StoreError> {
        self.inner.get(id)
    }

    fn list(&self, election_id: Uuid, record_type: RecordType) -> Result<Vec<Record>, StoreError> {
        self.inner.list(election_id, record_type)
    }
}

#[test]
fn busy_transition_is_rejected() {
    let mut rng = ChaCha20Rng::from_seed([111; 32]);
    let mut election = Election::new("busy", "Busy");
    election.add_question(Question::new("q", &["a"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();

    let store = Arc::new(BlockingStore {
        inner: MemStore::new(),
        blocks_on: RecordType::Election,
        entered: Mutex::new(None),
        release: Mutex::new(None),
    });
    let service = Arc::new(
        ElectionService::new(
            election,
            Arc::new(RosterEligibility),
            Arc::new(NullNotifier),
            store.clone(),
            EngineConfig::default(),
        )
        .unwrap(),
    );

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    *store.entered.lock().unwrap() = Some(entered_tx);
    *store.release.lock().unwrap() = Some(release_rx);

    let freezing = {
        let service = service.clone();
        thread::spawn(move || service.freeze())
    };

    // The freeze is now persisting its snapshot
    entered_rx.recv().unwrap();
    match service.close_voting() {
        Err(Error::InvalidState { operation, .. }) => assert_eq!(operation, "close_voting"),
        other => panic!("unexpected result: {:?}", other),
    }

    release_tx.send(()).unwrap();
    freezing.join().unwrap().unwrap();
    service.close_voting().unwrap();
}

#[test]
fn busy_transition_reports_state_while_write_locked() {
    let mut rng = ChaCha20Rng::from_seed([115; 32]);
    let mut election = Election::new("busy", "Busy");
    election.add_question(Question::new("q", &["a"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();

    // Trustee records are written while the freeze still holds the election
    let store = Arc::new(BlockingStore {
        inner: MemStore::new(),
        blocks_on: RecordType::Trustee,
        entered: Mutex::new(None),
        release: Mutex::new(None),
    });
    let service = Arc::new(
        ElectionService::new(
            election,
            Arc::new(RosterEligibility),
            Arc::new(NullNotifier),
            store.clone(),
            EngineConfig::default(),
        )
        .unwrap(),
    );

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    *store.entered.lock().unwrap() = Some(entered_tx);
    *store.release.lock().unwrap() = Some(release_rx);

    let freezing = {
        let service = service.clone();
        thread::spawn(move || service.freeze())
    };

    entered_rx.recv().unwrap();
    match service.close_voting() {
        Err(Error::InvalidState { operation, state }) => {
            assert_eq!(operation, "close_voting");
            assert_eq!(state, ElectionState::Setup);
        }
        other => panic!("unexpected result: {:?}", other),
    }

    release_tx.send(()).unwrap();
    freezing.join().unwrap().unwrap();
    assert_eq!(service.state(), ElectionState::Frozen);
}

struct BallotRefusingStore {
    inner: MemStore,
}

impl Store for BallotRefusingStore {
    fn put(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::Ballot(_) => Err(StoreError::Backend("ballot table unavailable".to_owned())),
            other => self.inner.put(other),
        }
    }

    fn get(&self, id: &RecordId) -> Result<Record, StoreError> {
        self.inner.get(id)
    }

    fn list(&self, election_id: Uuid, record_type: RecordType) -> Result<Vec<Record>, StoreError> {
        self.inner.list(election_id, record_type)
    }
}

#[test]
fn unstored_ballot_is_never_tallied() {
    let mut rng = ChaCha20Rng::from_seed([116; 32]);
    let mut election = Election::new("refusing", "Refusing store");
    election.add_question(Question::new("q", &["a", "b"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();

    let store = Arc::new(BallotRefusingStore { inner: MemStore::new() });
    let service = ElectionService::new(
        election,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        store.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    service.freeze().unwrap();

    let ballot = ballot_for(&service, &[vec![0]], &mut rng);
    let hash = ballot.hash();
    match service.submit_ballot(VoterId::from("erin"), ballot) {
        Err(Error::Store(StoreError::Backend(_))) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(service.read().ballot_box().is_empty());
    assert!(service.verify_receipt(&hash).is_none());

    service.close_voting().unwrap();
    let tally = service.compute_tally().unwrap();
    assert_eq!(tally.num_tallied, 0);
    assert!(store.list(service.election_id(), RecordType::Ballot).unwrap().is_empty());
}

#[test]
fn combined_result_is_only_stored_on_release() {
    let mut rng = ChaCha20Rng::from_seed([117; 32]);
    let mut election = Election::new("sealed", "Sealed result");
    election.add_question(Question::new("q", &["a", "b"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();
    let election_id = election.id;

    let store: Arc<MemStore> = Arc::new(MemStore::new());
    {
        let service = ElectionService::new(
            election,
            Arc::new(RosterEligibility),
            Arc::new(NullNotifier),
            store.clone(),
            EngineConfig::default(),
        )
        .unwrap();
        service.freeze().unwrap();
        for voter in &["fay", "gus"] {
            let ballot = ballot_for(&service, &[vec![1]], &mut rng);
            service.submit_ballot(VoterId::from(*voter), ballot).unwrap();
        }
        service.close_voting().unwrap();
        service.compute_tally().unwrap();
        service.helios_partial_decrypt(&mut rng).unwrap();
        service.combine_decryptions().unwrap();
    }

    // The persisted snapshot carries no plaintext counts
    let snapshot_id = RecordId::new(election_id, RecordType::Election, None);
    let envelope = Envelope::from_bytes(&store.get_raw(&snapshot_id).unwrap()).unwrap();
    assert_eq!(envelope.body["state"], "decryptions_combined");
    assert!(envelope.body.get("result").is_none());
    assert!(!String::from_utf8(store.get_raw(&snapshot_id).unwrap()).unwrap().contains("totals"));
    assert!(matches!(store.get_result(election_id), Err(StoreError::NotFound(_))));

    let service = ElectionService::load(
        election_id,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        store.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    assert!(service.result().is_err());

    let result = service.release_result().unwrap();
    assert_eq!(result.question("q").unwrap().totals["b"], 2);
    assert_eq!(store.get_result(election_id).unwrap(), result);

    let reloaded = ElectionService::load(
        election_id,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        store,
        EngineConfig::default(),
    )
    .unwrap();
    assert_eq!(reloaded.result().unwrap(), result);
}

#[test]
fn expired_voting_window_rejects_ballots() {
    let mut rng = ChaCha20Rng::from_seed([112; 32]);
    let fixture = threshold_fixture(&["alice"], &mut rng);
    let service = &fixture.service;
    service
        .update(|election| election.set_voting_ends_at(Some(Utc::now() - Duration::hours(1))))
        .unwrap();
    service.freeze().unwrap();

    let ballot = ballot_for(service, &[vec![0]], &mut rng);
    assert!(matches!(
        service.submit_ballot(VoterId::from("alice"), ballot),
        Err(Error::BallotRejected(RejectReason::ElectionNotOpen))
    ));

    // The deadline closes voting without an explicit close
    let tally = service.compute_tally().unwrap();
    assert_eq!(tally.num_tallied, 0);
}

#[test]
fn ineligible_and_excluded_voters_are_rejected() {
    struct Excluding;

    impl EligibilityOracle for Excluding {
        fn is_eligible(&self, _voter: &VoterId, _election: &Election) -> bool {
            true
        }

        fn is_excluded(&self, voter: &VoterId, _election: &Election) -> bool {
            voter.0 == "eve"
        }
    }

    let mut rng = ChaCha20Rng::from_seed([113; 32]);
    let mut election = Election::new("excl", "Exclusions");
    election.add_question(Question::new("q", &["a", "b"])).unwrap();
    election.add_voter(VoterId::from("alice")).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();
    election.freeze().unwrap();

    let ballot = EncryptedBallot::encrypt(
        election.params(),
        election.public_key().unwrap(),
        election.id,
        election.questions(),
        &[vec![0]],
        &mut rng,
    )
    .unwrap();

    let limits = BallotLimits::default();
    assert!(matches!(
        election.cast_ballot(VoterId::from("eve"), ballot.clone(), &Excluding, &limits),
        Err(Error::BallotRejected(RejectReason::VoterIneligible))
    ));
    assert!(matches!(
        election.cast_ballot(VoterId::from("zed"), ballot.clone(), &RosterEligibility, &limits),
        Err(Error::BallotRejected(RejectReason::VoterIneligible))
    ));
    let receipt = election
        .cast_ballot(VoterId::from("alice"), ballot, &RosterEligibility, &limits)
        .unwrap();
    assert_eq!(receipt.seq, 0);
}

#[test]
fn persisted_election_survives_reload() {
    let mut rng = ChaCha20Rng::from_seed([114; 32]);
    let mut election = Election::new("persist", "Persisted");
    election.add_question(Question::new("q", &["a", "b"])).unwrap();
    election.set_open_registration(true).unwrap();
    election.generate_helios_trustee("Helios", &mut rng).unwrap();
    let election_id = election.id;

    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let receipt = {
        let service = ElectionService::new(
            election,
            Arc::new(RosterEligibility),
            Arc::new(NullNotifier),
            store.clone(),
            EngineConfig::default(),
        )
        .unwrap();
        service.freeze().unwrap();
        let ballot = ballot_for(&service, &[vec![1]], &mut rng);
        service.submit_ballot(VoterId::from("dora"), ballot).unwrap()
    };

    let service = ElectionService::load(
        election_id,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        store.clone(),
        EngineConfig::default(),
    )
    .unwrap();
    assert!(service.verify_receipt(&receipt.hash).is_some());

    service.close_voting().unwrap();
    service.compute_tally().unwrap();
    service.helios_partial_decrypt(&mut rng).unwrap();
    service.combine_decryptions().unwrap();
    let result = service.release_result().unwrap();
    assert_eq!(result.question("q").unwrap().totals["b"], 1);

    let entries: Vec<AuditLogEntry> = store
        .list(election_id, RecordType::AuditEntry)
        .unwrap()
        .into_iter()
        .map(|r| std::convert::TryFrom::try_from(r).unwrap())
        .collect();
    assert!(verify_entries(&entries));
    assert_eq!(entries.len(), service.read().audit_log().len());
}
