use std::sync::Arc;
use verivote::*;

pub fn command_e2e(matches: &clap::ArgMatches, config: EngineConfig) {
    let num_trustees: usize = parse_arg(matches, "trustees");
    let scheme = match matches.value_of("quorum") {
        Some(_) => TrusteeScheme::Threshold {
            quorum: parse_arg(matches, "quorum"),
        },
        None => TrusteeScheme::Full,
    };

    let answers = split_list(matches.value_of("answers").unwrap_or_default());
    let votes = split_list(matches.value_of("votes").unwrap_or_default());
    if answers.is_empty() {
        eprintln!("verivote e2e: at least one answer is required");
        std::process::exit(1);
    }

    let mut selections = Vec::with_capacity(votes.len());
    for vote in &votes {
        match answers.iter().position(|a| a == vote) {
            Some(index) => selections.push(index),
            None => {
                eprintln!("verivote e2e: vote {} is not one of the answers", vote);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(num_trustees, scheme, &answers, &selections, config) {
        eprintln!("verivote e2e: {}", e);
        std::process::exit(1);
    }
}

fn parse_arg<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T {
    let value = matches.value_of(name).unwrap_or_default();
    value.parse().unwrap_or_else(|_| {
        eprintln!("verivote e2e: invalid --{} {}", name, value);
        std::process::exit(1);
    })
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn run(
    num_trustees: usize,
    scheme: TrusteeScheme,
    answers: &[String],
    selections: &[usize],
    config: EngineConfig,
) -> Result<(), Error> {
    let mut rng = rand::thread_rng();

    let answer_refs: Vec<&str> = answers.iter().map(String::as_str).collect();
    let mut election = Election::new("e2e", "End-to-end election");
    election.add_question(Question::new("question", &answer_refs).with_result_type(ResultType::Relative))?;
    election.set_trustee_scheme(scheme)?;
    for i in 0..selections.len() {
        election.add_voter(VoterId(format!("voter-{}", i)))?;
    }

    let (commitments, keys) = KeyCeremony::run(election.params(), scheme, num_trustees, &mut rng)?;
    let mut trustee_ids = Vec::with_capacity(num_trustees);
    for commitment in commitments {
        let name = format!("Trustee {}", commitment.index);
        trustee_ids.push(election.add_trustee(&name, commitment)?);
    }
    println!("> Election {} created with {} trustees", election.id, num_trustees);

    let service = ElectionService::new(
        election,
        Arc::new(RosterEligibility),
        Arc::new(NullNotifier),
        Arc::new(MemStore::new()),
        config,
    )?;
    service.freeze()?;

    for (i, selection) in selections.iter().enumerate() {
        let ballot = {
            let election = service.read();
            let public_key = election.public_key().ok_or(Error::InvalidState {
                operation: "encrypt_ballot",
                state: election.state(),
            })?;
            EncryptedBallot::encrypt(
                election.params(),
                public_key,
                election.id,
                election.questions(),
                &[vec![*selection]],
                &mut rng,
            )?
        };
        let receipt = service.submit_ballot(VoterId(format!("voter-{}", i)), ballot)?;
        println!("  voter-{} receipt {}", i, receipt.hash);
    }

    service.close_voting()?;
    let tally = service.compute_tally()?;
    println!("> Tallied {} ballots", tally.num_tallied);

    let quorum = scheme.quorum(num_trustees);
    for (key, trustee_id) in keys.iter().zip(&trustee_ids).take(quorum) {
        let partial = key.partial_decrypt(service.read().params(), *trustee_id, &tally, &mut rng)?;
        service.submit_partial_decryption(partial)?;
    }
    service.combine_decryptions()?;
    let result = service.release_result()?;

    println!("Results:");
    for question in &result.questions {
        for (answer, count) in &question.totals {
            println!("  {} got {} votes", answer, count);
        }
        for winner in &question.winners {
            println!("  The winner is {}", winner);
        }
    }

    let election = service.read();
    println!(
        "> Audit log has {} entries, chain verified: {}",
        election.audit_log().len(),
        election.audit_log().verify_chain()
    );
    Ok(())
}
