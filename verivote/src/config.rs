use std::env::var;
use std::str::FromStr;

/// Upper bounds enforced on a ballot before any proof is verified.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallotLimits {
    pub max_questions: usize,
    pub max_answers: usize,

    /// Most branches accepted in a single range proof.
    pub max_proof_branches: usize,
}

impl Default for BallotLimits {
    fn default() -> Self {
        BallotLimits {
            max_questions: 64,
            max_answers: 128,
            max_proof_branches: 256,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub limits: BallotLimits,

    /// Tallies over more ballots than this are folded in parallel.
    pub parallel_tally_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            limits: BallotLimits::default(),
            parallel_tally_threshold: 64,
        }
    }
}

impl EngineConfig {
    /// Read `VERIVOTE_*` environment variables, falling back to the defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();

        EngineConfig {
            limits: BallotLimits {
                max_questions: env_or("VERIVOTE_MAX_QUESTIONS", defaults.limits.max_questions),
                max_answers: env_or("VERIVOTE_MAX_ANSWERS", defaults.limits.max_answers),
                max_proof_branches: env_or(
                    "VERIVOTE_MAX_PROOF_BRANCHES",
                    defaults.limits.max_proof_branches,
                ),
            },
            parallel_tally_threshold: env_or(
                "VERIVOTE_PARALLEL_TALLY_THRESHOLD",
                defaults.parallel_tally_threshold,
            ),
        }
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match var(name) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(_e) => {
                warn!("{} is not a valid value ({}), using {}", name, val, default);
                default
            }
        },
        Err(_e) => default,
    }
}
