use indexmap::IndexMap;

/// How the plaintext totals of a question are interpreted when picking winners.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// A winner needs more than half of the counted ballots.
    Absolute,
    /// The answers with the most selections win.
    Relative,
}

impl Default for ResultType {
    fn default() -> Self {
        ResultType::Absolute
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub short_name: String,
    pub question: String,

    /// Ordered answer labels. Ballot ciphertexts follow this order.
    pub answers: Vec<String>,

    /// Minimum number of selections.
    pub min: u32,

    /// Maximum number of selections; `None` means any number of answers (approval).
    pub max: Option<u32>,

    #[serde(default)]
    pub result_type: ResultType,

    /// Number of winners to report.
    #[serde(default = "default_winner_count")]
    pub winner_count: u32,
}

fn default_winner_count() -> u32 {
    1
}

impl Question {
    /// A question where exactly one of `answers` may be chosen, or none.
    pub fn new(short_name: &str, answers: &[&str]) -> Self {
        Question {
            short_name: short_name.to_owned(),
            question: short_name.to_owned(),
            answers: answers.iter().map(|a| (*a).to_owned()).collect(),
            min: 0,
            max: Some(1),
            result_type: ResultType::Absolute,
            winner_count: 1,
        }
    }

    pub fn with_bounds(mut self, min: u32, max: Option<u32>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    /// Effective upper bound on selections.
    pub fn max_selections(&self) -> u32 {
        let answers = self.answers.len() as u32;
        match self.max {
            Some(max) => max.min(answers),
            None => answers,
        }
    }

    /// Whether the bounds can be satisfied at all.
    pub fn is_well_formed(&self) -> bool {
        !self.answers.is_empty() && self.min <= self.max_selections()
    }

    /// Pick winners from plaintext totals (in answer order).
    ///
    /// `num_ballots` is the number of ballots that were tallied.
    pub fn winners(&self, totals: &IndexMap<String, u64>, num_ballots: u64) -> Vec<String> {
        let mut ranked: Vec<(&String, u64)> = totals.iter().map(|(a, c)| (a, *c)).collect();
        // Stable sort keeps answer order among ties
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        ranked
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .filter(|(_, count)| match self.result_type {
                ResultType::Absolute => *count * 2 > num_ballots,
                ResultType::Relative => true,
            })
            .take(self.winner_count as usize)
            .map(|(answer, _)| answer.clone())
            .collect()
    }
}
