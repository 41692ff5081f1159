use crate::*;
use uuid::Uuid;

/// Where a trustee's secret share lives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Custody {
    /// Held by the trustee; the engine only sees the public commitment.
    External,

    /// Held by the server (the "helios trustee"). Decrypts through the exact same
    /// partial-decryption protocol as everyone else.
    Server { key: TrusteeKey },
}

impl Default for Custody {
    fn default() -> Self {
        Custody::External
    }
}

/// A trustee is responsible for safeguarding a share of the election decryption key.
///
/// Trustees are indexed from 1 in registration order. The index is the point at which
/// the trustee's key share is evaluated, so it also drives Lagrange interpolation when
/// decryptions are combined.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Trustee {
    pub id: Uuid,
    pub election_id: Uuid,
    pub index: usize,
    pub name: String,

    /// Published Feldman commitments and proof of knowledge.
    pub commitment: KeygenCommitment,

    #[serde(default)]
    pub custody: Custody,
}

impl Trustee {
    pub fn new(election_id: Uuid, index: usize, name: &str, commitment: KeygenCommitment) -> Self {
        Trustee {
            id: Uuid::new_v4(),
            election_id,
            index,
            name: name.to_owned(),
            commitment,
            custody: Custody::External,
        }
    }

    pub fn is_server_held(&self) -> bool {
        matches!(self.custody, Custody::Server { .. })
    }

    /// The secret share, when the server holds it.
    pub fn server_key(&self) -> Option<&TrusteeKey> {
        match &self.custody {
            Custody::Server { key } => Some(key),
            Custody::External => None,
        }
    }
}

/// Per-trustee progress through decryption.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrusteeStatus {
    KeyGenerated,
    PartialDecryptionSubmitted,
}

impl std::fmt::Display for TrusteeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            TrusteeStatus::KeyGenerated => "key generated",
            TrusteeStatus::PartialDecryptionSubmitted => "partial decryption submitted",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn trustee_serializes_with_custody() {
        let mut rng = ChaCha20Rng::from_seed([12; 32]);
        let params = ElectionParameters::new("trustee");
        let (mut commitments, mut keys) = KeyCeremony::run(&params, TrusteeScheme::Full, 1, &mut rng).unwrap();

        let election_id = Uuid::new_v4();
        let mut trustee = Trustee::new(election_id, 1, "Alice", commitments.remove(0));
        assert!(!trustee.is_server_held());

        trustee.custody = Custody::Server { key: keys.remove(0) };
        let json = serde_json::to_string(&trustee).unwrap();
        assert!(json.contains("\"kind\":\"server\""));

        let back: Trustee = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trustee);
        assert!(back.server_key().is_some());
    }
}
