use crate::*;
use digest::Digest;
use num_enum::TryFromPrimitive;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical encoding: CBOR with struct fields in declaration order.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_cbor::to_vec(value).expect("verivote: Unexpected error encoding record")
}

/// SHA-256 of the canonical encoding, hex encoded.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    hex::encode(Sha256::digest(&canonical_bytes(value)))
}

/// A record type
#[derive(
    Serialize, Deserialize, TryFromPrimitive, Copy, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RecordType {
    Election = 1,
    Ballot = 2,
    Trustee = 3,
    AuditEntry = 4,
    Tally = 5,
    PartialDecryption = 6,
    Result = 7,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            RecordType::Election => "Election",
            RecordType::Ballot => "Ballot",
            RecordType::Trustee => "Trustee",
            RecordType::AuditEntry => "AuditEntry",
            RecordType::Tally => "Tally",
            RecordType::PartialDecryption => "PartialDecryption",
            RecordType::Result => "Result",
        };
        write!(f, "{}", name)
    }
}

/// Record identifier
///
/// Ordered by election, then record type, then the unique part, so that all records
/// of one type for one election are contiguous.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub election_id: Uuid,
    pub record_type: RecordType,
    pub unique: Option<String>,
}

impl RecordId {
    pub fn new(election_id: Uuid, record_type: RecordType, unique: Option<String>) -> Self {
        RecordId {
            election_id,
            record_type,
            unique,
        }
    }

    /// Unique part for sequence-numbered records; zero padded so string order is
    /// numeric order.
    pub fn sequence(seq: u64) -> String {
        format!("{:020}", seq)
    }

    /// Key prefix shared by every record of a type within an election.
    pub fn prefix(election_id: Uuid, record_type: RecordType) -> String {
        format!("{}:{:02}:", election_id, record_type as u8)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            RecordId::prefix(self.election_id, self.record_type),
            self.unique.as_deref().unwrap_or("")
        )
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (election, record_type, unique) = match (parts.next(), parts.next(), parts.next()) {
            (Some(e), Some(t), Some(u)) => (e, t, u),
            _ => return Err(Error::BadIdentifier(s.to_owned())),
        };

        let election_id = Uuid::parse_str(election).map_err(|_| Error::BadIdentifier(s.to_owned()))?;
        let record_type = record_type
            .parse::<u8>()
            .ok()
            .and_then(|t| RecordType::try_from_primitive(t).ok())
            .ok_or_else(|| Error::BadIdentifier(s.to_owned()))?;
        let unique = if unique.is_empty() {
            None
        } else {
            Some(unique.to_owned())
        };

        Ok(RecordId {
            election_id,
            record_type,
            unique,
        })
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl Serialize for RecordId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Everything the engine persists.
#[derive(Debug, Clone)]
pub enum Record {
    Election(Box<Election>),
    Ballot(CastBallot),
    Trustee(Trustee),
    AuditEntry {
        election_id: Uuid,
        entry: AuditLogEntry,
    },
    Tally(Tally),
    PartialDecryption(PartialDecryption),

    /// Written only when the result is released.
    Result(ElectionResult),
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Election(_) => RecordType::Election,
            Record::Ballot(_) => RecordType::Ballot,
            Record::Trustee(_) => RecordType::Trustee,
            Record::AuditEntry { .. } => RecordType::AuditEntry,
            Record::Tally(_) => RecordType::Tally,
            Record::PartialDecryption(_) => RecordType::PartialDecryption,
            Record::Result(_) => RecordType::Result,
        }
    }

    pub fn id(&self) -> RecordId {
        let (election_id, unique) = match self {
            Record::Election(e) => (e.id, None),
            Record::Ballot(b) => (b.ballot.election_id, Some(RecordId::sequence(b.seq))),
            Record::Trustee(t) => (t.election_id, Some(t.id.to_string())),
            Record::AuditEntry { election_id, entry } => (*election_id, Some(RecordId::sequence(entry.seq))),
            Record::Tally(t) => (t.election_id, None),
            Record::PartialDecryption(p) => (p.election_id, Some(p.trustee_id.to_string())),
            Record::Result(r) => (r.election_id, None),
        };
        RecordId::new(election_id, self.record_type(), unique)
    }

    /// Version tag of the current encoding of this record.
    pub fn schema(&self) -> &'static str {
        match self {
            Record::Election(_) => "verivote/election/v1",
            Record::Ballot(_) => "verivote/ballot/v1",
            Record::Trustee(_) => "verivote/trustee/v1",
            Record::AuditEntry { .. } => "verivote/audit_entry/v1",
            Record::Tally(_) => "verivote/tally/v1",
            Record::PartialDecryption(_) => "verivote/partial_decryption/v1",
            Record::Result(_) => "verivote/result/v1",
        }
    }

    fn body(&self) -> Result<serde_json::Value, Error> {
        let body = match self {
            Record::Election(e) => serde_json::to_value(e)?,
            Record::Ballot(b) => serde_json::to_value(b)?,
            Record::Trustee(t) => serde_json::to_value(t)?,
            Record::AuditEntry { entry, .. } => serde_json::to_value(entry)?,
            Record::Tally(t) => serde_json::to_value(t)?,
            Record::PartialDecryption(p) => serde_json::to_value(p)?,
            Record::Result(r) => serde_json::to_value(r)?,
        };
        Ok(body)
    }
}

/// Self-describing persisted form of a record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: RecordId,
    pub schema: String,
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

type DecodeFn = fn(&RecordId, serde_json::Value) -> Result<Record, Error>;

/// Maps schema version tags to decoders.
///
/// Readers never guess a type from the payload: a tag either has a registered
/// decoder or the record is refused.
#[derive(Clone)]
pub struct SchemaRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        SchemaRegistry {
            decoders: HashMap::new(),
        }
    }

    /// Registry with every current schema.
    pub fn standard() -> Self {
        let mut registry = SchemaRegistry::empty();
        registry.register("verivote/election/v1", |_, body| {
            Ok(Record::Election(Box::new(serde_json::from_value(body)?)))
        });
        registry.register("verivote/ballot/v1", |_, body| {
            Ok(Record::Ballot(serde_json::from_value(body)?))
        });
        registry.register("verivote/trustee/v1", |_, body| {
            Ok(Record::Trustee(serde_json::from_value(body)?))
        });
        registry.register("verivote/audit_entry/v1", |id, body| {
            Ok(Record::AuditEntry {
                election_id: id.election_id,
                entry: serde_json::from_value(body)?,
            })
        });
        registry.register("verivote/tally/v1", |_, body| {
            Ok(Record::Tally(serde_json::from_value(body)?))
        });
        registry.register("verivote/partial_decryption/v1", |_, body| {
            Ok(Record::PartialDecryption(serde_json::from_value(body)?))
        });
        registry.register("verivote/result/v1", |_, body| {
            Ok(Record::Result(serde_json::from_value(body)?))
        });
        registry
    }

    pub fn register(&mut self, schema: &str, decode: DecodeFn) {
        self.decoders.insert(schema.to_owned(), decode);
    }

    pub fn encode(&self, record: &Record) -> Result<Envelope, Error> {
        let schema = record.schema();
        if !self.decoders.contains_key(schema) {
            return Err(Error::UnknownSchema(schema.to_owned()));
        }
        Ok(Envelope {
            id: record.id(),
            schema: schema.to_owned(),
            body: record.body()?,
        })
    }

    pub fn decode(&self, envelope: Envelope) -> Result<Record, Error> {
        let decode = self
            .decoders
            .get(&envelope.schema)
            .ok_or_else(|| Error::UnknownSchema(envelope.schema.clone()))?;
        decode(&envelope.id, envelope.body)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry::standard()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut schemas: Vec<&String> = self.decoders.keys().collect();
        schemas.sort();
        f.debug_struct("SchemaRegistry").field("schemas", &schemas).finish()
    }
}

impl TryFrom<Record> for CastBallot {
    type Error = Error;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        match record {
            Record::Ballot(ballot) => Ok(ballot),
            other => Err(Error::BadIdentifier(other.id().to_string())),
        }
    }
}

impl TryFrom<Record> for AuditLogEntry {
    type Error = Error;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        match record {
            Record::AuditEntry { entry, .. } => Ok(entry),
            other => Err(Error::BadIdentifier(other.id().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id() {
        assert!(RecordType::Election as u8 == 1);
        assert!(RecordType::PartialDecryption as u8 == 6);
        assert!(RecordType::Result as u8 == 7);

        let election_id = Uuid::new_v4();
        let id = RecordId::new(election_id, RecordType::Ballot, Some(RecordId::sequence(12)));
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let bare = RecordId::new(election_id, RecordType::Tally, None);
        let parsed: RecordId = bare.to_string().parse().unwrap();
        assert_eq!(parsed.unique, None);

        assert!("not-an-id".parse::<RecordId>().is_err());
        assert!(format!("{}:99:", election_id).parse::<RecordId>().is_err());
    }

    #[test]
    fn record_ids_sort_by_type_then_sequence() {
        let election_id = Uuid::new_v4();
        let a = RecordId::new(election_id, RecordType::Ballot, Some(RecordId::sequence(9)));
        let b = RecordId::new(election_id, RecordType::Ballot, Some(RecordId::sequence(10)));
        let c = RecordId::new(election_id, RecordType::Trustee, None);

        assert!(a < b && b < c);
        assert!(a.to_string() < b.to_string() && b.to_string() < c.to_string());
    }

    #[test]
    fn unknown_schema_is_refused() {
        let registry = SchemaRegistry::standard();
        let envelope = Envelope {
            id: RecordId::new(Uuid::new_v4(), RecordType::Ballot, None),
            schema: "verivote/ballot/v0".to_owned(),
            body: serde_json::json!({}),
        };

        match registry.decode(envelope) {
            Err(Error::UnknownSchema(tag)) => assert_eq!(tag, "verivote/ballot/v0"),
            other => panic!("unexpected result: {:?}", other.map(|r| r.id())),
        }
    }

    #[test]
    fn audit_entry_roundtrips_through_envelope() {
        let log = AuditLog::new();
        let entry = log.append("admin", AuditAction::ElectionCreated, "created");
        let election_id = Uuid::new_v4();

        let registry = SchemaRegistry::standard();
        let record = Record::AuditEntry {
            election_id,
            entry: entry.clone(),
        };
        let envelope = registry.encode(&record).unwrap();
        let bytes = envelope.to_bytes().unwrap();

        let decoded = registry.decode(Envelope::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(decoded.id(), record.id());
        assert_eq!(AuditLogEntry::try_from(decoded).unwrap(), entry);
    }

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash(&("x", 1u32));
        let b = content_hash(&("x", 1u32));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(&("x", 2u32)));
    }
}
