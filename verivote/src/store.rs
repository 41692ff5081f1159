use crate::*;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("record {0} is not of the expected type")]
    WrongType(RecordId),

    #[error("record {0} could not be decoded: {1}")]
    Corrupt(RecordId, String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// A record store
///
/// The engine only needs to save and load records by identifier and to list all
/// records of one type for an election.
pub trait Store: Send + Sync {
    /// Persist a record, replacing any record with the same identifier
    fn put(&self, record: &Record) -> Result<(), StoreError>;

    /// Get a record of an unknown type
    fn get(&self, id: &RecordId) -> Result<Record, StoreError>;

    /// All records of one type for an election, in identifier order
    fn list(&self, election_id: Uuid, record_type: RecordType) -> Result<Vec<Record>, StoreError>;

    /// Get an election snapshot, without its ballots or audit log
    fn get_election(&self, election_id: Uuid) -> Result<Election, StoreError> {
        let id = RecordId::new(election_id, RecordType::Election, None);
        match self.get(&id)? {
            Record::Election(election) => Ok(*election),
            _ => Err(StoreError::WrongType(id)),
        }
    }

    /// Get the tally of an election
    fn get_tally(&self, election_id: Uuid) -> Result<Tally, StoreError> {
        let id = RecordId::new(election_id, RecordType::Tally, None);
        match self.get(&id)? {
            Record::Tally(tally) => Ok(tally),
            _ => Err(StoreError::WrongType(id)),
        }
    }

    /// Get a trustee's partial decryption
    fn get_partial_decryption(
        &self,
        election_id: Uuid,
        trustee_id: Uuid,
    ) -> Result<PartialDecryption, StoreError> {
        let id = RecordId::new(
            election_id,
            RecordType::PartialDecryption,
            Some(trustee_id.to_string()),
        );
        match self.get(&id)? {
            Record::PartialDecryption(partial) => Ok(partial),
            _ => Err(StoreError::WrongType(id)),
        }
    }

    /// Get the released result of an election
    fn get_result(&self, election_id: Uuid) -> Result<ElectionResult, StoreError> {
        let id = RecordId::new(election_id, RecordType::Result, None);
        match self.get(&id)? {
            Record::Result(result) => Ok(result),
            _ => Err(StoreError::WrongType(id)),
        }
    }

    /// Load an election together with its ballot box, audit log and released result
    fn load_election(&self, election_id: Uuid) -> Result<Election, StoreError> {
        let snapshot = self.get_election(election_id)?;

        let ballots = self
            .list(election_id, RecordType::Ballot)?
            .into_iter()
            .map(|r| {
                let id = r.id();
                CastBallot::try_from(r).map_err(|_| StoreError::WrongType(id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entries = self
            .list(election_id, RecordType::AuditEntry)?
            .into_iter()
            .map(|r| {
                let id = r.id();
                AuditLogEntry::try_from(r).map_err(|_| StoreError::WrongType(id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = match snapshot.state() {
            ElectionState::ResultReleased => Some(self.get_result(election_id)?),
            _ => None,
        };

        Ok(Election::restore(snapshot, ballots, entries, result))
    }
}

/// A simple store that uses an in-memory BTreeMap of encoded envelopes
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
    registry: SchemaRegistry,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: SchemaRegistry) -> Self {
        MemStore {
            inner: RwLock::new(BTreeMap::new()),
            registry,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store raw envelope bytes, as received from another store or an older version
    pub fn put_raw(&self, key: &RecordId, bytes: Vec<u8>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
    }

    /// Stored envelope bytes, exactly as persisted
    pub fn get_raw(&self, key: &RecordId) -> Option<Vec<u8>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.to_string())
            .cloned()
    }

    fn decode(&self, id: &RecordId, bytes: &[u8]) -> Result<Record, StoreError> {
        Envelope::from_bytes(bytes)
            .and_then(|envelope| self.registry.decode(envelope))
            .map_err(|e| StoreError::Corrupt(id.clone(), e.to_string()))
    }
}

impl Store for MemStore {
    fn put(&self, record: &Record) -> Result<(), StoreError> {
        let id = record.id();
        let bytes = self
            .registry
            .encode(record)
            .and_then(|envelope| envelope.to_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.put_raw(&id, bytes);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Record, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match inner.get(&id.to_string()) {
            Some(bytes) => self.decode(id, bytes),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    fn list(&self, election_id: Uuid, record_type: RecordType) -> Result<Vec<Record>, StoreError> {
        let prefix = RecordId::prefix(election_id, record_type);
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let mut results = Vec::new();
        for (key, bytes) in inner.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let id: RecordId = key
                .parse()
                .map_err(|e: Error| StoreError::Backend(e.to_string()))?;
            results.push(self.decode(&id, bytes)?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit_record(election_id: Uuid, log: &AuditLog, detail: &str) -> Record {
        Record::AuditEntry {
            election_id,
            entry: log.append("admin", AuditAction::ElectionUpdated, detail),
        }
    }

    #[test]
    fn list_scans_one_type_of_one_election() {
        let store = MemStore::new();
        let election_a = Uuid::new_v4();
        let election_b = Uuid::new_v4();
        let log = AuditLog::new();

        for i in 0..12 {
            store.put(&audit_record(election_a, &log, &format!("a{}", i))).unwrap();
        }
        store.put(&audit_record(election_b, &AuditLog::new(), "b0")).unwrap();

        let listed = store.list(election_a, RecordType::AuditEntry).unwrap();
        assert_eq!(listed.len(), 12);

        // Sequence order survives the string keys
        let details: Vec<String> = listed
            .into_iter()
            .map(|r| AuditLogEntry::try_from(r).unwrap().detail)
            .collect();
        assert_eq!(details[10], "a10");

        assert_eq!(store.list(election_b, RecordType::AuditEntry).unwrap().len(), 1);
        assert!(store.list(election_a, RecordType::Ballot).unwrap().is_empty());
    }

    #[test]
    fn missing_and_corrupt_records() {
        let store = MemStore::new();
        let id = RecordId::new(Uuid::new_v4(), RecordType::Tally, None);

        assert!(matches!(store.get(&id), Err(StoreError::NotFound(_))));

        let envelope = serde_json::json!({
            "id": id.to_string(),
            "schema": "verivote/tally/v9",
            "body": {}
        });
        store.put_raw(&id, serde_json::to_vec(&envelope).unwrap());
        match store.get(&id) {
            Err(StoreError::Corrupt(_, msg)) => assert!(msg.contains("unknown record schema")),
            other => panic!("unexpected result: {:?}", other.map(|r| r.id())),
        }
    }
}
