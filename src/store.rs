//! Record store executed against by the worker pool
//!
//! Provides a thread-safe in-memory store keyed by numeric id, optionally
//! backed by a journal for persistence.

use crate::error::{Result, VaultError};
use crate::journal::{Journal, Mutation};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Trait defining the CRUD operations workers perform
pub trait RecordStore: Send + Sync {
    /// Store a new record and return its assigned id
    fn create(&self, payload: Vec<u8>) -> Result<u64>;

    /// Fetch a record's payload, or `NotFound`
    fn read(&self, id: u64) -> Result<Vec<u8>>;

    /// All records in ascending id order
    fn read_all(&self) -> Result<Vec<Record>>;

    /// Replace an existing record's payload, or `NotFound`
    fn update(&self, id: u64, payload: Vec<u8>) -> Result<()>;

    /// Remove a record, or `NotFound`
    fn delete(&self, id: u64) -> Result<()>;

    /// Get the number of stored records
    fn len(&self) -> Result<usize>;
}

struct Records {
    next_id: u64,
    by_id: BTreeMap<u64, Vec<u8>>,
}

impl Records {
    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Create { id, payload } => {
                self.next_id = self.next_id.max(id + 1);
                self.by_id.insert(id, payload);
            }
            Mutation::Update { id, payload } => {
                self.by_id.insert(id, payload);
            }
            Mutation::Delete { id } => {
                self.by_id.remove(&id);
            }
        }
    }
}

/// Thread-safe in-memory record store
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
    journal: Option<Arc<Journal>>,
}

impl MemoryStore {
    /// Create a new memory store without a journal
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Records {
                next_id: 1,
                by_id: BTreeMap::new(),
            })),
            journal: None,
        }
    }

    /// Create a new memory store that journals every mutation
    pub fn with_journal(journal: Arc<Journal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new()
        }
    }

    /// Rebuild state from the journal, returning the number of entries applied
    pub fn restore_from_journal(&self) -> Result<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };

        let mut records = self.write_records()?;
        let replayed = journal.replay(|mutation| {
            records.apply(mutation);
            Ok(())
        })?;
        Ok(replayed)
    }

    fn read_records(&self) -> Result<RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|_| VaultError::Server("record store lock poisoned".to_string()))
    }

    fn write_records(&self) -> Result<RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|_| VaultError::Server("record store lock poisoned".to_string()))
    }

    // Runs under the write lock so journal order matches apply order.
    fn commit(&self, records: &mut Records, mutation: Mutation) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.append(mutation.clone())?;
        }
        records.apply(mutation);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryStore {
    fn create(&self, payload: Vec<u8>) -> Result<u64> {
        let mut records = self.write_records()?;
        let id = records.next_id;
        self.commit(&mut records, Mutation::Create { id, payload })?;
        Ok(id)
    }

    fn read(&self, id: u64) -> Result<Vec<u8>> {
        let records = self.read_records()?;
        records
            .by_id
            .get(&id)
            .cloned()
            .ok_or(VaultError::NotFound(id))
    }

    fn read_all(&self) -> Result<Vec<Record>> {
        let records = self.read_records()?;
        Ok(records
            .by_id
            .iter()
            .map(|(id, payload)| Record {
                id: *id,
                payload: payload.clone(),
            })
            .collect())
    }

    fn update(&self, id: u64, payload: Vec<u8>) -> Result<()> {
        let mut records = self.write_records()?;
        if !records.by_id.contains_key(&id) {
            return Err(VaultError::NotFound(id));
        }
        self.commit(&mut records, Mutation::Update { id, payload })
    }

    fn delete(&self, id: u64) -> Result<()> {
        let mut records = self.write_records()?;
        if !records.by_id.contains_key(&id) {
            return Err(VaultError::NotFound(id));
        }
        self.commit(&mut records, Mutation::Delete { id })
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read_records()?.by_id.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::NamedTempFile;

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();

        let id = store.create(b"value1".to_vec()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(store.read(id).unwrap(), b"value1");

        store.update(id, b"value2".to_vec()).unwrap();
        assert_eq!(store.read(id).unwrap(), b"value2");

        store.delete(id).unwrap();
        assert!(matches!(store.read(id), Err(VaultError::NotFound(1))));
        assert!(matches!(store.delete(id), Err(VaultError::NotFound(1))));
        assert!(matches!(
            store.update(id, b"x".to_vec()),
            Err(VaultError::NotFound(1))
        ));
    }

    #[test]
    fn test_read_all_in_id_order() {
        let store = MemoryStore::new();
        for payload in ["a", "b", "c"] {
            store.create(payload.as_bytes().to_vec()).unwrap();
        }
        store.delete(2).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(
            all,
            vec![
                Record { id: 1, payload: b"a".to_vec() },
                Record { id: 3, payload: b"c".to_vec() },
            ]
        );
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let store = MemoryStore::new();
        let first = store.create(b"a".to_vec()).unwrap();
        store.delete(first).unwrap();
        let second = store.create(b"b".to_vec()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_memory_store_with_journal() {
        let temp_file = NamedTempFile::new().unwrap();

        {
            let journal = Arc::new(Journal::open(temp_file.path()).unwrap());
            let store = MemoryStore::with_journal(journal);
            store.create(b"one".to_vec()).unwrap();
            store.create(b"two".to_vec()).unwrap();
            store.create(b"three".to_vec()).unwrap();
            store.update(1, b"uno".to_vec()).unwrap();
            store.delete(2).unwrap();
        }

        let journal = Arc::new(Journal::open(temp_file.path()).unwrap());
        let store = MemoryStore::with_journal(journal);
        assert_eq!(store.restore_from_journal().unwrap(), 5);

        assert_eq!(store.read(1).unwrap(), b"uno");
        assert!(matches!(store.read(2), Err(VaultError::NotFound(2))));
        assert_eq!(store.read(3).unwrap(), b"three");

        // The id counter survives the restart.
        assert_eq!(store.create(b"four".to_vec()).unwrap(), 4);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let payload = format!("value{}", i).into_bytes();
                    let id = store.create(payload.clone()).unwrap();
                    assert_eq!(store.read(id).unwrap(), payload);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len().unwrap(), 10);
    }
}
