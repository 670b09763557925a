//! Abstract key-value port and the in-memory adapter.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::errors::{StorageError, StorageResult};

/// One operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Abstract interface over the database engine.
///
/// `atomic_batch_write` must apply all operations or none; the chain store
/// relies on this for block writes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> StorageResult<()>;

    fn exists(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory engine backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.rows.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.rows.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> StorageResult<()> {
        let mut rows = self.rows.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    rows.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = self.rows.read();
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Convenience decode helper shared by the row stores.
pub(crate) fn decode_row<T: serde::de::DeserializeOwned>(
    key: &[u8],
    bytes: &[u8],
) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::corrupt(key, e))
}
