//! Key-value persistence contract.
//!
//! Production storage adapters live outside this workspace; everything here
//! persists through this trait. `MemoryKv` is the reference implementation
//! used by tests and by embedding callers that do not need durability.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("kv backend: {0}")]
    Backend(String),
    #[error("kv codec: {0}")]
    Codec(String),
}

/// A single batched mutation.
#[derive(Debug, Clone)]
enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of mutations applied atomically by the backend.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn put_typed<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<(), KvError> {
        let bytes = bincode::serialize(value).map_err(|e| KvError::Codec(e.to_string()))?;
        self.put(key, bytes);
        Ok(())
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Byte-keyed storage consumed by every persisting component.
///
/// Object-safe on purpose: components hold an `Arc<dyn KvStore>` so the
/// backing store is chosen once at startup.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;
    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
}

/// Fetch and decode a bincode-encoded value.
pub fn get_typed<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, KvError> {
    match kv.get(key)? {
        None => Ok(None),
        Some(bytes) => bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| KvError::Codec(e.to_string())),
    }
}

/// Encode and store a value.
pub fn put_typed<T: Serialize>(kv: &dyn KvStore, key: &[u8], value: &T) -> Result<(), KvError> {
    let bytes = bincode::serialize(value).map_err(|e| KvError::Codec(e.to_string()))?;
    kv.put(key, &bytes)
}

/// In-memory `KvStore` backed by a `BTreeMap`, so prefix iteration is ordered.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut map = self.map.write();
        for op in batch.ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let map = self.map.read();
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
