// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Temp storage engines used by processors whose working set outgrows memory

use crate::error::{FlowError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Iterator over `(key, value)` pairs returned by a prefix scan
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send + 'a>;

/// Engine interface for temporary, node-local key/value storage.
///
/// Processors never share keys: each one writes under its own prefix obtained
/// from [`super::TempStorageIdGenerator`].
pub trait TempStorage: Send + Sync {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn batch_insert(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.insert(key, value)?;
        }
        Ok(())
    }

    /// Scan keys starting with `prefix` in ascending key order
    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> Result<KvIter<'a>>;

    /// Delete every key starting with `prefix`
    fn clear_prefix(&self, prefix: &[u8]) -> Result<()>;

    fn engine_name(&self) -> &'static str;
}

/// Sled-backed temp storage. The database is opened in temporary mode and
/// removed when dropped.
#[cfg(feature = "sled-backend")]
pub struct SledTempStorage {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledTempStorage {
    /// Open a temporary sled database. When `path` is `None` sled picks a
    /// location under the system temp directory.
    pub fn open(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = sled::Config::new().temporary(true);
        if let Some(path) = path {
            config = config.path(path);
        }
        let db = config
            .open()
            .map_err(|e| FlowError::TempStorage(e.to_string()))?;
        Ok(Self { db })
    }
}

#[cfg(feature = "sled-backend")]
impl TempStorage for SledTempStorage {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value)
            .map_err(|e| FlowError::TempStorage(e.to_string()))?;
        Ok(())
    }

    fn batch_insert(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_slice(), value.as_slice());
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| FlowError::TempStorage(e.to_string()))
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> Result<KvIter<'a>> {
        let iter = self.db.scan_prefix(prefix).map(|result| {
            result
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(|e| FlowError::TempStorage(e.to_string()))
        });
        Ok(Box::new(iter))
    }

    fn clear_prefix(&self, prefix: &[u8]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for key in self.db.scan_prefix(prefix).keys() {
            let key = key.map_err(|e| FlowError::TempStorage(e.to_string()))?;
            batch.remove(key);
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| FlowError::TempStorage(e.to_string()))
    }

    fn engine_name(&self) -> &'static str {
        "sled"
    }
}

/// In-memory temp storage for testing
#[derive(Default)]
pub struct MemoryTempStorage {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryTempStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl TempStorage for MemoryTempStorage {
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> Result<KvIter<'a>> {
        // Snapshot so the lock is not held while the caller iterates.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .read()
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn clear_prefix(&self, prefix: &[u8]) -> Result<()> {
        self.data.write().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn engine_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempstorage::prefix_for;

    fn exercise(storage: &dyn TempStorage) {
        let a = prefix_for(1);
        let b = prefix_for(2);
        storage
            .batch_insert(&[
                ([a.as_slice(), b"k2"].concat(), b"a2".to_vec()),
                ([a.as_slice(), b"k1"].concat(), b"a1".to_vec()),
                ([b.as_slice(), b"k1"].concat(), b"b1".to_vec()),
            ])
            .unwrap();

        let values: Vec<Vec<u8>> = storage
            .scan_prefix(&a)
            .unwrap()
            .map(|kv| kv.unwrap().1)
            .collect();
        assert_eq!(values, vec![b"a1".to_vec(), b"a2".to_vec()]);

        storage.clear_prefix(&a).unwrap();
        assert_eq!(storage.scan_prefix(&a).unwrap().count(), 0);
        assert_eq!(storage.scan_prefix(&b).unwrap().count(), 1);
    }

    #[test]
    fn test_memory_temp_storage_prefixes() {
        let storage = MemoryTempStorage::new();
        exercise(&storage);
        assert_eq!(storage.len(), 1);
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_sled_temp_storage_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SledTempStorage::open(Some(&dir.path().join("temp"))).unwrap();
        exercise(&storage);
        assert_eq!(storage.engine_name(), "sled");
    }
}
