//! Storage backends for key records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::CoreError;
use crate::types::{ActorId, KeyId, KeyRecord};

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Backend for persisting key records.
///
/// Implement this for your infrastructure:
/// - InMemoryKeyStore (testing, ephemeral deployments)
/// - FileKeyStore (development)
/// - Your database (production)
///
/// `update` is a read-modify-write under the backend's write lock, so
/// concurrent mutations of the same key serialize. Backends have no delete
/// operation; key records are never removed.
pub trait KeyStore: Send + Sync {
    /// Allocate the next internal id.
    fn next_id(&self) -> Result<KeyId, CoreError>;
    fn get(&self, id: KeyId) -> Result<Option<KeyRecord>, CoreError>;
    fn get_by_public_id(&self, public_id: &str) -> Result<Option<KeyRecord>, CoreError>;
    fn put(&self, record: &KeyRecord) -> Result<(), CoreError>;
    /// Atomically mutate one record, returning the updated copy.
    fn update(
        &self,
        id: KeyId,
        mutate: &mut dyn FnMut(&mut KeyRecord),
    ) -> Result<KeyRecord, CoreError>;
    fn list_for_owner(&self, owner: ActorId) -> Result<Vec<KeyRecord>, CoreError>;
    fn list(&self) -> Result<Vec<KeyRecord>, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// In-memory storage (testing and ephemeral use).
pub struct InMemoryKeyStore {
    state: RwLock<InMemoryState>,
}

struct InMemoryState {
    keys: HashMap<KeyId, KeyRecord>,
    next_id: KeyId,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(InMemoryState {
                keys: HashMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn next_id(&self) -> Result<KeyId, CoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }

    fn get(&self, id: KeyId) -> Result<Option<KeyRecord>, CoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        Ok(state.keys.get(&id).cloned())
    }

    fn get_by_public_id(&self, public_id: &str) -> Result<Option<KeyRecord>, CoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        Ok(state
            .keys
            .values()
            .find(|k| k.public_id == public_id)
            .cloned())
    }

    fn put(&self, record: &KeyRecord) -> Result<(), CoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        state.keys.insert(record.internal_id, record.clone());
        Ok(())
    }

    fn update(
        &self,
        id: KeyId,
        mutate: &mut dyn FnMut(&mut KeyRecord),
    ) -> Result<KeyRecord, CoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let record = state.keys.get_mut(&id).ok_or(CoreError::KeyUnknown(id))?;
        mutate(record);
        Ok(record.clone())
    }

    fn list_for_owner(&self, owner: ActorId) -> Result<Vec<KeyRecord>, CoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let mut keys: Vec<_> = state
            .keys
            .values()
            .filter(|k| k.owner == owner)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.internal_id);
        Ok(keys)
    }

    fn list(&self) -> Result<Vec<KeyRecord>, CoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let mut keys: Vec<_> = state.keys.values().cloned().collect();
        keys.sort_by_key(|k| k.internal_id);
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based storage (one JSON file per key).
///
/// Directory layout:
/// ```text
/// keys/
///   {internal_id}.json
/// ```
pub struct FileKeyStore {
    dir: PathBuf,
    next_id: RwLock<KeyId>,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CoreError::PersistenceFailure(format!("create dir: {}", e)))?;
        let highest = Self::scan_highest_id(&dir)?;
        Ok(Self {
            dir,
            next_id: RwLock::new(highest + 1),
        })
    }

    fn scan_highest_id(dir: &Path) -> Result<KeyId, CoreError> {
        let mut highest = 0;
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CoreError::PersistenceFailure(format!("readdir: {}", e)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| CoreError::PersistenceFailure(format!("entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = stem.parse::<KeyId>() {
                    highest = highest.max(id);
                }
            }
        }
        Ok(highest)
    }

    fn key_path(&self, id: KeyId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read_key_file(&self, path: &Path) -> Result<KeyRecord, CoreError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CoreError::PersistenceFailure(format!("read: {}", e)))?;
        serde_json::from_str(&data)
            .map_err(|e| CoreError::PersistenceFailure(format!("parse: {}", e)))
    }

    fn write_key_file(&self, record: &KeyRecord) -> Result<(), CoreError> {
        let path = self.key_path(record.internal_id);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CoreError::PersistenceFailure(format!("serialize: {}", e)))?;
        // Atomic write: write to temp, then rename
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| CoreError::PersistenceFailure(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| CoreError::PersistenceFailure(format!("rename: {}", e)))?;
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn next_id(&self) -> Result<KeyId, CoreError> {
        let mut next = self
            .next_id
            .write()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let id = *next;
        *next += 1;
        Ok(id)
    }

    fn get(&self, id: KeyId) -> Result<Option<KeyRecord>, CoreError> {
        let path = self.key_path(id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_key_file(&path).map(Some)
    }

    fn get_by_public_id(&self, public_id: &str) -> Result<Option<KeyRecord>, CoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|k| k.public_id == public_id))
    }

    fn put(&self, record: &KeyRecord) -> Result<(), CoreError> {
        self.write_key_file(record)
    }

    fn update(
        &self,
        id: KeyId,
        mutate: &mut dyn FnMut(&mut KeyRecord),
    ) -> Result<KeyRecord, CoreError> {
        // The id-allocation lock doubles as the write serializer here.
        let _guard = self
            .next_id
            .write()
            .map_err(|_| CoreError::PersistenceFailure("lock poisoned".into()))?;
        let path = self.key_path(id);
        if !path.exists() {
            return Err(CoreError::KeyUnknown(id));
        }
        let mut record = self.read_key_file(&path)?;
        mutate(&mut record);
        self.write_key_file(&record)?;
        Ok(record)
    }

    fn list_for_owner(&self, owner: ActorId) -> Result<Vec<KeyRecord>, CoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|k| k.owner == owner)
            .collect())
    }

    fn list(&self) -> Result<Vec<KeyRecord>, CoreError> {
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CoreError::PersistenceFailure(format!("readdir: {}", e)))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| CoreError::PersistenceFailure(format!("entry: {}", e)))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                keys.push(self.read_key_file(&path)?);
            }
        }
        keys.sort_by_key(|k| k.internal_id);
        Ok(keys)
    }
}
