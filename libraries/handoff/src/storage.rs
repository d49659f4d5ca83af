//! Key-value storage adapters for on-device data.
//!
//! The local store never talks to a platform API directly; it is handed one of
//! these adapters. Every value is a string (JSON, in practice) stored under a
//! flat key.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use tempfile::NamedTempFile;
use tokio::{fs, task};

use crate::error::StorageError;

#[allow(async_fn_in_trait)]
pub trait KeyValueStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StorageOp {
    Get,
    Set,
    Remove,
    Keys,
}

/// Process-local storage. Clones share the same underlying map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    items: Rc<RefCell<BTreeMap<String, String>>>,
    failures: Rc<RefCell<BTreeMap<StorageOp, u32>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `op` fail with an I/O error.
    pub fn inject_failure(&self, op: StorageOp, times: u32) {
        self.failures.borrow_mut().insert(op, times);
    }

    fn check(&self, op: StorageOp, key: &str) -> Result<(), StorageError> {
        let mut failures = self.failures.borrow_mut();
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StorageError::Io {
                    key: key.to_string(),
                    source: io::Error::other(format!("{op:?} failed")),
                })
            }
            _ => Ok(()),
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check(StorageOp::Get, key)?;
        Ok(self.items.borrow().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check(StorageOp::Set, key)?;
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check(StorageOp::Remove, key)?;
        self.items.borrow_mut().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check(StorageOp::Keys, "*")?;
        Ok(self.items.borrow().keys().cloned().collect())
    }
}

const FILE_EXTENSION: &str = "json";

/// One file per key inside a directory.
///
/// Writes go to a temporary file in the same directory that is then renamed over
/// the target, so a record is either the old value or the new one, never a mix.
#[derive(Clone, Debug)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|source| StorageError::Io {
            key: directory.display().to_string(),
            source,
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{FILE_EXTENSION}", encode_key(key)))
    }
}

/// Writes `value` to a temporary file next to `path`, then renames it over
/// `path`.
fn write_atomically(directory: &Path, path: &Path, value: &str) -> io::Result<()> {
    let mut temp_file = NamedTempFile::new_in(directory)?;
    temp_file.write_all(value.as_bytes())?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl KeyValueStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let directory = self.directory.clone();
        let path = self.path_for(key);
        let value = value.to_string();
        task::spawn_blocking(move || write_atomically(&directory, &path, &value))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)))
            .map_err(|source| StorageError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let io_err = |source| StorageError::Io {
            key: self.directory.display().to_string(),
            source,
        };

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Percent-encodes anything that is not safe in a file name on every platform.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for b in key.bytes() {
        if is_plain(b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_round_trips_odd_keys() {
        for key in ["guest_sets", "migration_done_abc-123", "a/b c.d%"] {
            let encoded = encode_key(key);
            assert!(encoded.bytes().all(|b| is_plain(b) || b == b'%'));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[tokio::test]
    async fn test_memory_storage_clones_share_state() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        storage.set_item("k", "v").await.unwrap();
        assert_eq!(other.get_item("k").await.unwrap().as_deref(), Some("v"));

        other.remove_item("k").await.unwrap();
        other.remove_item("k").await.unwrap();
        assert_eq!(storage.get_item("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item("guest_user", "{\"id\":1}").await.unwrap();
        storage.set_item("migration_done_a/b", "true").await.unwrap();
        storage.set_item("guest_user", "{\"id\":2}").await.unwrap();

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get_item("guest_user").await.unwrap().as_deref(),
            Some("{\"id\":2}")
        );
        assert_eq!(
            reopened.keys().await.unwrap(),
            vec!["guest_user".to_string(), "migration_done_a/b".to_string()]
        );

        reopened.remove_item("guest_user").await.unwrap();
        reopened.remove_item("guest_user").await.unwrap();
        assert_eq!(reopened.get_item("guest_user").await.unwrap(), None);
    }
}
