//! Backing bit-array stores.
//!
//! A [`BitStore`] holds byte strings under keys and can address individual
//! bits inside them. Bit `i` lives in byte `i / 8` at position `i % 8`
//! (least-significant bit first). Reading past the end of a value yields 0;
//! writing past the end zero-extends it.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{GridError, Result};

/// Persistent bit-array primitive the grid is built on.
#[async_trait]
pub trait BitStore: Send + Sync {
    /// Raw bytes stored under `key`, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn get_bit(&self, key: &str, index: usize) -> Result<u8>;

    async fn set_bit(&self, key: &str, index: usize, value: u8) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `value` under `key` unless the key already exists.
    /// Returns true if the value was written.
    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool>;
}

fn read_bit(bytes: &[u8], index: usize) -> u8 {
    bytes
        .get(index / 8)
        .map(|b| (b >> (index % 8)) & 1)
        .unwrap_or(0)
}

fn write_bit(bytes: &mut Vec<u8>, index: usize, value: u8) {
    let byte = index / 8;
    if bytes.len() <= byte {
        bytes.resize(byte + 1, 0);
    }
    let mask = 1u8 << (index % 8);
    if value == 0 {
        bytes[byte] &= !mask;
    } else {
        bytes[byte] |= mask;
    }
}

/// In-process store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBitStore {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw value under `key`.
    pub async fn put(&self, key: &str, value: Vec<u8>) {
        self.values.write().await.insert(key.to_string(), value);
    }
}

#[async_trait]
impl BitStore for MemoryBitStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn get_bit(&self, key: &str, index: usize) -> Result<u8> {
        let values = self.values.read().await;
        Ok(values.get(key).map(|v| read_bit(v, index)).unwrap_or(0))
    }

    async fn set_bit(&self, key: &str, index: usize, value: u8) -> Result<()> {
        let mut values = self.values.write().await;
        write_bit(values.entry(key.to_string()).or_default(), index, value);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.values.read().await.contains_key(key))
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut values = self.values.write().await;
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_vec());
        Ok(true)
    }
}

/// File-backed store: one file per key under a base directory.
///
/// Layout: `<base>/<key>.bits` holding the raw bytes. Writes go to a
/// temporary file that is renamed over the old value.
pub struct FileBitStore {
    base: PathBuf,
}

impl FileBitStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    fn value_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(GridError::Config(format!("invalid storage key: {key:?}")));
        }
        Ok(self.base.join(format!("{key}.bits")))
    }

    async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .map_err(unavailable)
    }

    async fn write_atomic(&self, key: &str, value: &[u8]) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.value_path(key)?;
        let tmp = path.with_extension("bits.tmp");
        tokio::fs::write(&tmp, value).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &path).await.map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: std::io::Error) -> GridError {
    GridError::StorageUnavailable(e.to_string())
}

#[async_trait]
impl BitStore for FileBitStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.value_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn get_bit(&self, key: &str, index: usize) -> Result<u8> {
        Ok(self
            .get(key)
            .await?
            .map(|v| read_bit(&v, index))
            .unwrap_or(0))
    }

    async fn set_bit(&self, key: &str, index: usize, value: u8) -> Result<()> {
        let mut bytes = self.get(key).await?.unwrap_or_default();
        write_bit(&mut bytes, index, value);
        self.write_atomic(key, &bytes).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.value_path(key)?;
        tokio::fs::try_exists(&path).await.map_err(unavailable)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.ensure_dir().await?;
        let path = self.value_path(key)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(unavailable(e)),
        };
        file.write_all(value).await.map_err(unavailable)?;
        file.sync_all().await.map_err(unavailable)?;
        debug!(key, bytes = value.len(), path = %path.display(), "Created bit store value");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_layout_lsb_first() {
        let mut bytes = vec![0u8];
        write_bit(&mut bytes, 3, 1);
        assert_eq!(bytes, vec![0x08]);
        assert_eq!(read_bit(&bytes, 3), 1);
        assert_eq!(read_bit(&bytes, 4), 0);

        write_bit(&mut bytes, 3, 0);
        assert_eq!(bytes, vec![0x00]);
    }

    #[test]
    fn test_write_bit_extends() {
        let mut bytes = Vec::new();
        write_bit(&mut bytes, 17, 1);
        assert_eq!(bytes, vec![0, 0, 0x02]);
        assert_eq!(read_bit(&bytes, 100), 0);
    }

    #[tokio::test]
    async fn test_memory_store_set_if_absent() {
        let store = MemoryBitStore::new();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.set_if_absent("k", &[0, 0]).await.unwrap());
        store.set_bit("k", 9, 1).await.unwrap();
        assert!(!store.set_if_absent("k", &[0, 0]).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(vec![0, 0x02]));
        assert_eq!(store.get_bit("k", 9).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_missing_key_reads_zero() {
        let store = MemoryBitStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
        assert_eq!(store.get_bit("nope", 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBitStore::new(dir.path().join("bits"));

        assert!(!store.exists("grid").await.unwrap());
        assert!(store.set_if_absent("grid", &[0u8; 2]).await.unwrap());
        assert!(store.exists("grid").await.unwrap());

        store.set_bit("grid", 0, 1).await.unwrap();
        store.set_bit("grid", 15, 1).await.unwrap();
        assert_eq!(store.get("grid").await.unwrap(), Some(vec![0x01, 0x80]));

        // Reopening sees the same data
        let reopened = FileBitStore::new(dir.path().join("bits"));
        assert_eq!(reopened.get_bit("grid", 15).await.unwrap(), 1);
        assert!(!reopened.set_if_absent("grid", &[0u8; 2]).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBitStore::new(dir.path().to_path_buf());
        assert!(store.get("../escape").await.is_err());
        assert!(store.exists("").await.is_err());
    }
}
