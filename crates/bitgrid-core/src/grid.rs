//! The shared grid: a fixed-size bit array on top of a [`BitStore`].

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SnapshotEncoding;
use crate::error::{GridError, Result};
use crate::store::BitStore;

pub struct GridStore {
    store: Arc<dyn BitStore>,
    key: String,
    size: usize,
    /// Serializes the read-modify-write of every toggle.
    toggle_lock: Mutex<()>,
}

impl GridStore {
    pub fn new(store: Arc<dyn BitStore>, key: impl Into<String>, size: usize) -> Self {
        Self {
            store,
            key: key.into(),
            size,
            toggle_lock: Mutex::new(()),
        }
    }

    /// Number of cells.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Length of the packed representation, `ceil(size / 8)`.
    pub fn byte_len(&self) -> usize {
        self.size.div_ceil(8)
    }

    /// Create an all-zero grid if none exists. Never overwrites existing data.
    pub async fn init(&self) -> Result<()> {
        if self.store.exists(&self.key).await? {
            debug!(key = %self.key, "Grid already exists");
            return Ok(());
        }
        let created = self
            .store
            .set_if_absent(&self.key, &vec![0u8; self.byte_len()])
            .await?;
        if created {
            info!(key = %self.key, size = self.size, "Initialized empty grid");
        }
        Ok(())
    }

    /// Packed bits, always exactly [`byte_len`](Self::byte_len) bytes.
    pub async fn state(&self) -> Result<Vec<u8>> {
        let mut bits = self.store.get(&self.key).await?.unwrap_or_default();
        bits.resize(self.byte_len(), 0);
        Ok(bits)
    }

    /// Flip the bit at `index` and return its new value.
    pub async fn toggle(&self, index: i64) -> Result<u8> {
        let cell = self.check_index(index)?;

        let _guard = self.toggle_lock.lock().await;
        let current = self.store.get_bit(&self.key, cell).await?;
        let next = current ^ 1;
        self.store.set_bit(&self.key, cell, next).await?;
        debug!(cell, bit = next, "Toggled cell");
        Ok(next)
    }

    fn check_index(&self, index: i64) -> Result<usize> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.size)
            .ok_or(GridError::IndexOutOfRange {
                index,
                size: self.size,
            })
    }
}

/// Encode packed grid bytes for the wire.
pub fn encode_snapshot(bits: &[u8], encoding: SnapshotEncoding) -> String {
    use base64::Engine;

    match encoding {
        SnapshotEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bits),
        SnapshotEncoding::Hex => hex::encode(bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBitStore;
    use async_trait::async_trait;

    async fn grid_of(size: usize) -> (Arc<MemoryBitStore>, GridStore) {
        let store = Arc::new(MemoryBitStore::new());
        let grid = GridStore::new(store.clone(), "grid_bits", size);
        grid.init().await.unwrap();
        (store, grid)
    }

    #[tokio::test]
    async fn test_toggle_scenario_single_byte() {
        let (_store, grid) = grid_of(8).await;
        assert_eq!(encode_snapshot(&grid.state().await.unwrap(), SnapshotEncoding::Hex), "00");

        assert_eq!(grid.toggle(3).await.unwrap(), 1);
        assert_eq!(encode_snapshot(&grid.state().await.unwrap(), SnapshotEncoding::Hex), "08");

        assert_eq!(grid.toggle(3).await.unwrap(), 0);
        assert_eq!(encode_snapshot(&grid.state().await.unwrap(), SnapshotEncoding::Hex), "00");
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_every_cell() {
        let (_store, grid) = grid_of(20).await;
        grid.toggle(7).await.unwrap();
        let before = grid.state().await.unwrap();
        for i in 0..20 {
            grid.toggle(i).await.unwrap();
            grid.toggle(i).await.unwrap();
        }
        assert_eq!(grid.state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_out_of_range_leaves_grid_unchanged() {
        let (_store, grid) = grid_of(10).await;
        grid.toggle(9).await.unwrap();
        let before = grid.state().await.unwrap();

        for bad in [-1, 10, 11, i64::MAX, i64::MIN] {
            let err = grid.toggle(bad).await.unwrap_err();
            assert!(matches!(err, GridError::IndexOutOfRange { index, size: 10 } if index == bad));
        }
        assert_eq!(grid.state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_state_length_is_fixed() {
        let (store, grid) = grid_of(625).await;
        assert_eq!(grid.state().await.unwrap().len(), 79);

        store.put("grid_bits", vec![0xff; 3]).await;
        let padded = grid.state().await.unwrap();
        assert_eq!(padded.len(), 79);
        assert_eq!(&padded[..4], &[0xff, 0xff, 0xff, 0x00]);

        store.put("grid_bits", vec![0x01; 200]).await;
        assert_eq!(grid.state().await.unwrap().len(), 79);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (_store, grid) = grid_of(16).await;
        grid.toggle(12).await.unwrap();
        grid.init().await.unwrap();
        assert_eq!(grid.state().await.unwrap(), vec![0x00, 0x10]);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_lose_updates() {
        let (_store, grid) = grid_of(8).await;
        let grid = Arc::new(grid);
        let mut handles = Vec::new();
        for _ in 0..64 {
            let grid = grid.clone();
            handles.push(tokio::spawn(async move { grid.toggle(5).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // An even number of flips lands back on 0
        assert_eq!(grid.state().await.unwrap(), vec![0x00]);
    }

    struct DownStore;

    #[async_trait]
    impl BitStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(GridError::StorageUnavailable("connection refused".into()))
        }
        async fn get_bit(&self, _key: &str, _index: usize) -> Result<u8> {
            Err(GridError::StorageUnavailable("connection refused".into()))
        }
        async fn set_bit(&self, _key: &str, _index: usize, _value: u8) -> Result<()> {
            Err(GridError::StorageUnavailable("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            Err(GridError::StorageUnavailable("connection refused".into()))
        }
        async fn set_if_absent(&self, _key: &str, _value: &[u8]) -> Result<bool> {
            Err(GridError::StorageUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_errors_surface() {
        let grid = GridStore::new(Arc::new(DownStore), "grid_bits", 8);
        assert!(matches!(grid.init().await, Err(GridError::StorageUnavailable(_))));
        assert!(matches!(grid.state().await, Err(GridError::StorageUnavailable(_))));
        assert!(matches!(grid.toggle(1).await, Err(GridError::StorageUnavailable(_))));
    }

    #[test]
    fn test_encode_snapshot_base64() {
        assert_eq!(encode_snapshot(&[0x08, 0xff], SnapshotEncoding::Base64), "CP8=");
        assert_eq!(encode_snapshot(&[0x08, 0xff], SnapshotEncoding::Hex), "08ff");
    }
}
