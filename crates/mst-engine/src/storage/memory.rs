//! In-memory block storage implementation

use crate::error::{MstError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory block storage using BTreeMap
///
/// Useful for:
/// - Testing
/// - Scratch space under a [`LayeredBlockStore`](super::LayeredBlockStore)
/// - Trees that fit in memory
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clear all blocks
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Remove a single block, returning its bytes if it was present
    pub fn remove(&self, cid: &IpldCid) -> Option<Bytes> {
        self.write().remove(cid)
    }

    /// CIDs of every stored block, in CID order
    pub fn cids(&self) -> Vec<IpldCid> {
        self.read().keys().copied().collect()
    }

    // A panic while holding the lock cannot leave the map half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<IpldCid, Bytes>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<IpldCid, Bytes>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlockStore for MemoryBlockStore {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        self.read()
            .get(cid)
            .cloned()
            .ok_or_else(|| MstError::not_found("block", cid))
    }

    fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = crate::mst::util::compute_cid(data)?;
        self.write()
            .entry(cid)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(cid)
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.read().contains_key(cid))
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        let mut store = self.write();
        for (cid, data) in blocks {
            store.insert(cid, data);
        }
        Ok(())
    }
}
