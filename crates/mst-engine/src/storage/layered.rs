//! Layered block storage
//!
//! Provides a two-layer storage that reads from a writable layer first,
//! then falls back to a read-only base layer. All writes go to the writable layer.

use crate::error::Result;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::sync::Arc;

/// Layered block storage with a writable overlay and read-only base
///
/// Reads check the writable layer first, then fall back to the base layer.
/// All writes go to the writable layer only.
///
/// Typical use: open a tree from a read-only source such as a
/// [`CarBlockStore`](crate::car::CarBlockStore), then mutate it with new nodes
/// landing in a [`MemoryBlockStore`](super::MemoryBlockStore) overlay.
#[derive(Debug, Clone)]
pub struct LayeredBlockStore<W: BlockStore, B: BlockStore> {
    writable: W,
    base: Arc<B>,
}

impl<W: BlockStore, B: BlockStore> LayeredBlockStore<W, B> {
    /// Create a new layered storage
    ///
    /// - `writable`: Top layer receiving all writes
    /// - `base`: Bottom layer for fallback reads (never written)
    pub fn new(writable: W, base: Arc<B>) -> Self {
        Self { writable, base }
    }

    /// Get reference to the writable layer
    pub fn writable(&self) -> &W {
        &self.writable
    }

    /// Get reference to the base layer
    pub fn base(&self) -> &Arc<B> {
        &self.base
    }
}

impl<W: BlockStore, B: BlockStore> BlockStore for LayeredBlockStore<W, B> {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        if self.writable.has(cid)? {
            return self.writable.get(cid);
        }
        self.base.get(cid)
    }

    fn put(&self, data: &[u8]) -> Result<IpldCid> {
        self.writable.put(data)
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.writable.has(cid)? || self.base.has(cid)?)
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        self.writable.put_many(blocks)
    }
}
