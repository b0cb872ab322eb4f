//! Block storage abstraction for MST nodes and values

use crate::error::Result;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::sync::Arc;

/// Block storage trait
///
/// Provides CID-keyed storage for MST nodes and value blocks.
/// Implementations might use:
/// - In-memory BTreeMap ([`MemoryBlockStore`])
/// - An overlay over another store ([`LayeredBlockStore`])
/// - A CAR archive ([`CarBlockStore`](crate::car::CarBlockStore), read-only)
/// - SQLite/RocksDB (user-provided)
///
/// All methods are blocking. Implementations backed by slow media should keep
/// their own buffering; the tree code calls `get` once per cold node load.
///
/// # Example
///
/// ```rust
/// use mst_engine::storage::{BlockStore, MemoryBlockStore};
///
/// # fn example() -> mst_engine::Result<()> {
/// let storage = MemoryBlockStore::new();
///
/// let cid = storage.put(b"hello world")?;
/// assert_eq!(&storage.get(&cid)?[..], b"hello world");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub trait BlockStore {
    /// Get a block by CID
    ///
    /// Fails with [`NotFound`](crate::MstErrorKind::NotFound) if the block is absent.
    fn get(&self, cid: &IpldCid) -> Result<Bytes>;

    /// Put a block, return its CID
    ///
    /// The CID is calculated from the data using SHA-256 and the DAG-CBOR codec,
    /// so the same data always produces the same CID and repeated puts are no-ops.
    fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Put many blocks at once under caller-supplied CIDs
    ///
    /// The provided CIDs should match the data. Implementations may choose to
    /// recalculate and validate them; the in-memory stores do not.
    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()>;
}

impl<T: BlockStore> BlockStore for &T {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        (**self).get(cid)
    }

    fn put(&self, data: &[u8]) -> Result<IpldCid> {
        (**self).put(data)
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        (**self).has(cid)
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        (**self).put_many(blocks)
    }
}

impl<T: BlockStore> BlockStore for Arc<T> {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        (**self).get(cid)
    }

    fn put(&self, data: &[u8]) -> Result<IpldCid> {
        (**self).put(data)
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        (**self).has(cid)
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        (**self).put_many(blocks)
    }
}

pub mod layered;
pub mod memory;

pub use layered::LayeredBlockStore;
pub use memory::MemoryBlockStore;
