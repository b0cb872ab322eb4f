//! Merkle Search Tree engine
//!
//! This crate provides building blocks for content-addressed, hash-ordered key/value maps:
//!
//! - **Nodes**: Immutable MST nodes with canonical, prefix-compressed DAG-CBOR encoding
//! - **Node store**: Hash-verifying node loads through a bounded LRU cache
//! - **Traversal**: Point lookups, lazy ordered iteration, range scans, node enumeration
//! - **Mutation**: Copy-on-write insert/update/delete that keeps the layer invariant
//! - **Diff**: Structural diff between two roots that skips shared subtrees
//! - **Proofs**: Inclusion and exclusion proofs as sets of node CIDs
//! - **CAR I/O**: Read and write CARv1 archives
//! - **Storage**: Pluggable block storage with in-memory and layered implementations
//!
//! # Design Philosophy
//!
//! - Nodes are values addressed by hash, never mutated after being built
//! - Two trees with the same contents always have the same root CID
//! - Only nodes on the path to a change are rewritten
//! - Everything is synchronous; blocking happens at the [`BlockStore`] boundary
//!
//! # Example
//!
//! ```rust
//! use mst_engine::{MemoryBlockStore, NodeStore, NodeWalker, NodeWrangler};
//! use mst_engine::mst::util::compute_cid_with_codec;
//!
//! # fn example() -> mst_engine::Result<()> {
//! let ns = NodeStore::new(MemoryBlockStore::new());
//! let value = compute_cid_with_codec(mst_engine::RAW_CID_CODEC, b"hello")?;
//!
//! let root = ns.empty_root()?;
//! let root = NodeWrangler::new(&ns).put(root, "app.bsky/1", value)?;
//!
//! assert_eq!(NodeWalker::seek(&ns, root, "app.bsky/1")?, value);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CAR (Content Addressable aRchive) utilities
pub mod car;
pub mod error;
/// Merkle Search Tree implementation
pub mod mst;
/// Block storage abstraction
pub mod storage;

pub use car::{CarBlockStore, CarStoreOptions};
pub use error::{MstError, MstErrorKind, Result};
pub use mst::{
    Bound, MstDiff, Node, NodeStore, NodeStoreOptions, NodeWalker, NodeWrangler, RecordDelta,
    WriteOp,
};
pub use storage::{BlockStore, LayeredBlockStore, MemoryBlockStore};

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR_CID_CODEC: u64 = 0x71;

/// Raw codec identifier for CIDs (0x55)
pub const RAW_CID_CODEC: u64 = 0x55;

/// SHA2-256 multihash code (0x12)
pub const SHA2_256: u64 = 0x12;
