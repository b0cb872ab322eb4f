//! CAR (Content Addressable aRchive) file I/O
//!
//! CARv1 is the interchange format for content-addressed blocks. This module
//! reads and writes archives, and exposes one as a read-only [`BlockStore`](crate::storage::BlockStore).
//!
//! # Examples
//!
//! Exporting a tree and reading it back:
//! ```rust
//! use mst_engine::car::{CarBlockStore, export_tree_car};
//! use mst_engine::{MemoryBlockStore, NodeStore, NodeWalker, NodeWrangler};
//! use mst_engine::mst::util::compute_cid;
//! use std::io::Cursor;
//!
//! # fn example() -> mst_engine::Result<()> {
//! let ns = NodeStore::new(MemoryBlockStore::new());
//! let root = NodeWrangler::new(&ns).put(ns.empty_root()?, "blue", compute_cid(b"value")?)?;
//!
//! let mut buf = Vec::new();
//! export_tree_car(&ns, root, &mut buf)?;
//!
//! let imported = NodeStore::new(CarBlockStore::new(Cursor::new(buf))?);
//! assert!(NodeWalker::get(&imported, root, "blue")?.is_some());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod reader;
pub mod store;
pub mod writer;

pub use reader::{CarHeader, CarSections, ParsedCar, parse_car_bytes, read_car, read_header};
pub use store::{CarBlockStore, CarStoreOptions};
pub use writer::{CarWriter, export_tree_car, export_tree_car_file, write_car, write_car_bytes};
