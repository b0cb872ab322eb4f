//! Merkle Search Tree implementation

pub mod cursor;
pub mod diff;
pub mod node;
pub mod proof;
pub mod store;
pub mod util;
pub mod walker;
pub mod wrangler;

pub use cursor::{CursorPosition, MstCursor};
pub use diff::{MstDiff, RecordDelta, diff, diff_by_enumeration};
pub use node::{Entry, Node, NodeData, TreeEntry};
pub use proof::{build_exclusion_proof, build_inclusion_proof, verify_exclusion, verify_inclusion};
pub use store::{DEFAULT_CACHE_CAPACITY, NodeStore, NodeStoreOptions};
pub use walker::{Bound, Iter, NodeWalker, Nodes};
pub use wrangler::{NodeWrangler, WriteOp};
