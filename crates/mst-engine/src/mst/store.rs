//! Cached, hash-verifying node storage

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::sync::Arc;

use cid::Cid as IpldCid;
use lru::LruCache;

use super::node::Node;
use super::util::{compute_cid, key_height};
use crate::error::{MstError, Result};
use crate::storage::BlockStore;

/// Default number of decoded nodes kept in memory
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// Configuration for a [`NodeStore`]
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct NodeStoreOptions {
    /// Maximum number of decoded nodes held in the LRU cache
    #[builder(default = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: NonZeroUsize,
}

impl Default for NodeStoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Node-level view of a [`BlockStore`]
///
/// Loads are verified: bytes fetched from the block store must hash to the
/// requested CID before they are decoded. Decoded nodes are kept in a bounded
/// LRU cache keyed by CID, and since nodes are immutable the cache never needs
/// invalidation. Eviction only costs a re-fetch.
///
/// The cache lives behind a `RefCell`, so a `NodeStore` is not `Sync`. Share the
/// underlying block store (e.g. via `Arc`) and give each worker its own `NodeStore`.
pub struct NodeStore<S: BlockStore> {
    blocks: S,
    cache: RefCell<LruCache<IpldCid, Arc<Node>>>,
}

impl<S: BlockStore> NodeStore<S> {
    /// Create a node store with default options
    pub fn new(blocks: S) -> Self {
        Self::with_options(blocks, NodeStoreOptions::default())
    }

    /// Create a node store with the given options
    pub fn with_options(blocks: S, options: NodeStoreOptions) -> Self {
        Self {
            blocks,
            cache: RefCell::new(LruCache::new(options.cache_capacity)),
        }
    }

    /// Underlying block store
    pub fn blocks(&self) -> &S {
        &self.blocks
    }

    /// Number of nodes currently cached
    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Drop every cached node
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Load a node by CID
    ///
    /// Cache hits are returned without touching the block store. Misses fetch,
    /// verify and decode; failures are never cached.
    pub fn get_node(&self, cid: IpldCid) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.borrow_mut().get(&cid) {
            return Ok(Arc::clone(node));
        }

        let node = Arc::new(self.load(cid)?);
        self.insert_cached(cid, Arc::clone(&node));
        Ok(node)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all, fields(cid = %cid)))]
    fn load(&self, cid: IpldCid) -> Result<Node> {
        #[cfg(feature = "tracing")]
        tracing::trace!("node cache miss");

        let bytes = self.blocks.get(&cid)?;
        let actual = compute_cid(&bytes)?;
        if actual != cid {
            #[cfg(feature = "tracing")]
            tracing::warn!(actual = %actual, "block does not hash to its CID");
            return Err(MstError::hash_mismatch(cid, actual));
        }

        Node::deserialize(&bytes).map_err(|e| e.with_context(format!("node {}", cid)))
    }

    /// Serialize, hash and persist a node, returning its CID
    ///
    /// Storing the same node twice is a no-op apart from the cache refresh.
    pub fn store_node(&self, node: &Node) -> Result<IpldCid> {
        let bytes = node.serialize()?;
        let cid = self.blocks.put(&bytes)?;
        self.insert_cached(cid, Arc::new(node.clone()));
        Ok(cid)
    }

    /// Store the canonical empty node and return its CID (the root of an empty tree)
    pub fn empty_root(&self) -> Result<IpldCid> {
        self.store_node(&Node::empty())
    }

    /// Layer of a node
    ///
    /// The layer of the first key if the node has keys, 0 for the empty node,
    /// otherwise one above its left child.
    pub fn height(&self, node: &Node) -> Result<usize> {
        if let Some(first) = node.entries().first() {
            return Ok(key_height(&first.key));
        }
        match node.left() {
            None => Ok(0),
            Some(left) => Ok(self.height(&*self.get_node(left)?)? + 1),
        }
    }

    /// Indented, human-readable dump of the tree under `root`
    pub fn pretty(&self, root: Option<IpldCid>) -> Result<String> {
        let mut out = String::new();
        self.pretty_into(&mut out, root, 0)?;
        Ok(out)
    }

    fn pretty_into(&self, out: &mut String, cid: Option<IpldCid>, depth: usize) -> Result<()> {
        let indent = "  ".repeat(depth);
        let Some(cid) = cid else {
            out.push_str(&format!("{indent}<empty>\n"));
            return Ok(());
        };

        let node = self.get_node(cid)?;
        out.push_str(&format!("{indent}{cid} (layer {})\n", self.height(&node)?));
        self.pretty_into(out, node.left(), depth + 1)?;
        for entry in node.entries() {
            out.push_str(&format!("{indent}{:?} -> {}\n", entry.key.as_str(), entry.value));
            self.pretty_into(out, entry.right, depth + 1)?;
        }
        Ok(())
    }

    fn insert_cached(&self, cid: IpldCid, node: Arc<Node>) {
        let evicted = self.cache.borrow_mut().push(cid, node);
        // `push` also hands back the previous value when the key was already cached
        if let Some((_old, _)) = evicted.filter(|(old, _)| *old != cid) {
            #[cfg(feature = "tracing")]
            tracing::trace!(evicted = %_old, "node cache eviction");
        }
    }
}

impl<S: BlockStore> std::fmt::Debug for NodeStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.borrow();
        f.debug_struct("NodeStore")
            .field("cached", &cache.len())
            .field("capacity", &cache.cap())
            .finish_non_exhaustive()
    }
}
