//! Copy-on-write tree mutation
//!
//! Every operation takes a root CID and returns a new root CID, storing the
//! nodes it creates through the [`NodeStore`]. Nothing reachable from the old
//! root is modified, so old roots stay valid.

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::node::Node;
use super::store::NodeStore;
use super::util::{key_height, validate_key};
use crate::error::{MstError, Result};
use crate::storage::BlockStore;

/// Write operation for batch application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Create new key (error if it exists)
    Create {
        /// Key
        key: SmolStr,
        /// Value CID
        cid: IpldCid,
    },

    /// Update existing key (error if it does not exist)
    Update {
        /// Key
        key: SmolStr,
        /// New value CID
        cid: IpldCid,
        /// Expected current value, checked when present
        prev: Option<IpldCid>,
    },

    /// Delete existing key (error if it does not exist)
    Delete {
        /// Key
        key: SmolStr,
        /// Expected current value, checked when present
        prev: Option<IpldCid>,
    },
}

impl WriteOp {
    /// Key this operation touches
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Create { key, .. } | WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => {
                key.as_str()
            }
        }
    }
}

/// Tree mutation over a [`NodeStore`]
///
/// Stateless between calls. Only nodes on the path to the changed key (plus
/// the spines touched by a split or merge) are loaded and re-stored.
#[derive(Debug)]
pub struct NodeWrangler<'a, S: BlockStore> {
    ns: &'a NodeStore<S>,
}

impl<'a, S: BlockStore> NodeWrangler<'a, S> {
    /// Create a wrangler over the given node store
    pub fn new(ns: &'a NodeStore<S>) -> Self {
        Self { ns }
    }

    /// Insert or update `key`, returning the new root
    ///
    /// Putting a value identical to the current one returns `root` unchanged.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(root = %root, key = %key)))]
    pub fn put(&self, root: IpldCid, key: &str, value: IpldCid) -> Result<IpldCid> {
        validate_key(key)?;

        let node = self.ns.get_node(root)?;
        if node.is_empty() {
            return self.store_changed(root, self.put_here(&node, key, value)?);
        }

        let kh = key_height(key);
        let mut th = self.ns.height(&node)?;
        let (mut top_cid, mut top) = (root, node);

        // The key belongs above the current root: stack keyless parents until it fits
        while kh > th {
            let parent = Node::new(Some(top_cid), Vec::new())?;
            top_cid = self.ns.store_node(&parent)?;
            top = std::sync::Arc::new(parent);
            th += 1;
        }

        let changed = self.put_recursive(&top, key, value, kh, th)?;
        self.store_changed(top_cid, changed)
    }

    /// Remove `key`, returning the new root
    ///
    /// Fails with `KeyNotFound` if the key is absent. Removing the last key
    /// yields the canonical empty root.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(root = %root, key = %key)))]
    pub fn delete(&self, root: IpldCid, key: &str) -> Result<IpldCid> {
        let node = self.ns.get_node(root)?;
        let th = self.ns.height(&node)?;

        let remaining = self.delete_recursive(&node, key, key_height(key), th)?;
        match self.squash_top(remaining)? {
            Some(cid) => Ok(cid),
            None => self.ns.empty_root(),
        }
    }

    /// Apply a batch of writes in order, returning the final root
    ///
    /// The batch stops at the first failing operation and returns its error.
    pub fn apply(&self, root: IpldCid, ops: &[WriteOp]) -> Result<IpldCid> {
        let mut root = root;
        for op in ops {
            root = self.apply_one(root, op)?;
        }
        Ok(root)
    }

    fn apply_one(&self, root: IpldCid, op: &WriteOp) -> Result<IpldCid> {
        let current = super::walker::NodeWalker::get(self.ns, root, op.key())?;
        match op {
            WriteOp::Create { key, cid } => {
                if current.is_some() {
                    return Err(MstError::already_exists(key));
                }
                self.put(root, key, *cid)
            }
            WriteOp::Update { key, cid, prev } => {
                check_prev(key, current, *prev)?;
                self.put(root, key, *cid)
            }
            WriteOp::Delete { key, prev } => {
                check_prev(key, current, *prev)?;
                self.delete(root, key)
            }
        }
    }

    fn store_changed(&self, unchanged: IpldCid, node: Option<Node>) -> Result<IpldCid> {
        match node {
            Some(node) => self.ns.store_node(&node),
            None => Ok(unchanged),
        }
    }

    // Store a node unless it is entirely empty, in which case the slot becomes None
    fn store_optional(&self, node: Node) -> Result<Option<IpldCid>> {
        if node.is_empty() {
            return Ok(None);
        }
        self.ns.store_node(&node).map(Some)
    }

    // `None` means the subtree is unchanged
    fn put_recursive(
        &self,
        node: &Node,
        key: &str,
        value: IpldCid,
        kh: usize,
        th: usize,
    ) -> Result<Option<Node>> {
        if kh == th {
            return self.put_here(node, key, value);
        }

        // kh < th: the key lives further down. A missing subtree is grown from an empty node.
        let i = node.gte_index(key);
        let new_child = match node.subtree(i) {
            Some(child_cid) => {
                let child = self.ns.get_node(child_cid)?;
                match self.put_recursive(&child, key, value, kh, th - 1)? {
                    Some(changed) => self.ns.store_node(&changed)?,
                    None => return Ok(None),
                }
            }
            None => match self.put_recursive(&Node::empty(), key, value, kh, th - 1)? {
                Some(changed) => self.ns.store_node(&changed)?,
                None => return Ok(None),
            },
        };

        let (leaves, mut subtrees) = node.clone().into_parts();
        subtrees[i] = Some(new_child);
        Node::from_parts(leaves, subtrees).map(Some)
    }

    fn put_here(&self, node: &Node, key: &str, value: IpldCid) -> Result<Option<Node>> {
        let i = node.gte_index(key);
        let (mut leaves, mut subtrees) = node.clone().into_parts();

        if let Some((_, existing)) = leaves.get_mut(i).filter(|(k, _)| k == key) {
            if *existing == value {
                return Ok(None);
            }
            *existing = value;
            return Node::from_parts(leaves, subtrees).map(Some);
        }

        let (lsub, rsub) = self.split_on_key(subtrees[i], key)?;
        leaves.insert(i, (SmolStr::new(key), value));
        subtrees.splice(i..=i, [lsub, rsub]);
        Node::from_parts(leaves, subtrees).map(Some)
    }

    // Keys < key go left, keys > key go right, recursively down the straddling spine
    fn split_on_key(
        &self,
        cid: Option<IpldCid>,
        key: &str,
    ) -> Result<(Option<IpldCid>, Option<IpldCid>)> {
        let Some(cid) = cid else {
            return Ok((None, None));
        };

        let node = self.ns.get_node(cid)?;
        let i = node.gte_index(key);
        let (lsub, rsub) = self.split_on_key(node.subtree(i), key)?;

        let (mut right_leaves, subtrees) = node.as_ref().clone().into_parts();
        let left_leaves: Vec<_> = right_leaves.drain(..i).collect();

        let mut left_subtrees = subtrees[..i].to_vec();
        left_subtrees.push(lsub);
        let mut right_subtrees = vec![rsub];
        right_subtrees.extend_from_slice(&subtrees[i + 1..]);

        let left = self.store_optional(Node::from_parts(left_leaves, left_subtrees)?)?;
        let right = self.store_optional(Node::from_parts(right_leaves, right_subtrees)?)?;
        Ok((left, right))
    }

    fn delete_recursive(
        &self,
        node: &Node,
        key: &str,
        kh: usize,
        th: usize,
    ) -> Result<Option<IpldCid>> {
        if kh > th {
            return Err(MstError::key_not_found(key));
        }

        let i = node.gte_index(key);
        let (mut leaves, mut subtrees) = node.clone().into_parts();

        if kh < th {
            let child_cid = subtrees[i].ok_or_else(|| MstError::key_not_found(key))?;
            let child = self.ns.get_node(child_cid)?;
            subtrees[i] = self.delete_recursive(&child, key, kh, th - 1)?;
            return self.store_optional(Node::from_parts(leaves, subtrees)?);
        }

        if node.find(key) != Some(i) {
            return Err(MstError::key_not_found(key));
        }

        leaves.remove(i);
        let merged = self.merge(subtrees[i], subtrees[i + 1])?;
        subtrees.splice(i..=i + 1, [merged]);
        self.store_optional(Node::from_parts(leaves, subtrees)?)
    }

    // Concatenate two adjacent same-layer subtrees, merging the spines where they touch
    fn merge(&self, left: Option<IpldCid>, right: Option<IpldCid>) -> Result<Option<IpldCid>> {
        let (left_cid, right_cid) = match (left, right) {
            (None, other) | (other, None) => return Ok(other),
            (Some(l), Some(r)) => (l, r),
        };

        let (mut leaves, mut subtrees) = self.ns.get_node(left_cid)?.as_ref().clone().into_parts();
        let (right_leaves, right_subtrees) = self.ns.get_node(right_cid)?.as_ref().clone().into_parts();

        let left_edge = subtrees.pop().flatten();
        let middle = self.merge(left_edge, right_subtrees[0])?;

        leaves.extend(right_leaves);
        subtrees.push(middle);
        subtrees.extend_from_slice(&right_subtrees[1..]);
        self.store_optional(Node::from_parts(leaves, subtrees)?)
    }

    // Strip keyless nodes from the top of the tree
    fn squash_top(&self, cid: Option<IpldCid>) -> Result<Option<IpldCid>> {
        let mut current = cid;
        while let Some(cid) = current {
            let node = self.ns.get_node(cid)?;
            if node.has_keys() || node.left().is_none() {
                return Ok(Some(cid));
            }
            current = node.left();
        }
        Ok(None)
    }
}

fn check_prev(key: &str, current: Option<IpldCid>, prev: Option<IpldCid>) -> Result<()> {
    let Some(current) = current else {
        return Err(MstError::key_not_found(key));
    };
    match prev {
        Some(expected) if expected != current => Err(MstError::prev_mismatch(key, expected, current)),
        _ => Ok(()),
    }
}
