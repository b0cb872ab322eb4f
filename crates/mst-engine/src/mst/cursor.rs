//! MST cursor for lock-step tree traversal

use std::collections::BTreeSet;
use std::sync::Arc;

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::node::Node;
use super::store::NodeStore;
use super::walker::Bound;
use crate::error::Result;
use crate::storage::BlockStore;

/// Position within an MST traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorPosition {
    /// Pointing at a leaf entry
    Leaf {
        /// Leaf key
        key: SmolStr,
        /// Value CID
        cid: IpldCid,
    },

    /// Pointing at a subtree that has not been entered
    Tree {
        /// Subtree root CID
        cid: IpldCid,
        /// Layer of the subtree root
        layer: usize,
        /// Every key in the subtree is strictly greater than this
        lower: Bound,
    },

    /// Past the end of traversal
    End,
}

#[derive(Debug)]
struct Level {
    node: Arc<Node>,
    lower: Bound,
    layer: usize,
    // Position in the interleaved sequence: even = subtree slot, odd = entry
    slot: usize,
}

/// Cursor for navigating an MST in sorted order
///
/// Yields leaves and untouched subtrees in key order. Subtrees are not loaded
/// until the caller steps into them, so two cursors can be advanced in lock
/// step and skip everything they share.
///
/// - `advance()`: Move to next item in sorted order (stepping into a subtree)
/// - `skip_subtree()`: Skip entire subtree at current position
/// - `current()`: Get current position without moving
///
/// Every node the cursor steps into is recorded in [`MstCursor::visited`].
#[derive(Debug)]
pub struct MstCursor<'a, S: BlockStore> {
    ns: &'a NodeStore<S>,
    path: Vec<Level>,
    current: CursorPosition,
    visited: BTreeSet<IpldCid>,
}

impl<'a, S: BlockStore> MstCursor<'a, S> {
    /// Create new cursor positioned on the (unentered) root
    pub fn new(ns: &'a NodeStore<S>, root: IpldCid) -> Result<Self> {
        let layer = ns.height(&*ns.get_node(root)?)?;
        Ok(Self {
            ns,
            path: Vec::new(),
            current: CursorPosition::Tree {
                cid: root,
                layer,
                lower: Bound::Min,
            },
            visited: BTreeSet::new(),
        })
    }

    /// Get current position without advancing
    pub fn current(&self) -> &CursorPosition {
        &self.current
    }

    /// Check if cursor is at end
    pub fn is_end(&self) -> bool {
        matches!(self.current, CursorPosition::End)
    }

    /// Get key at current position (if pointing at leaf)
    pub fn key(&self) -> Option<&str> {
        match &self.current {
            CursorPosition::Leaf { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }

    /// Nodes stepped into so far
    pub fn visited(&self) -> &BTreeSet<IpldCid> {
        &self.visited
    }

    /// Consume the cursor, returning the nodes it stepped into
    pub fn into_visited(self) -> BTreeSet<IpldCid> {
        self.visited
    }

    /// Move to the next position
    ///
    /// On a tree, steps into it (loading the node). On a leaf, moves past it.
    pub fn advance(&mut self) -> Result<()> {
        match &self.current {
            CursorPosition::End => Ok(()),
            CursorPosition::Leaf { .. } => {
                self.step_past();
                Ok(())
            }
            CursorPosition::Tree { cid, layer, lower } => {
                let (cid, layer, lower) = (*cid, *layer, lower.clone());
                let node = self.ns.get_node(cid)?;
                self.visited.insert(cid);
                self.path.push(Level {
                    node,
                    lower,
                    layer,
                    slot: 0,
                });
                self.settle();
                Ok(())
            }
        }
    }

    /// Skip the subtree at the current position without loading it
    ///
    /// Behaves like `advance()` on a leaf.
    pub fn skip_subtree(&mut self) {
        if !self.is_end() {
            self.step_past();
        }
    }

    fn step_past(&mut self) {
        match self.path.last_mut() {
            Some(level) => {
                level.slot += 1;
                self.settle();
            }
            None => self.current = CursorPosition::End,
        }
    }

    // Resolve `current` from the top level's slot, skipping empty subtree slots
    // and climbing out of finished nodes.
    fn settle(&mut self) {
        loop {
            let Some(level) = self.path.last_mut() else {
                self.current = CursorPosition::End;
                return;
            };

            let n = level.node.len();
            if level.slot > 2 * n {
                self.path.pop();
                if let Some(parent) = self.path.last_mut() {
                    parent.slot += 1;
                }
                continue;
            }

            if level.slot % 2 == 1 {
                let entry = &level.node.entries()[level.slot / 2];
                self.current = CursorPosition::Leaf {
                    key: entry.key.clone(),
                    cid: entry.value,
                };
                return;
            }

            let i = level.slot / 2;
            match level.node.subtree(i) {
                None => level.slot += 1,
                Some(cid) => {
                    let lower = match i {
                        0 => level.lower.clone(),
                        _ => Bound::Key(level.node.entries()[i - 1].key.clone()),
                    };
                    self.current = CursorPosition::Tree {
                        cid,
                        layer: level.layer.saturating_sub(1),
                        lower,
                    };
                    return;
                }
            }
        }
    }
}
