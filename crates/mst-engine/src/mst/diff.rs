//! MST diff calculation

use std::cmp::Ordering;
use std::collections::BTreeSet;

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::cursor::{CursorPosition, MstCursor};
use super::store::NodeStore;
use super::walker::{Bound, NodeWalker};
use super::wrangler::WriteOp;
use crate::error::Result;
use crate::storage::BlockStore;

/// A single key-level change between two trees
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordDelta {
    /// Key present only in the new tree
    Added {
        /// Key
        key: SmolStr,
        /// New value
        value: IpldCid,
    },
    /// Key present only in the old tree
    Removed {
        /// Key
        key: SmolStr,
        /// Old value
        value: IpldCid,
    },
    /// Key present in both trees with different values
    Changed {
        /// Key
        key: SmolStr,
        /// Old value
        old: IpldCid,
        /// New value
        new: IpldCid,
    },
}

impl RecordDelta {
    /// Key this delta applies to
    pub fn key(&self) -> &str {
        match self {
            RecordDelta::Added { key, .. }
            | RecordDelta::Removed { key, .. }
            | RecordDelta::Changed { key, .. } => key.as_str(),
        }
    }

    /// The same change seen from the other side
    pub fn invert(&self) -> Self {
        match self.clone() {
            RecordDelta::Added { key, value } => RecordDelta::Removed { key, value },
            RecordDelta::Removed { key, value } => RecordDelta::Added { key, value },
            RecordDelta::Changed { key, old, new } => RecordDelta::Changed { key, old: new, new: old },
        }
    }
}

/// Diff between two MST states
///
/// Represents the changes needed to transform one tree into another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MstDiff {
    /// Key-level changes, sorted by key
    pub deltas: Vec<RecordDelta>,

    /// MST nodes reachable from the new root but not from the old one
    pub created_nodes: BTreeSet<IpldCid>,

    /// MST nodes reachable from the old root but not from the new one
    pub deleted_nodes: BTreeSet<IpldCid>,
}

impl MstDiff {
    /// Check if diff is empty (no key-level changes)
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Count total operations
    pub fn op_count(&self) -> usize {
        self.deltas.len()
    }

    /// Keys added, with their values
    pub fn creates(&self) -> impl Iterator<Item = (&str, IpldCid)> + '_ {
        self.deltas.iter().filter_map(|d| match d {
            RecordDelta::Added { key, value } => Some((key.as_str(), *value)),
            _ => None,
        })
    }

    /// Keys changed, with (old, new) values
    pub fn updates(&self) -> impl Iterator<Item = (&str, IpldCid, IpldCid)> + '_ {
        self.deltas.iter().filter_map(|d| match d {
            RecordDelta::Changed { key, old, new } => Some((key.as_str(), *old, *new)),
            _ => None,
        })
    }

    /// Keys removed, with their old values
    pub fn deletes(&self) -> impl Iterator<Item = (&str, IpldCid)> + '_ {
        self.deltas.iter().filter_map(|d| match d {
            RecordDelta::Removed { key, value } => Some((key.as_str(), *value)),
            _ => None,
        })
    }

    /// The diff from the new tree back to the old one
    pub fn invert(&self) -> Self {
        Self {
            deltas: self.deltas.iter().map(RecordDelta::invert).collect(),
            created_nodes: self.deleted_nodes.clone(),
            deleted_nodes: self.created_nodes.clone(),
        }
    }

    /// Convert diff to write operations
    ///
    /// Applying these to the old root with
    /// [`NodeWrangler::apply`](super::NodeWrangler::apply) yields the new root.
    /// Updates and deletes carry the old value as `prev`.
    pub fn to_write_ops(&self) -> Vec<WriteOp> {
        self.deltas
            .iter()
            .map(|delta| match delta.clone() {
                RecordDelta::Added { key, value } => WriteOp::Create { key, cid: value },
                RecordDelta::Changed { key, old, new } => WriteOp::Update {
                    key,
                    cid: new,
                    prev: Some(old),
                },
                RecordDelta::Removed { key, value } => WriteOp::Delete {
                    key,
                    prev: Some(value),
                },
            })
            .collect()
    }
}

/// Compute the diff from `old` to `new`
///
/// Walks both trees in lock step. Subtrees with equal CIDs on both sides are
/// skipped without being loaded; everything else is entered, higher layer first.
/// Every node entered is recorded, which gives the created/deleted node sets.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(old = %old, new = %new)))]
pub fn diff<S: BlockStore>(ns: &NodeStore<S>, old: IpldCid, new: IpldCid) -> Result<MstDiff> {
    let mut old_cursor = MstCursor::new(ns, old)?;
    let mut new_cursor = MstCursor::new(ns, new)?;
    let mut deltas = Vec::new();

    loop {
        match (old_cursor.current().clone(), new_cursor.current().clone()) {
            (CursorPosition::End, CursorPosition::End) => break,

            (CursorPosition::Tree { cid: a, .. }, CursorPosition::Tree { cid: b, .. }) if a == b => {
                old_cursor.skip_subtree();
                new_cursor.skip_subtree();
            }

            (
                CursorPosition::Leaf { key: old_key, cid: old_value },
                CursorPosition::Leaf { key: new_key, cid: new_value },
            ) => match old_key.cmp(&new_key) {
                Ordering::Equal => {
                    if old_value != new_value {
                        deltas.push(RecordDelta::Changed {
                            key: old_key,
                            old: old_value,
                            new: new_value,
                        });
                    }
                    old_cursor.advance()?;
                    new_cursor.advance()?;
                }
                Ordering::Less => {
                    deltas.push(RecordDelta::Removed { key: old_key, value: old_value });
                    old_cursor.advance()?;
                }
                Ordering::Greater => {
                    deltas.push(RecordDelta::Added { key: new_key, value: new_value });
                    new_cursor.advance()?;
                }
            },

            // Only one side has anything left
            (CursorPosition::Leaf { key, cid }, CursorPosition::End) => {
                deltas.push(RecordDelta::Removed { key, value: cid });
                old_cursor.advance()?;
            }
            (CursorPosition::End, CursorPosition::Leaf { key, cid }) => {
                deltas.push(RecordDelta::Added { key, value: cid });
                new_cursor.advance()?;
            }
            (CursorPosition::Tree { .. }, CursorPosition::End) => old_cursor.advance()?,
            (CursorPosition::End, CursorPosition::Tree { .. }) => new_cursor.advance()?,

            // A leaf below the other side's subtree cannot appear on that side
            (CursorPosition::Leaf { key, cid }, CursorPosition::Tree { lower, .. }) => {
                if lower >= Bound::Key(key.clone()) {
                    deltas.push(RecordDelta::Removed { key, value: cid });
                    old_cursor.advance()?;
                } else {
                    new_cursor.advance()?;
                }
            }
            (CursorPosition::Tree { lower, .. }, CursorPosition::Leaf { key, cid }) => {
                if lower >= Bound::Key(key.clone()) {
                    deltas.push(RecordDelta::Added { key, value: cid });
                    new_cursor.advance()?;
                } else {
                    old_cursor.advance()?;
                }
            }

            (CursorPosition::Tree { layer: old_layer, .. }, CursorPosition::Tree { layer: new_layer, .. }) => {
                match old_layer.cmp(&new_layer) {
                    Ordering::Greater => old_cursor.advance()?,
                    Ordering::Less => new_cursor.advance()?,
                    Ordering::Equal => {
                        old_cursor.advance()?;
                        new_cursor.advance()?;
                    }
                }
            }
        }
    }

    let old_visited = old_cursor.into_visited();
    let new_visited = new_cursor.into_visited();

    #[cfg(feature = "tracing")]
    tracing::debug!(
        deltas = deltas.len(),
        old_visited = old_visited.len(),
        new_visited = new_visited.len(),
        "diff complete"
    );

    Ok(MstDiff {
        deltas,
        created_nodes: new_visited.difference(&old_visited).copied().collect(),
        deleted_nodes: old_visited.difference(&new_visited).copied().collect(),
    })
}

/// Compute the same diff as [`diff`] by enumerating both trees completely
///
/// Much slower on large trees, but obviously correct. Useful as a reference.
pub fn diff_by_enumeration<S: BlockStore>(ns: &NodeStore<S>, old: IpldCid, new: IpldCid) -> Result<MstDiff> {
    let old_nodes: BTreeSet<IpldCid> = NodeWalker::new(ns, old)?.iter_node_cids().collect::<Result<_>>()?;
    let new_nodes: BTreeSet<IpldCid> = NodeWalker::new(ns, new)?.iter_node_cids().collect::<Result<_>>()?;

    let old_kv: Vec<(SmolStr, IpldCid)> = NodeWalker::iterate(ns, old, None).collect::<Result<_>>()?;
    let new_kv: Vec<(SmolStr, IpldCid)> = NodeWalker::iterate(ns, new, None).collect::<Result<_>>()?;

    let mut deltas = Vec::new();
    let mut old_iter = old_kv.into_iter().peekable();
    let mut new_iter = new_kv.into_iter().peekable();
    loop {
        let order = match (old_iter.peek(), new_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((a, _)), Some((b, _))) => a.cmp(b),
        };
        match order {
            Ordering::Less => {
                if let Some((key, value)) = old_iter.next() {
                    deltas.push(RecordDelta::Removed { key, value });
                }
            }
            Ordering::Greater => {
                if let Some((key, value)) = new_iter.next() {
                    deltas.push(RecordDelta::Added { key, value });
                }
            }
            Ordering::Equal => {
                if let (Some((key, old)), Some((_, new))) = (old_iter.next(), new_iter.next()) {
                    if old != new {
                        deltas.push(RecordDelta::Changed { key, old, new });
                    }
                }
            }
        }
    }

    Ok(MstDiff {
        deltas,
        created_nodes: new_nodes.difference(&old_nodes).copied().collect(),
        deleted_nodes: old_nodes.difference(&new_nodes).copied().collect(),
    })
}
