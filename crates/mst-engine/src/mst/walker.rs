//! Stack-based tree walker: lookups, ordered iteration, node enumeration
//!
//! Recall the node layout:
//!
//! ```text
//! keys:  (lpath)  (0,    1,    2,    3)  (rpath)
//! vals:           (0,    1,    2,    3)
//! subtrees:    (0,    1,    2,    3,    4)
//! ```
//!
//! A walker sits on one subtree slot of the node on top of its stack. `lpath`
//! and `rpath` are the keys on either side of that slot (or the bounds inherited
//! from the parent). Walking off the end of a node brings it back up to the next
//! slot of its parent.

use std::sync::Arc;

use cid::Cid as IpldCid;
use smol_str::SmolStr;

use super::node::Node;
use super::store::NodeStore;
use super::util::key_height;
use crate::error::{MstError, Result};
use crate::storage::BlockStore;

/// Position bound used for walker ranges
///
/// `Min` sorts before every key and `Max` after every key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    /// Below all keys
    Min,
    /// A concrete key
    Key(SmolStr),
    /// Above all keys
    Max,
}

impl From<&str> for Bound {
    fn from(key: &str) -> Self {
        Bound::Key(SmolStr::new(key))
    }
}

#[derive(Debug, Clone)]
struct Frame {
    cid: IpldCid,
    node: Arc<Node>,
    lpath: Bound,
    rpath: Bound,
    idx: usize,
    height: usize,
}

/// Cursor over a tree, positioned on one subtree slot of one node
#[derive(Debug)]
pub struct NodeWalker<'a, S: BlockStore> {
    ns: &'a NodeStore<S>,
    stack: Vec<Frame>,
}

impl<'a, S: BlockStore> NodeWalker<'a, S> {
    /// Start at slot 0 of the root node, spanning all keys
    pub fn new(ns: &'a NodeStore<S>, root: IpldCid) -> Result<Self> {
        Self::with_bounds(ns, root, Bound::Min, Bound::Max)
    }

    /// Start at slot 0 of `root`, which is known to hold keys within `(lpath, rpath)`
    pub fn with_bounds(ns: &'a NodeStore<S>, root: IpldCid, lpath: Bound, rpath: Bound) -> Result<Self> {
        let node = ns.get_node(root)?;
        let height = ns.height(&node)?;
        Ok(Self {
            ns,
            stack: vec![Frame {
                cid: root,
                node,
                lpath,
                rpath,
                idx: 0,
                height,
            }],
        })
    }

    /// Walker over the subtree at the current slot, bounded by the current `lpath`/`rpath`
    pub fn subtree_walker(&self) -> Result<Option<Self>> {
        match self.subtree() {
            None => Ok(None),
            Some(cid) => Self::with_bounds(self.ns, cid, self.lpath(), self.rpath()).map(Some),
        }
    }

    fn frame(&self) -> &Frame {
        // The root frame is never popped
        &self.stack[self.stack.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let top = self.stack.len() - 1;
        &mut self.stack[top]
    }

    /// Layer of the current node
    pub fn height(&self) -> usize {
        self.frame().height
    }

    /// Current node
    pub fn node(&self) -> &Arc<Node> {
        &self.frame().node
    }

    /// CID of the current node
    pub fn node_cid(&self) -> IpldCid {
        self.frame().cid
    }

    /// Key (or bound) immediately left of the current slot
    pub fn lpath(&self) -> Bound {
        let frame = self.frame();
        match frame.idx {
            0 => frame.lpath.clone(),
            i => Bound::Key(frame.node.entries()[i - 1].key.clone()),
        }
    }

    /// Value bound to `lpath`, if it is a key of the current node
    pub fn lval(&self) -> Option<IpldCid> {
        let frame = self.frame();
        match frame.idx {
            0 => None,
            i => Some(frame.node.entries()[i - 1].value),
        }
    }

    /// Subtree at the current slot
    pub fn subtree(&self) -> Option<IpldCid> {
        let frame = self.frame();
        frame.node.subtree(frame.idx)
    }

    /// Key (or bound) immediately right of the current slot
    pub fn rpath(&self) -> Bound {
        let frame = self.frame();
        match frame.node.entries().get(frame.idx) {
            Some(entry) => Bound::Key(entry.key.clone()),
            None => frame.rpath.clone(),
        }
    }

    /// Value bound to `rpath`, if it is a key of the current node
    pub fn rval(&self) -> Option<IpldCid> {
        let frame = self.frame();
        frame.node.entries().get(frame.idx).map(|e| e.value)
    }

    /// True once every key reachable from the starting node has been passed
    pub fn is_final(&self) -> bool {
        self.subtree().is_none() && self.rpath() == self.stack[0].rpath
    }

    /// True if the current node has a slot to the right of this one
    pub fn can_go_right(&self) -> bool {
        let frame = self.frame();
        frame.idx < frame.node.len()
    }

    /// Move one slot right, within the current node
    pub fn right(&mut self) -> Result<()> {
        if !self.can_go_right() {
            return Err(MstError::malformed_node(
                "walker is already at the rightmost slot of this node",
            ));
        }
        self.frame_mut().idx += 1;
        Ok(())
    }

    /// Move one slot right, climbing out of exhausted nodes first
    pub fn right_or_up(&mut self) -> Result<()> {
        while !self.can_go_right() {
            if self.stack.len() == 1 {
                return Err(MstError::malformed_node("walker moved past the end of the tree"));
            }
            self.stack.pop();
        }
        self.frame_mut().idx += 1;
        Ok(())
    }

    /// Descend into the subtree at the current slot
    pub fn down(&mut self) -> Result<()> {
        let Some(cid) = self.subtree() else {
            return Err(MstError::malformed_node("no subtree to descend into at this slot"));
        };

        let node = self.ns.get_node(cid)?;
        let frame = Frame {
            cid,
            node,
            lpath: self.lpath(),
            rpath: self.rpath(),
            idx: 0,
            height: self.height().saturating_sub(1),
        };
        self.stack.push(frame);
        Ok(())
    }

    /// Step over the next key/value pair in order, returning it
    pub fn next_kv(&mut self) -> Result<(SmolStr, IpldCid)> {
        while self.subtree().is_some() {
            self.down()?;
        }
        self.right_or_up()?;

        match (self.lpath(), self.lval()) {
            (Bound::Key(key), Some(value)) => Ok((key, value)),
            _ => Err(MstError::malformed_node("walker stopped between keys")),
        }
    }

    /// Position so that the next `next_kv` returns the first key >= `start`
    pub fn seek_start(&mut self, start: &Bound) -> Result<()> {
        loop {
            while self.rpath() < *start {
                self.right_or_up()?;
            }
            if self.subtree().is_none() {
                return Ok(());
            }
            self.down()?;
        }
    }

    /// Search for `key` from the current position
    ///
    /// Returns the bound value, or `None` if the key is absent. Exits early when
    /// the key's layer is above the node being searched. On return the stack
    /// holds exactly the nodes visited by the search.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn find_value(&mut self, key: &str) -> Result<Option<IpldCid>> {
        let target = Bound::from(key);
        let target_height = key_height(key);

        loop {
            if target_height > self.height() {
                return Ok(None);
            }
            while self.rpath() < target {
                if !self.can_go_right() {
                    return Ok(None);
                }
                self.right()?;
            }
            if self.rpath() == target {
                return Ok(self.rval());
            }
            if self.subtree().is_none() {
                return Ok(None);
            }
            self.down()?;
        }
    }

    /// CIDs of the nodes on the stack, root first
    pub fn stack_cids(&self) -> impl Iterator<Item = IpldCid> + '_ {
        self.stack.iter().map(|f| f.cid)
    }

    /// Nodes on the stack, root first
    pub fn stack_nodes(&self) -> Vec<Arc<Node>> {
        self.stack.iter().map(|f| Arc::clone(&f.node)).collect()
    }

    /// Every node reachable from the current position, pre-order
    pub fn iter_nodes(self) -> Nodes<'a, S> {
        Nodes {
            walker: self,
            started: false,
            done: false,
        }
    }

    /// CIDs of every node reachable from the current position, pre-order
    pub fn iter_node_cids(self) -> impl Iterator<Item = Result<IpldCid>> + 'a {
        self.iter_nodes().map(|res| res.map(|(cid, _)| cid))
    }

    /// Look up `key`, failing with `KeyNotFound` if absent
    pub fn seek(ns: &'a NodeStore<S>, root: IpldCid, key: &str) -> Result<IpldCid> {
        Self::new(ns, root)?
            .find_value(key)?
            .ok_or_else(|| MstError::key_not_found(key))
    }

    /// Look up `key`, returning `None` if absent
    pub fn get(ns: &'a NodeStore<S>, root: IpldCid, key: &str) -> Result<Option<IpldCid>> {
        Self::new(ns, root)?.find_value(key)
    }

    /// Nodes visited when searching for `key`, root first, whether or not it is present
    pub fn path(ns: &'a NodeStore<S>, root: IpldCid, key: &str) -> Result<Vec<Arc<Node>>> {
        let mut walker = Self::new(ns, root)?;
        walker.find_value(key)?;
        Ok(walker.stack_nodes())
    }

    /// Lazily iterate key/value pairs in ascending order, starting at `from_key` (inclusive)
    pub fn iterate(ns: &'a NodeStore<S>, root: IpldCid, from_key: Option<&str>) -> Iter<'a, S> {
        Iter {
            ns,
            root,
            start: from_key.map(Bound::from).unwrap_or(Bound::Min),
            end: None,
            walker: None,
            done: false,
        }
    }

    /// Lazily iterate key/value pairs with `start <= key < end` (or `<= end` if `end_inclusive`)
    pub fn iter_range(
        ns: &'a NodeStore<S>,
        root: IpldCid,
        start: &str,
        end: &str,
        end_inclusive: bool,
    ) -> Iter<'a, S> {
        Iter {
            ns,
            root,
            start: Bound::from(start),
            end: Some((SmolStr::new(end), end_inclusive)),
            walker: None,
            done: false,
        }
    }
}

/// Lazy, ordered key/value iterator
///
/// Nothing is loaded until the first call to `next`. Memory use is bounded by tree depth.
/// The first error ends iteration.
#[derive(Debug)]
pub struct Iter<'a, S: BlockStore> {
    ns: &'a NodeStore<S>,
    root: IpldCid,
    start: Bound,
    end: Option<(SmolStr, bool)>,
    walker: Option<NodeWalker<'a, S>>,
    done: bool,
}

impl<'a, S: BlockStore> Iter<'a, S> {
    fn step(&mut self) -> Result<Option<(SmolStr, IpldCid)>> {
        if self.walker.is_none() {
            let mut walker = NodeWalker::new(self.ns, self.root)?;
            walker.seek_start(&self.start)?;
            self.walker = Some(walker);
        }
        let Some(walker) = self.walker.as_mut() else {
            return Ok(None);
        };

        if walker.is_final() {
            return Ok(None);
        }

        let (key, value) = walker.next_kv()?;
        if let Some((end, inclusive)) = &self.end {
            if key > *end || (!inclusive && key == *end) {
                return Ok(None);
            }
        }
        Ok(Some((key, value)))
    }
}

impl<'a, S: BlockStore> Iterator for Iter<'a, S> {
    type Item = Result<(SmolStr, IpldCid)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(kv)) => Some(Ok(kv)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Pre-order node iterator, see [`NodeWalker::iter_nodes`]
#[derive(Debug)]
pub struct Nodes<'a, S: BlockStore> {
    walker: NodeWalker<'a, S>,
    started: bool,
    done: bool,
}

impl<'a, S: BlockStore> Nodes<'a, S> {
    fn step(&mut self) -> Result<Option<(IpldCid, Arc<Node>)>> {
        if !self.started {
            self.started = true;
            return Ok(Some(self.current()));
        }
        loop {
            if self.walker.is_final() {
                return Ok(None);
            }
            if self.walker.subtree().is_some() {
                self.walker.down()?;
                return Ok(Some(self.current()));
            }
            self.walker.right_or_up()?;
        }
    }

    fn current(&self) -> (IpldCid, Arc<Node>) {
        (self.walker.node_cid(), Arc::clone(self.walker.node()))
    }
}

impl<'a, S: BlockStore> Iterator for Nodes<'a, S> {
    type Item = Result<(IpldCid, Arc<Node>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
