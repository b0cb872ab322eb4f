//! MST node data structures

use std::fmt;

use cid::Cid as IpldCid;
use serde::{Deserialize, Deserializer};
use smol_str::SmolStr;

use super::util::{common_prefix_len, compute_cid};
use crate::error::{MstError, NodeError, Result};

/// One key/value binding inside a node, plus the subtree to its right
///
/// This is the in-memory representation: the key is stored in full.
/// Prefix compression only exists in the wire format (see [`TreeEntry`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Full key
    pub key: SmolStr,
    /// CID of the value block
    pub value: IpldCid,
    /// Subtree covering keys strictly between this key and the next one
    pub right: Option<IpldCid>,
}

/// Immutable MST node
///
/// Keys and subtrees interleave like so:
///
/// ```text
/// keys:          (0,    1,    2,    3)
/// subtrees:   (0,    1,    2,    3,    4)
/// ```
///
/// Subtree slot 0 is `left`; slot `i + 1` is `entries[i].right`.
///
/// A node never changes once built. "Mutating" a tree means building new
/// nodes and storing them under new CIDs.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Node {
    left: Option<IpldCid>,
    entries: Vec<Entry>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("left", &self.left)
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Node {
    /// The empty node (root of an empty tree)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a node, checking that keys are strictly increasing
    pub fn new(left: Option<IpldCid>, entries: Vec<Entry>) -> Result<Self> {
        for (index, pair) in entries.windows(2).enumerate() {
            if pair[0].key >= pair[1].key {
                return Err(NodeError::KeyOrder { index: index + 1 }.into());
            }
        }
        Ok(Self { left, entries })
    }

    /// Build a node from parallel leaf and subtree-slot vectors
    ///
    /// `subtrees` must have exactly `leaves.len() + 1` slots.
    pub fn from_parts(leaves: Vec<(SmolStr, IpldCid)>, subtrees: Vec<Option<IpldCid>>) -> Result<Self> {
        if subtrees.len() != leaves.len() + 1 {
            return Err(NodeError::SubtreeCount {
                expected: leaves.len() + 1,
                actual: subtrees.len(),
            }
            .into());
        }

        let mut slots = subtrees.into_iter();
        let left = slots.next().flatten();
        let entries = leaves
            .into_iter()
            .zip(slots)
            .map(|((key, value), right)| Entry { key, value, right })
            .collect();

        Self::new(left, entries)
    }

    /// Split into parallel leaf and subtree-slot vectors (inverse of [`Node::from_parts`])
    pub fn into_parts(self) -> (Vec<(SmolStr, IpldCid)>, Vec<Option<IpldCid>>) {
        let mut leaves = Vec::with_capacity(self.entries.len());
        let mut subtrees = Vec::with_capacity(self.entries.len() + 1);
        subtrees.push(self.left);
        for entry in self.entries {
            leaves.push((entry.key, entry.value));
            subtrees.push(entry.right);
        }
        (leaves, subtrees)
    }

    /// Leftmost subtree pointer
    pub fn left(&self) -> Option<IpldCid> {
        self.left
    }

    /// Entries in key order
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of entries (keys) in this node
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the node has no entries and no left pointer
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.left.is_none()
    }

    /// True if the node holds at least one key
    pub fn has_keys(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Subtree slot `i`, for `i` in `0..=len()`
    pub fn subtree(&self, i: usize) -> Option<IpldCid> {
        if i == 0 {
            self.left
        } else {
            self.entries.get(i - 1).and_then(|e| e.right)
        }
    }

    /// All subtree slots, left first
    pub fn subtrees(&self) -> impl Iterator<Item = Option<IpldCid>> + '_ {
        std::iter::once(self.left).chain(self.entries.iter().map(|e| e.right))
    }

    /// Index of the first key >= `key` (`len()` if all keys are smaller)
    pub fn gte_index(&self, key: &str) -> usize {
        self.entries.partition_point(|e| e.key.as_str() < key)
    }

    /// Index of `key` in this node, if present
    pub fn find(&self, key: &str) -> Option<usize> {
        let i = self.gte_index(key);
        (i < self.entries.len() && self.entries[i].key == key).then_some(i)
    }

    /// Convert to the prefix-compressed wire format
    pub fn to_data(&self) -> Result<NodeData> {
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut last_key: &[u8] = &[];

        for entry in &self.entries {
            let key = entry.key.as_bytes();
            let prefix_len = common_prefix_len(last_key, key);

            entries.push(TreeEntry {
                key_suffix: key[prefix_len..].to_vec(),
                prefix_len: u8::try_from(prefix_len)
                    .map_err(|_| NodeError::PrefixOverflow(prefix_len))?,
                tree: entry.right,
                value: entry.value,
            });

            last_key = key;
        }

        Ok(NodeData {
            entries,
            left: self.left,
        })
    }

    /// Rebuild a node from the wire format, validating prefix compression and key order
    pub fn from_data(data: NodeData) -> Result<Self> {
        let mut entries: Vec<Entry> = Vec::with_capacity(data.entries.len());
        let mut last_key: Vec<u8> = Vec::new();

        for (index, wire) in data.entries.into_iter().enumerate() {
            let prefix_len = wire.prefix_len as usize;
            if prefix_len > last_key.len() {
                return Err(NodeError::PrefixTooLong {
                    prefix_len,
                    prev_len: last_key.len(),
                }
                .into());
            }

            // The shared prefix must be maximal, otherwise the same node has two encodings
            if let (Some(prev), Some(next)) =
                (last_key.get(prefix_len), wire.key_suffix.first())
            {
                if prev == next {
                    return Err(NodeError::NonCanonicalPrefix { prefix_len, index }.into());
                }
            }

            let mut full_key = last_key[..prefix_len].to_vec();
            full_key.extend_from_slice(&wire.key_suffix);

            if full_key.is_empty() || (index > 0 && full_key <= last_key) {
                return Err(NodeError::KeyOrder { index }.into());
            }

            let key = std::str::from_utf8(&full_key)
                .map_err(|_| NodeError::InvalidUtf8 { index })?;

            entries.push(Entry {
                key: SmolStr::new(key),
                value: wire.value,
                right: wire.tree,
            });
            last_key = full_key;
        }

        Ok(Self {
            left: data.left,
            entries,
        })
    }

    /// Canonical DAG-CBOR encoding of this node
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(&self.to_data()?).map_err(MstError::serialization)
    }

    /// Decode a node from DAG-CBOR bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let data: NodeData = serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|e| NodeError::Framing(Box::new(e)))?;
        Self::from_data(data)
    }

    /// CID of this node's canonical encoding
    pub fn cid(&self) -> Result<IpldCid> {
        compute_cid(&self.serialize()?)
    }
}

// ============================================================================
// Wire format structures (for CBOR serialization)
// ============================================================================

/// Wire format entry (prefix-compressed leaf with optional subtree pointer)
///
/// Fields are declared in DAG-CBOR canonical order (k, p, t, v).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeEntry {
    /// Key suffix after prefix (CBOR byte string)
    #[serde(rename = "k", with = "serde_bytes")]
    pub key_suffix: Vec<u8>,

    /// Prefix length (bytes shared with previous key in node)
    #[serde(rename = "p")]
    pub prefix_len: u8,

    /// Optional subtree pointer, always present on the wire (explicit null)
    #[serde(rename = "t", deserialize_with = "explicit_nullable")]
    pub tree: Option<IpldCid>,

    /// CID of the value
    #[serde(rename = "v")]
    pub value: IpldCid,
}

/// Wire format node data (serialized as DAG-CBOR)
///
/// `l` is always written, as `null` when there is no left subtree. Skipping it
/// would produce different bytes and break CID agreement with other implementations.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeData {
    /// Entries in this node (sorted by full key, prefix-compressed)
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,

    /// Left-most subtree pointer
    #[serde(rename = "l", deserialize_with = "explicit_nullable")]
    pub left: Option<IpldCid>,
}

// A field with `deserialize_with` is required, so a missing `t`/`l` is a framing error
// instead of silently decoding as `None`.
fn explicit_nullable<'de, D>(deserializer: D) -> std::result::Result<Option<IpldCid>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<IpldCid>::deserialize(deserializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MstErrorKind;
    use crate::mst::util::compute_cid_with_codec;
    use crate::RAW_CID_CODEC;

    fn test_cid(n: u8) -> IpldCid {
        compute_cid_with_codec(RAW_CID_CODEC, &[n]).unwrap()
    }

    fn leaf(key: &str, n: u8) -> (SmolStr, IpldCid) {
        (SmolStr::new(key), test_cid(n))
    }

    #[test]
    fn test_empty_node_encoding() {
        let node = Node::empty();
        let bytes = node.serialize().unwrap();
        // {"e": [], "l": null}
        assert_eq!(hex::encode(&bytes), "a2616580616cf6");
        assert_eq!(Node::deserialize(&bytes).unwrap(), node);
        assert!(node.is_empty());
    }

    #[test]
    fn test_empty_node_cid_matches_atproto() {
        assert_eq!(
            Node::empty().cid().unwrap().to_string(),
            "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm"
        );
    }

    #[test]
    fn test_prefix_compression() {
        let node = Node::from_parts(
            vec![leaf("app.bsky/1", 1), leaf("app.bsky/2", 2), leaf("com.x/a", 3)],
            vec![None; 4],
        )
        .unwrap();

        let data = node.to_data().unwrap();
        assert_eq!(data.entries[0].prefix_len, 0);
        assert_eq!(data.entries[0].key_suffix, b"app.bsky/1");
        assert_eq!(data.entries[1].prefix_len, 9);
        assert_eq!(data.entries[1].key_suffix, b"2");
        assert_eq!(data.entries[2].prefix_len, 0);
        assert_eq!(data.entries[2].key_suffix, b"com.x/a");
    }

    #[test]
    fn test_roundtrip_with_subtrees() {
        let node = Node::from_parts(
            vec![leaf("a/1", 1), leaf("a/2", 2)],
            vec![Some(test_cid(10)), None, Some(test_cid(11))],
        )
        .unwrap();

        let bytes = node.serialize().unwrap();
        let decoded = Node::deserialize(&bytes).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.cid().unwrap(), node.cid().unwrap());
        assert_eq!(decoded.subtree(0), Some(test_cid(10)));
        assert_eq!(decoded.subtree(1), None);
        assert_eq!(decoded.subtree(2), Some(test_cid(11)));
    }

    #[test]
    fn test_parts_roundtrip() {
        let leaves = vec![leaf("a", 1), leaf("b", 2)];
        let subtrees = vec![None, Some(test_cid(5)), None];
        let node = Node::from_parts(leaves.clone(), subtrees.clone()).unwrap();
        assert_eq!(node.into_parts(), (leaves, subtrees));
    }

    #[test]
    fn test_from_parts_rejects_bad_shape() {
        let err = Node::from_parts(vec![leaf("a", 1)], vec![None]).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);

        let err = Node::from_parts(vec![leaf("b", 1), leaf("a", 2)], vec![None; 3]).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);
    }

    #[test]
    fn test_gte_index_and_find() {
        let node = Node::from_parts(vec![leaf("b", 1), leaf("d", 2)], vec![None; 3]).unwrap();
        assert_eq!(node.gte_index("a"), 0);
        assert_eq!(node.gte_index("b"), 0);
        assert_eq!(node.gte_index("c"), 1);
        assert_eq!(node.gte_index("e"), 2);
        assert_eq!(node.find("d"), Some(1));
        assert_eq!(node.find("c"), None);
    }

    fn encode(data: &NodeData) -> Vec<u8> {
        serde_ipld_dagcbor::to_vec(data).unwrap()
    }

    fn wire(p: u8, k: &[u8]) -> TreeEntry {
        TreeEntry {
            key_suffix: k.to_vec(),
            prefix_len: p,
            tree: None,
            value: test_cid(1),
        }
    }

    #[test]
    fn test_rejects_prefix_longer_than_previous_key() {
        let data = NodeData {
            entries: vec![wire(0, b"ab"), wire(3, b"c")],
            left: None,
        };
        let err = Node::deserialize(&encode(&data)).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);
    }

    #[test]
    fn test_rejects_non_maximal_prefix() {
        // "ab" then "ac" encoded with prefix 0 instead of 1
        let data = NodeData {
            entries: vec![wire(0, b"ab"), wire(0, b"ac")],
            left: None,
        };
        let err = Node::deserialize(&encode(&data)).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);
    }

    #[test]
    fn test_rejects_unsorted_keys() {
        let data = NodeData {
            entries: vec![wire(0, b"b"), wire(0, b"a")],
            left: None,
        };
        let err = Node::deserialize(&encode(&data)).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);

        let dup = NodeData {
            entries: vec![wire(0, b"a"), wire(1, b"")],
            left: None,
        };
        assert!(Node::deserialize(&encode(&dup)).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Node::deserialize(b"\xff\x00garbage").unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);

        // {"e": []} without the explicit null left pointer
        let err = Node::deserialize(&hex::decode("a1616580").unwrap()).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::MalformedNode);
    }
}
