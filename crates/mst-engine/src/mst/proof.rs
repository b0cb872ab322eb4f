//! Inclusion and exclusion proofs
//!
//! A proof for a key is the set of node CIDs visited while searching for it.
//! Copying those blocks into an otherwise empty store is enough to repeat the
//! search, so a verifier holding only the proof (and the root CID) can confirm
//! that the key is, or is not, in the tree.

use std::collections::BTreeSet;

use cid::Cid as IpldCid;

use super::store::NodeStore;
use super::walker::NodeWalker;
use crate::error::{MstError, MstErrorKind, ProofError, Result};
use crate::storage::BlockStore;

fn search<S: BlockStore>(
    ns: &NodeStore<S>,
    root: IpldCid,
    key: &str,
) -> Result<(Option<IpldCid>, BTreeSet<IpldCid>)> {
    let mut walker = NodeWalker::new(ns, root)?;
    let value = walker.find_value(key)?;
    Ok((value, walker.stack_cids().collect()))
}

/// Node CIDs proving `key` is present under `root`
///
/// Fails with a `Proof` error if the key is absent.
pub fn build_inclusion_proof<S: BlockStore>(
    ns: &NodeStore<S>,
    root: IpldCid,
    key: &str,
) -> Result<BTreeSet<IpldCid>> {
    match search(ns, root, key)? {
        (Some(_), proof) => Ok(proof),
        (None, _) => Err(ProofError::KeyAbsent { key: key.to_string() }.into()),
    }
}

/// Node CIDs proving `key` is absent under `root`
///
/// Fails with a `Proof` error if the key is present.
pub fn build_exclusion_proof<S: BlockStore>(
    ns: &NodeStore<S>,
    root: IpldCid,
    key: &str,
) -> Result<BTreeSet<IpldCid>> {
    match search(ns, root, key)? {
        (None, proof) => Ok(proof),
        (Some(_), _) => Err(ProofError::KeyPresent { key: key.to_string() }.into()),
    }
}

// Missing blocks mean the proof is incomplete
fn verify_search<S: BlockStore>(ns: &NodeStore<S>, root: IpldCid, key: &str) -> Result<Option<IpldCid>> {
    let mut walker = match NodeWalker::new(ns, root) {
        Ok(walker) => walker,
        Err(e) if e.kind() == MstErrorKind::NotFound => {
            return Err(MstError::invalid_proof("missing MST blocks"));
        }
        Err(e) => return Err(e),
    };
    match walker.find_value(key) {
        Err(e) if e.kind() == MstErrorKind::NotFound => Err(MstError::invalid_proof("missing MST blocks")),
        other => other,
    }
}

/// Check that `key` is present under `root` using only the blocks in `ns`
pub fn verify_inclusion<S: BlockStore>(ns: &NodeStore<S>, root: IpldCid, key: &str) -> Result<()> {
    match verify_search(ns, root, key)? {
        Some(_) => Ok(()),
        None => Err(MstError::invalid_proof("key not present in MST").with_context(format!("key: {}", key))),
    }
}

/// Check that `key` is absent under `root` using only the blocks in `ns`
pub fn verify_exclusion<S: BlockStore>(ns: &NodeStore<S>, root: IpldCid, key: &str) -> Result<()> {
    match verify_search(ns, root, key)? {
        None => Ok(()),
        Some(_) => Err(MstError::invalid_proof("key is present in MST").with_context(format!("key: {}", key))),
    }
}
