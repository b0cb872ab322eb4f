//! Structural properties of the tree under random workloads
//!
//! Checks that root CIDs depend only on contents, that mutations touch only
//! the nodes on their path, and that reads survive a tiny cache.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use cid::Cid as IpldCid;
use mst_engine::mst::util::compute_cid_with_codec;
use mst_engine::{
    BlockStore, MemoryBlockStore, MstErrorKind, Node, NodeStore, NodeStoreOptions, NodeWalker,
    NodeWrangler, RAW_CID_CODEC, Result,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const RECORDS: usize = 500;

fn value(n: usize) -> IpldCid {
    compute_cid_with_codec(RAW_CID_CODEC, &n.to_be_bytes()).unwrap()
}

fn record_key(n: usize) -> String {
    format!("app.bsky.feed.post/{n:05}")
}

fn build<S: BlockStore>(ns: &NodeStore<S>, keys: &[(String, IpldCid)]) -> IpldCid {
    let wrangler = NodeWrangler::new(ns);
    let mut root = ns.empty_root().unwrap();
    for (key, cid) in keys {
        root = wrangler.put(root, key, *cid).unwrap();
    }
    root
}

fn records() -> Vec<(String, IpldCid)> {
    (0..RECORDS).map(|i| (record_key(i), value(i))).collect()
}

/// Block store wrapper counting `get` calls
struct CountingStore<S> {
    inner: S,
    reads: AtomicUsize,
}

impl<S> CountingStore<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    fn take_reads(&self) -> usize {
        self.reads.swap(0, Ordering::SeqCst)
    }
}

impl<S: BlockStore> BlockStore for CountingStore<S> {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(cid)
    }

    fn put(&self, data: &[u8]) -> Result<IpldCid> {
        self.inner.put(data)
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        self.inner.has(cid)
    }

    fn put_many(&self, blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        self.inner.put_many(blocks)
    }
}

#[test]
fn root_is_independent_of_insertion_order() {
    let mut rng = StdRng::seed_from_u64(0x6d7374);
    let mut keys = records();

    let expected = build(&NodeStore::new(MemoryBlockStore::new()), &keys);
    for _ in 0..5 {
        keys.shuffle(&mut rng);
        let root = build(&NodeStore::new(MemoryBlockStore::new()), &keys);
        assert_eq!(root, expected);
    }
}

#[test]
fn iteration_is_sorted_and_complete() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys = records();
    keys.shuffle(&mut rng);

    let ns = NodeStore::new(MemoryBlockStore::new());
    let root = build(&ns, &keys);

    let listed: Vec<(String, IpldCid)> = NodeWalker::iterate(&ns, root, None)
        .map(|kv| kv.map(|(k, v)| (k.to_string(), v)))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(listed, records());
}

#[test]
fn range_scan_matches_btreemap() {
    let ns = NodeStore::new(MemoryBlockStore::new());
    let keys = records();
    let root = build(&ns, &keys);
    let reference: BTreeMap<String, IpldCid> = keys.into_iter().collect();

    let (start, end) = (record_key(120), record_key(180));
    let scanned: Vec<String> = NodeWalker::iter_range(&ns, root, &start, &end, false)
        .map(|kv| kv.map(|(k, _)| k.to_string()))
        .collect::<Result<_>>()
        .unwrap();
    let expected: Vec<String> = reference.range(start..end).map(|(k, _)| k.clone()).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn every_stored_node_round_trips() {
    let ns = NodeStore::new(MemoryBlockStore::new());
    let root = build(&ns, &records());

    for item in NodeWalker::new(&ns, root).unwrap().iter_nodes() {
        let (cid, node) = item.unwrap();
        let bytes = node.serialize().unwrap();
        assert_eq!(&bytes[..], &ns.blocks().get(&cid).unwrap()[..]);
        assert_eq!(Node::deserialize(&bytes).unwrap(), *node);
        assert_eq!(node.cid().unwrap(), cid);
    }
}

#[test]
fn delete_undoes_insert() {
    let ns = NodeStore::new(MemoryBlockStore::new());
    let wrangler = NodeWrangler::new(&ns);
    let root = build(&ns, &records());

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..50 {
        let key = format!("app.bsky.feed.like/{:08x}", rng.r#gen::<u32>());
        let grown = wrangler.put(root, &key, value(1)).unwrap();
        assert_ne!(grown, root);
        assert_eq!(wrangler.delete(grown, &key).unwrap(), root);
    }
}

#[test]
fn deleting_everything_returns_the_empty_root() {
    let ns = NodeStore::new(MemoryBlockStore::new());
    let wrangler = NodeWrangler::new(&ns);
    let mut keys = records();
    let mut root = build(&ns, &keys);

    keys.shuffle(&mut StdRng::seed_from_u64(3));
    for (key, _) in &keys {
        root = wrangler.delete(root, key).unwrap();
    }
    assert_eq!(root, ns.empty_root().unwrap());
}

#[test]
fn mutation_reads_only_the_path() {
    let counting = CountingStore::new(MemoryBlockStore::new());
    let ns = NodeStore::new(&counting);
    let root = build(&ns, &records());

    let total_nodes = NodeWalker::new(&ns, root)
        .unwrap()
        .iter_node_cids()
        .count();
    let depth = NodeWalker::path(&ns, root, &record_key(250)).unwrap().len();

    // cold cache, so every node touched is a block store read
    ns.clear_cache();
    counting.take_reads();

    let wrangler = NodeWrangler::new(&ns);
    let updated = wrangler.put(root, &record_key(250), value(9999)).unwrap();
    let reads = counting.take_reads();
    assert!(reads <= depth, "update read {reads} nodes, path is {depth}");

    ns.clear_cache();
    wrangler.put(updated, "app.bsky.feed.post/00250x", value(1)).unwrap();
    let reads = counting.take_reads();
    assert!(
        reads < total_nodes / 4,
        "insert read {reads} of {total_nodes} nodes"
    );
}

#[test]
fn tiny_cache_gives_identical_results() {
    let blocks = MemoryBlockStore::new();
    let big = NodeStore::new(blocks.clone());
    let root = build(&big, &records());

    let options = NodeStoreOptions::new()
        .cache_capacity(NonZeroUsize::MIN)
        .build();
    let tiny = NodeStore::with_options(blocks, options);

    let from_big: Vec<_> = NodeWalker::iterate(&big, root, None).collect::<Result<_>>().unwrap();
    let from_tiny: Vec<_> = NodeWalker::iterate(&tiny, root, None).collect::<Result<_>>().unwrap();
    assert_eq!(from_big, from_tiny);
    assert!(tiny.cached_len() <= 1);

    let wrangler = NodeWrangler::new(&tiny);
    let updated = wrangler.put(root, &record_key(3), value(0)).unwrap();
    let expected = NodeWrangler::new(&big).put(root, &record_key(3), value(0)).unwrap();
    assert_eq!(updated, expected);
}

#[test]
fn small_record_scenario() {
    let ns = NodeStore::new(MemoryBlockStore::new());
    let wrangler = NodeWrangler::new(&ns);
    let empty = ns.empty_root().unwrap();

    let mut root = empty;
    for (i, key) in ["app.bsky/3", "app.bsky/1", "app.bsky/2"].iter().enumerate() {
        root = wrangler.put(root, key, value(i)).unwrap();
    }

    let keys: Vec<String> = NodeWalker::iterate(&ns, root, None)
        .map(|kv| kv.map(|(k, _)| k.to_string()))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(keys, ["app.bsky/1", "app.bsky/2", "app.bsky/3"]);

    let without = wrangler.delete(root, "app.bsky/2").unwrap();
    assert!(NodeWalker::get(&ns, without, "app.bsky/2").unwrap().is_none());
    assert_eq!(
        NodeWalker::seek(&ns, without, "app.bsky/2").unwrap_err().kind(),
        MstErrorKind::KeyNotFound
    );
    assert_eq!(wrangler.put(without, "app.bsky/2", value(2)).unwrap(), root);
}

#[test]
fn random_workload_matches_btreemap() {
    let mut rng = StdRng::seed_from_u64(0xdead);
    let ns = NodeStore::new(MemoryBlockStore::new());
    let wrangler = NodeWrangler::new(&ns);
    let mut reference = BTreeMap::new();
    let mut root = ns.empty_root().unwrap();

    for step in 0..1000 {
        let key = record_key(rng.gen_range(0..200));
        if rng.gen_bool(0.3) {
            let res = wrangler.delete(root, &key);
            match reference.remove(&key) {
                Some(_) => root = res.unwrap(),
                None => assert_eq!(res.unwrap_err().kind(), MstErrorKind::KeyNotFound),
            }
        } else {
            root = wrangler.put(root, &key, value(step)).unwrap();
            reference.insert(key, value(step));
        }
    }

    let listed: BTreeMap<String, IpldCid> = NodeWalker::iterate(&ns, root, None)
        .map(|kv| kv.map(|(k, v)| (k.to_string(), v)))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(listed, reference);

    let rebuilt = build(
        &NodeStore::new(MemoryBlockStore::new()),
        &reference.into_iter().collect::<Vec<_>>(),
    );
    assert_eq!(rebuilt, root);
}
