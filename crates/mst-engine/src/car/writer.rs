//! CAR file writing utilities

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use cid::Cid as IpldCid;
use integer_encoding::VarIntWriter;

use super::reader::CarHeader;
use crate::error::Result;
use crate::mst::store::NodeStore;
use crate::mst::walker::NodeWalker;
use crate::storage::BlockStore;

/// Streaming CARv1 writer
///
/// The header is written lazily with the first block, or by [`CarWriter::finish`]
/// if no blocks were written.
#[derive(Debug)]
pub struct CarWriter<W: Write> {
    header: CarHeader,
    writer: W,
    is_header_written: bool,
    bytes_written: usize,
}

impl<W: Write> CarWriter<W> {
    /// Create a writer that will emit `header` before the first block
    pub fn new(header: CarHeader, writer: W) -> Self {
        Self {
            header,
            writer,
            is_header_written: false,
            bytes_written: 0,
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.is_header_written {
            let header_bytes = self.header.encode()?;
            self.bytes_written += self.writer.write_varint(header_bytes.len() as u64)?;
            self.writer.write_all(&header_bytes)?;
            self.bytes_written += header_bytes.len();
            self.is_header_written = true;
        }
        Ok(())
    }

    /// Append one `(cid, block)` section
    pub fn write(&mut self, cid: IpldCid, data: impl AsRef<[u8]>) -> Result<()> {
        self.write_header()?;

        let cid_bytes = cid.to_bytes();
        let data = data.as_ref();
        let section_len = cid_bytes.len() + data.len();

        self.bytes_written += self.writer.write_varint(section_len as u64)?;
        self.writer.write_all(&cid_bytes)?;
        self.writer.write_all(data)?;
        self.bytes_written += section_len;
        Ok(())
    }

    /// Bytes written so far (header + sections)
    pub fn current_offset(&self) -> usize {
        self.bytes_written
    }

    /// Write the header if still pending, flush, and return the inner writer
    pub fn finish(mut self) -> Result<W> {
        self.write_header()?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Write a CAR stream with the given roots and blocks, in iteration order
pub fn write_car<W: Write>(
    writer: W,
    roots: &[IpldCid],
    blocks: impl IntoIterator<Item = (IpldCid, Bytes)>,
) -> Result<W> {
    let mut car = CarWriter::new(CarHeader::new_v1(roots.to_vec()), writer);
    for (cid, data) in blocks {
        car.write(cid, &data)?;
    }
    car.finish()
}

/// Write a CAR archive to an in-memory buffer
pub fn write_car_bytes(
    roots: &[IpldCid],
    blocks: impl IntoIterator<Item = (IpldCid, Bytes)>,
) -> Result<Vec<u8>> {
    write_car(Vec::new(), roots, blocks)
}

/// Write every MST node reachable from `root` as a CAR stream rooted at `root`
///
/// Nodes are written in pre-order, root first, using the exact bytes held by
/// the block store. Value blocks are not included. Returns the number of
/// blocks written.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(root = %root)))]
pub fn export_tree_car<S: BlockStore, W: Write>(ns: &NodeStore<S>, root: IpldCid, writer: W) -> Result<usize> {
    let mut car = CarWriter::new(CarHeader::new_v1(vec![root]), writer);
    let mut count = 0;

    for cid in NodeWalker::new(ns, root)?.iter_node_cids() {
        let cid = cid?;
        car.write(cid, ns.blocks().get(&cid)?)?;
        count += 1;
    }

    car.finish()?;
    Ok(count)
}

/// [`export_tree_car`] into a file at `path`
pub fn export_tree_car_file<S: BlockStore>(
    ns: &NodeStore<S>,
    root: IpldCid,
    path: impl AsRef<Path>,
) -> Result<usize> {
    let file = File::create(path)?;
    export_tree_car(ns, root, BufWriter::new(file))
}
