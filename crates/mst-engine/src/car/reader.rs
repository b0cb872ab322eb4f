//! CAR file reading utilities
//!
//! Parses CARv1: a varint-framed DAG-CBOR header followed by varint-framed
//! sections, each holding a CID and the block bytes it names.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use cid::Cid as IpldCid;
use integer_encoding::VarIntReader;
use serde::{Deserialize, Serialize};

use crate::error::{CarError, MstError, Result};

/// CAR file header (version 1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    /// Root CIDs
    pub roots: Vec<IpldCid>,
    /// Format version, always 1
    pub version: u64,
}

impl CarHeader {
    /// Creates a version 1 header
    pub fn new_v1(roots: Vec<IpldCid>) -> Self {
        Self { roots, version: 1 }
    }

    /// Canonical DAG-CBOR encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| CarError::Header(Box::new(e)).into())
    }

    /// Decode and check the version
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header: CarHeader =
            serde_ipld_dagcbor::from_slice(bytes).map_err(|e| CarError::Header(Box::new(e)))?;
        if header.version != 1 {
            return Err(CarError::UnsupportedVersion(header.version).into());
        }
        Ok(header)
    }
}

/// Parsed CAR file data
#[derive(Debug, Clone)]
pub struct ParsedCar {
    /// Root CIDs from the header
    pub roots: Vec<IpldCid>,
    /// All blocks in the CAR file
    pub blocks: BTreeMap<IpldCid, Bytes>,
}

pub(crate) fn truncated(what: &'static str) -> impl Fn(io::Error) -> MstError {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CarError::Truncated(what).into(),
        _ => MstError::io(e),
    }
}

/// Read the header from the start of a CAR stream
pub fn read_header<R: Read>(reader: &mut R) -> Result<CarHeader> {
    let len: u64 = reader.read_varint().map_err(truncated("header length"))?;

    let mut buf = Vec::new();
    reader.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(CarError::Truncated("header").into());
    }

    CarHeader::decode(&buf)
}

/// Split a section body into its CID and the offset where block data starts
pub(crate) fn split_section(section: &[u8]) -> Result<(IpldCid, usize)> {
    let mut cursor = Cursor::new(section);
    let cid = IpldCid::read_bytes(&mut cursor).map_err(|e| CarError::Cid(Box::new(e)))?;
    Ok((cid, cursor.position() as usize))
}

/// Iterator over the `(cid, block)` sections of a CAR stream
///
/// The header is read up front by [`CarSections::new`].
#[derive(Debug)]
pub struct CarSections<R> {
    reader: R,
    header: CarHeader,
    done: bool,
}

impl<R: BufRead> CarSections<R> {
    /// Read the header and position at the first section
    pub fn new(mut reader: R) -> Result<Self> {
        let header = read_header(&mut reader)?;
        Ok(Self {
            reader,
            header,
            done: false,
        })
    }

    /// The parsed header
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Root CIDs from the header
    pub fn roots(&self) -> &[IpldCid] {
        &self.header.roots
    }

    fn next_section(&mut self) -> Result<Option<(IpldCid, Bytes)>> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(None);
        }

        let len: u64 = self
            .reader
            .read_varint()
            .map_err(truncated("section length"))?;

        let mut section = Vec::new();
        self.reader.by_ref().take(len).read_to_end(&mut section)?;
        if section.len() as u64 != len {
            return Err(CarError::Truncated("section").into());
        }

        let (cid, offset) = split_section(&section)?;
        Ok(Some((cid, Bytes::from(section).slice(offset..))))
    }
}

impl<R: BufRead> Iterator for CarSections<R> {
    type Item = Result<(IpldCid, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_section();
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
        }
        next.transpose()
    }
}

/// Parse CAR bytes into roots and block map
pub fn parse_car_bytes(data: &[u8]) -> Result<ParsedCar> {
    collect(CarSections::new(data)?)
}

/// Read entire CAR file into memory
///
/// For large files, [`CarBlockStore`](super::CarBlockStore) reads blocks on demand instead.
pub fn read_car(path: impl AsRef<Path>) -> Result<ParsedCar> {
    let file = File::open(path)?;
    collect(CarSections::new(BufReader::new(file))?)
}

fn collect<R: BufRead>(sections: CarSections<R>) -> Result<ParsedCar> {
    let roots = sections.roots().to_vec();
    let blocks = sections.collect::<Result<BTreeMap<_, _>>>()?;
    Ok(ParsedCar { roots, blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::writer::write_car_bytes;
    use crate::error::MstErrorKind;
    use crate::mst::util::compute_cid;

    fn block(data: &[u8]) -> (IpldCid, Bytes) {
        (compute_cid(data).unwrap(), Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_parse_written_car() {
        let a = block(b"\x01");
        let b = block(b"\x02");
        let bytes = write_car_bytes(&[a.0], [a.clone(), b.clone()]).unwrap();

        let parsed = parse_car_bytes(&bytes).unwrap();
        assert_eq!(parsed.roots, vec![a.0]);
        assert_eq!(parsed.blocks.len(), 2);
        assert_eq!(parsed.blocks[&b.0], b.1);
    }

    #[test]
    fn test_header_only() {
        let root = block(b"\x01").0;
        let bytes = write_car_bytes(&[root], []).unwrap();

        let sections = CarSections::new(&bytes[..]).unwrap();
        assert_eq!(sections.roots(), &[root]);
        assert_eq!(sections.count(), 0);
    }

    #[test]
    fn test_rejects_version_2() {
        let header = CarHeader {
            roots: vec![],
            version: 2,
        };
        let encoded = header.encode().unwrap();
        let mut bytes = vec![encoded.len() as u8];
        bytes.extend_from_slice(&encoded);

        let err = parse_car_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::Car);
    }

    #[test]
    fn test_truncated_section() {
        let a = block(b"\x01\x02\x03");
        let bytes = write_car_bytes(&[a.0], [a]).unwrap();

        let cut = &bytes[..bytes.len() - 2];
        let results: Vec<_> = CarSections::new(cut).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().kind(), MstErrorKind::Car);
    }

    #[test]
    fn test_truncated_header() {
        let err = parse_car_bytes(&[0x40, 0xa2]).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::Car);
    }
}
