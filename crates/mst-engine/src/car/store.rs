//! Read-only block storage over a CAR archive

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use cid::Cid as IpldCid;
use integer_encoding::VarIntReader;

use super::reader::{read_header, truncated};
use crate::error::{CarError, MstError, Result};
use crate::mst::util::compute_cid_with_codec;
use crate::storage::BlockStore;
use crate::SHA2_256;

/// Configuration for a [`CarBlockStore`]
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct CarStoreOptions {
    /// Re-hash blocks on every `get` and reject mismatches
    #[builder(default = true)]
    pub validate_hashes: bool,
}

impl Default for CarStoreOptions {
    fn default() -> Self {
        Self {
            validate_hashes: true,
        }
    }
}

/// Block store serving blocks directly out of a CARv1 archive
///
/// Construction scans the archive once, recording where each block lives.
/// Block bytes are read on demand. Writes fail with
/// [`ReadOnly`](crate::MstErrorKind::ReadOnly).
///
/// If a CID occurs in more than one section, the first occurrence wins.
pub struct CarBlockStore<R> {
    reader: Mutex<R>,
    roots: Vec<IpldCid>,
    offsets: BTreeMap<IpldCid, (u64, u64)>,
    options: CarStoreOptions,
}

impl CarBlockStore<BufReader<File>> {
    /// Open a CAR file on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> CarBlockStore<R> {
    /// Index a CAR stream with default options
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, CarStoreOptions::default())
    }

    /// Index a CAR stream
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub fn with_options(mut reader: R, options: CarStoreOptions) -> Result<Self> {
        let total = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = read_header(&mut reader)?;
        let mut offsets = BTreeMap::new();
        let mut pos = reader.stream_position()?;

        while pos < total {
            let len: u64 = reader
                .read_varint()
                .map_err(truncated("section length"))?;
            let section_start = reader.stream_position()?;
            let section_end = section_start
                .checked_add(len)
                .filter(|end| *end <= total)
                .ok_or(CarError::Truncated("section"))?;

            let cid = IpldCid::read_bytes(&mut reader).map_err(|e| CarError::Cid(Box::new(e)))?;
            let data_start = reader.stream_position()?;
            if data_start > section_end {
                return Err(CarError::ShortSection { len }.into());
            }

            offsets
                .entry(cid)
                .or_insert((data_start, section_end - data_start));
            pos = reader.seek(SeekFrom::Start(section_end))?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(blocks = offsets.len(), roots = header.roots.len(), "indexed CAR archive");

        Ok(Self {
            reader: Mutex::new(reader),
            roots: header.roots,
            offsets,
            options,
        })
    }

    /// Root CIDs from the header
    pub fn roots(&self) -> &[IpldCid] {
        &self.roots
    }

    /// Number of distinct blocks in the archive
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True if the archive holds no blocks
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn reader(&self) -> MutexGuard<'_, R> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(cid: &IpldCid, data: &[u8]) -> Result<()> {
        let code = cid.hash().code();
        if code != SHA2_256 {
            return Err(CarError::UnsupportedHash(code).into());
        }
        let actual = compute_cid_with_codec(cid.codec(), data)?;
        if actual != *cid {
            return Err(MstError::hash_mismatch(cid, actual));
        }
        Ok(())
    }
}

impl<R: Read + Seek> BlockStore for CarBlockStore<R> {
    fn get(&self, cid: &IpldCid) -> Result<Bytes> {
        let (offset, len) = *self
            .offsets
            .get(cid)
            .ok_or_else(|| MstError::not_found("block", cid))?;

        let mut buf = vec![0u8; len as usize];
        {
            let mut reader = self.reader();
            reader.seek(SeekFrom::Start(offset))?;
            reader.read_exact(&mut buf).map_err(truncated("block"))?;
        }

        if self.options.validate_hashes {
            Self::validate(cid, &buf)?;
        }
        Ok(Bytes::from(buf))
    }

    fn put(&self, _data: &[u8]) -> Result<IpldCid> {
        Err(MstError::read_only("CAR block store"))
    }

    fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.offsets.contains_key(cid))
    }

    fn put_many(&self, _blocks: impl IntoIterator<Item = (IpldCid, Bytes)>) -> Result<()> {
        Err(MstError::read_only("CAR block store"))
    }
}

impl<R> fmt::Debug for CarBlockStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarBlockStore")
            .field("roots", &self.roots)
            .field("blocks", &self.offsets.len())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::writer::write_car_bytes;
    use crate::error::MstErrorKind;
    use crate::mst::util::compute_cid;
    use std::io::{Cursor, Write};

    fn block(data: &[u8]) -> (IpldCid, Bytes) {
        (compute_cid(data).unwrap(), Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_serves_blocks_from_archive() {
        let a = block(b"\x01\x02");
        let b = block(b"\x03");
        let bytes = write_car_bytes(&[a.0], [a.clone(), b.clone()]).unwrap();

        let store = CarBlockStore::new(Cursor::new(bytes)).unwrap();
        assert_eq!(store.roots(), &[a.0]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&a.0).unwrap(), a.1);
        assert_eq!(store.get(&b.0).unwrap(), b.1);
        assert!(store.has(&b.0).unwrap());

        let missing = block(b"\x04").0;
        assert!(!store.has(&missing).unwrap());
        assert_eq!(store.get(&missing).unwrap_err().kind(), MstErrorKind::NotFound);
    }

    #[test]
    fn test_writes_are_rejected() {
        let bytes = write_car_bytes(&[], []).unwrap();
        let store = CarBlockStore::new(Cursor::new(bytes)).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.put(b"x").unwrap_err().kind(), MstErrorKind::ReadOnly);
        assert_eq!(
            store.put_many([block(b"x")]).unwrap_err().kind(),
            MstErrorKind::ReadOnly
        );
    }

    #[test]
    fn test_detects_tampered_block() {
        let a = block(b"original");
        let mut bytes = write_car_bytes(&[a.0], [a.clone()]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let store = CarBlockStore::new(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(store.get(&a.0).unwrap_err().kind(), MstErrorKind::HashMismatch);

        let options = CarStoreOptions::new().validate_hashes(false).build();
        let unchecked = CarBlockStore::with_options(Cursor::new(bytes), options).unwrap();
        assert_eq!(unchecked.get(&a.0).unwrap().len(), a.1.len());
    }

    #[test]
    fn test_rejects_truncated_archive() {
        let a = block(b"some block data");
        let bytes = write_car_bytes(&[a.0], [a]).unwrap();
        let cut = bytes[..bytes.len() - 3].to_vec();

        let err = CarBlockStore::new(Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::Car);
    }

    #[test]
    fn test_rejects_oversized_section_length() {
        let mut bytes = write_car_bytes(&[], []).unwrap();
        // varint encoding of u64::MAX
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);

        let err = CarBlockStore::new(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), MstErrorKind::Car);
    }

    #[test]
    fn test_open_file() {
        let a = block(b"\x01");
        let bytes = write_car_bytes(&[a.0], [a.clone()]).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let store = CarBlockStore::open(file.path()).unwrap();
        assert_eq!(store.get(&a.0).unwrap(), a.1);
    }
}
