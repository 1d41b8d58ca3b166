//! View over one hash-index page.
//!
//! A `Bucket` interprets `block_size` bytes as a page of record entries
//! sorted by key hash. It is generic over its storage so the same type
//! covers a page owned by the caller (`Vec<u8>`), a read-only view into
//! the cache (`&[u8]`) and a mutable one (`&mut [u8]`).
pub mod layout;

use std::io::{self, Read, Write};

use layout::{
    bucket_capacity, entry_offset, read_u16, read_u48, write_u16, write_u48, COUNT_SIZE,
    ENTRY_SIZE, HEADER_SIZE, U48_MAX,
};

use crate::error::{Error, Result};

/// One record locator: where a value lives in the data file and the
/// hash of its key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub offset: u64,
    pub size: u64,
    pub hash: u64,
}

impl Entry {
    fn decode(buf: &[u8]) -> Self {
        Entry {
            offset: read_u48(&buf[0..6]),
            size: read_u48(&buf[6..12]),
            hash: read_u48(&buf[12..18]),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        write_u48(&mut buf[0..6], self.offset);
        write_u48(&mut buf[6..12], self.size);
        write_u48(&mut buf[12..18], self.hash);
    }
}

pub struct Bucket<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Bucket<B> {
    /// View existing page bytes. The page size is the buffer length.
    ///
    /// # Panics
    /// If the buffer cannot hold the page header.
    pub fn new(buf: B) -> Self {
        let len = buf.as_ref().len();
        assert!(len >= HEADER_SIZE, "bucket block size {len} is smaller than its header");
        Bucket { buf }
    }

    /// View existing page bytes, checking the length against `block_size`.
    pub fn from_bytes(buf: B, block_size: usize) -> Result<Self> {
        let actual = buf.as_ref().len();
        if actual != block_size || actual < HEADER_SIZE {
            return Err(Error::BufferSize {
                expected: block_size.max(HEADER_SIZE),
                actual,
            });
        }
        Ok(Bucket { buf })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.buf.as_ref().len()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        read_u16(self.buf.as_ref()) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        bucket_capacity(self.block_size())
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Data-file offset of the overflow bucket, or 0 for none.
    pub fn spill(&self) -> u64 {
        read_u48(&self.buf.as_ref()[COUNT_SIZE..HEADER_SIZE])
    }

    pub fn entry(&self, i: usize) -> Entry {
        assert!(i < self.len(), "entry {i} out of range");
        let at = entry_offset(i);
        Entry::decode(&self.buf.as_ref()[at..at + ENTRY_SIZE])
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.len()).map(move |i| self.entry(i))
    }

    /// Index of the first entry whose hash is not less than `hash`.
    pub fn lower_bound(&self, hash: u64) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).hash < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Write the page as exactly `block_size` bytes: header, entries,
    /// then zeros.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let used = entry_offset(self.len()).min(self.block_size());
        w.write_all(&self.buf.as_ref()[..used])?;
        let pad = (self.block_size() - used) as u64;
        io::copy(&mut io::repeat(0).take(pad), w)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Bucket<B> {
    /// Reset to a page with no entries and no spill.
    pub fn make_empty(&mut self) {
        self.buf.as_mut().fill(0);
    }

    pub fn set_spill(&mut self, spill: u64) -> Result<()> {
        check_u48("spill", spill)?;
        write_u48(&mut self.buf.as_mut()[COUNT_SIZE..HEADER_SIZE], spill);
        Ok(())
    }

    /// Insert `entry`, keeping entries ordered by hash.
    pub fn insert(&mut self, entry: Entry) -> Result<()> {
        check_u48("offset", entry.offset)?;
        check_u48("size", entry.size)?;
        check_u48("hash", entry.hash)?;
        if self.is_full() {
            return Err(Error::BucketFull {
                capacity: self.capacity(),
            });
        }
        let n = self.len();
        let i = self.lower_bound(entry.hash);
        let buf = self.buf.as_mut();
        buf.copy_within(entry_offset(i)..entry_offset(n), entry_offset(i + 1));
        entry.encode(&mut buf[entry_offset(i)..entry_offset(i + 1)]);
        write_u16(buf, (n + 1) as u16);
        Ok(())
    }

    /// Remove entry `i`, shifting later entries down.
    pub fn erase(&mut self, i: usize) {
        let n = self.len();
        assert!(i < n, "entry {i} out of range");
        let buf = self.buf.as_mut();
        buf.copy_within(entry_offset(i + 1)..entry_offset(n), entry_offset(i));
        buf[entry_offset(n - 1)..entry_offset(n)].fill(0);
        write_u16(buf, (n - 1) as u16);
    }
}

fn check_u48(field: &'static str, value: u64) -> Result<()> {
    if value > U48_MAX {
        return Err(Error::FieldOverflow { field, value });
    }
    Ok(())
}

impl Bucket<Vec<u8>> {
    /// An owned, empty page.
    pub fn empty(block_size: usize) -> Self {
        Bucket::new(vec![0u8; block_size])
    }
}

impl<B: AsRef<[u8]>> std::fmt::Debug for Bucket<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("block_size", &self.block_size())
            .field("spill", &self.spill())
            .field("entries", &self.entries().collect::<Vec<_>>())
            .finish()
    }
}
