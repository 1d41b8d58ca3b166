use std::fmt;

use ahash::RandomState;
use hashbrown::hash_map;
use hashbrown::HashMap;

use crate::arena::{Arena, ArenaConfig, ArenaInfo, Direction, Span};
use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::lock::LockHandle;

/// Which hash bucket a page belongs to.
pub type BucketIndex = u64;

type MapType = HashMap<BucketIndex, Span, RandomState>;

/// Snapshot of a cache's size, geometry and arena statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheInfo {
    pub len: usize,
    pub key_size: usize,
    pub block_size: usize,
    pub arena: ArenaInfo,
}

/// Bucket pages buffered for one write batch, keyed by bucket index.
///
/// Every page lives in the cache's own arena. Views handed out borrow the
/// cache, so none can outlive the next `clear`.
///
/// Creating or inserting an index that is already cached keeps the first
/// page and returns a view of it; `try_create` and `try_insert` report
/// the collision instead.
pub struct Cache {
    key_size: usize,
    block_size: usize,
    arena: Arena,
    map: MapType,
}

impl Cache {
    pub fn new(key_size: usize, block_size: usize) -> Self {
        Self::with_config(key_size, block_size, ArenaConfig::default())
    }

    pub fn with_config(key_size: usize, block_size: usize, config: ArenaConfig) -> Self {
        Cache {
            key_size,
            block_size,
            arena: Arena::with_config(config),
            map: MapType::default(),
        }
    }

    #[inline]
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn contains(&self, index: BucketIndex) -> bool {
        self.map.contains_key(&index)
    }

    pub fn find(&self, index: BucketIndex) -> Option<Bucket<&[u8]>> {
        let span = *self.map.get(&index)?;
        Some(Bucket::new(self.arena.slice(span)))
    }

    pub fn find_mut(&mut self, index: BucketIndex) -> Option<Bucket<&mut [u8]>> {
        let span = *self.map.get(&index)?;
        Some(Bucket::new(self.arena.slice_mut(span)))
    }

    /// Create an empty bucket.
    pub fn create(&mut self, index: BucketIndex) -> Bucket<&mut [u8]> {
        if let Some(&span) = self.map.get(&index) {
            tracing::warn!(index, "create of already cached bucket, keeping first");
            return Bucket::new(self.arena.slice_mut(span));
        }
        let span = self.arena.alloc(self.block_size);
        self.map.insert(index, span);
        let mut bucket = Bucket::new(self.arena.slice_mut(span));
        bucket.make_empty();
        bucket
    }

    pub fn try_create(&mut self, index: BucketIndex) -> Result<Bucket<&mut [u8]>> {
        if self.contains(index) {
            return Err(Error::DuplicateIndex(index));
        }
        Ok(self.create(index))
    }

    /// Insert a copy of a bucket.
    pub fn insert<B: AsRef<[u8]>>(
        &mut self,
        index: BucketIndex,
        bucket: &Bucket<B>,
    ) -> Result<Bucket<&mut [u8]>> {
        if bucket.block_size() != self.block_size {
            return Err(Error::BlockSizeMismatch {
                expected: self.block_size,
                actual: bucket.block_size(),
            });
        }
        if let Some(&span) = self.map.get(&index) {
            tracing::warn!(index, "insert of already cached bucket, keeping first");
            return Ok(Bucket::new(self.arena.slice_mut(span)));
        }
        let span = self.arena.alloc(bucket.block_size());
        let mut dst = self.arena.slice_mut(span);
        bucket.write(&mut dst)?;
        self.map.insert(index, span);
        Ok(Bucket::new(self.arena.slice_mut(span)))
    }

    pub fn try_insert<B: AsRef<[u8]>>(
        &mut self,
        index: BucketIndex,
        bucket: &Bucket<B>,
    ) -> Result<Bucket<&mut [u8]>> {
        if self.contains(index) {
            return Err(Error::DuplicateIndex(index));
        }
        self.insert(index, bucket)
    }

    /// All cached `(index, bucket)` pairs, in unspecified order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            arena: &self.arena,
            inner: self.map.iter(),
        }
    }

    /// Drop every entry and recycle the arena's blocks for the next batch.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.map.clear();
    }

    pub fn shrink_to_fit(&mut self) {
        self.arena.shrink_to_fit();
    }

    /// Exchange contents with `other`. Each cache's arena keeps its own
    /// block-size policy and free list; only the working sets move.
    pub fn swap(&mut self, other: &mut Cache) {
        std::mem::swap(&mut self.key_size, &mut other.key_size);
        std::mem::swap(&mut self.block_size, &mut other.block_size);
        std::mem::swap(&mut self.map, &mut other.map);
        self.arena.swap_working_set(&mut other.arena);
    }

    /// Read-only access; mutation goes through the cache so cached spans
    /// stay valid.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// See `Arena::adjustment_due`.
    pub fn adjustment_due(&self) -> bool {
        self.arena.adjustment_due()
    }

    /// See `Arena::periodic_activity`. Never invalidates cached buckets.
    pub fn periodic_activity<L: LockHandle + ?Sized>(
        &mut self,
        lock: &mut L,
    ) -> Option<Direction> {
        self.arena.periodic_activity(lock)
    }

    /// See `Arena::retune`.
    pub fn retune(&mut self) -> Direction {
        self.arena.retune()
    }

    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            len: self.map.len(),
            key_size: self.key_size,
            block_size: self.block_size,
            arena: self.arena.info(),
        }
    }
}

/// A cache that never holds inserts.
impl Default for Cache {
    fn default() -> Self {
        Cache::new(0, 0)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("key_size", &self.key_size)
            .field("block_size", &self.block_size)
            .field("len", &self.map.len())
            .field("arena", &self.arena)
            .finish()
    }
}

pub struct Iter<'a> {
    arena: &'a Arena,
    inner: hash_map::Iter<'a, BucketIndex, Span>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (BucketIndex, Bucket<&'a [u8]>);

    fn next(&mut self) -> Option<Self::Item> {
        let (&index, &span) = self.inner.next()?;
        let arena: &'a Arena = self.arena;
        Some((index, Bucket::new(arena.slice(span))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Cache {
    type Item = (BucketIndex, Bucket<&'a [u8]>);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
