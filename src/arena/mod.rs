//! Self-tuning block allocator.
//!
//! Allocations are bump-pointer within the current block. When a block
//! runs out, the arena takes one from its free list or asks the system
//! for a new one sized to the current `alloc_size` hint. `clear` moves
//! every used block whose capacity still matches the hint to the free
//! list, so the next burst of allocations needs no system calls.
//!
//! `periodic_activity` measures the allocation rate and moves the hint
//! toward it with a 2x hysteresis band: it grows when the rate reaches
//! twice the hint and halves when the rate falls to half of it. Any
//! resize drops the free list, since those blocks have the old size.
//!
//! Allocations come back as `Span` handles rather than pointers. A span
//! is tied to the arena's current working set and stops resolving once
//! that set is cleared.
mod block;
mod events;

pub use events::{ArenaEvent, ArenaObserver, Direction, NoopObserver, TracingObserver};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use block::Block;

use crate::clock::{Clock, MonotonicClock};
use crate::lock::LockHandle;

/// Allocations are rounded up to this many bytes.
pub const ALIGN: usize = 8;

/// Default debounce interval for `periodic_activity`.
pub const DEFAULT_ADJUST_INTERVAL: Duration = Duration::from_secs(1);

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

fn next_set_id() -> u64 {
    NEXT_SET_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to bytes allocated from an `Arena`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    set: u64,
    block: usize,
    offset: usize,
    len: usize,
}

impl Span {
    /// Requested length in bytes (before alignment rounding).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: the arena refuses zero-length requests.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Construction parameters for an `Arena`.
pub struct ArenaConfig {
    /// Initial block-size hint. Zero makes the first block fit the first
    /// request exactly.
    pub alloc_size: usize,
    pub adjust_interval: Duration,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn ArenaObserver>,
}

impl ArenaConfig {
    pub fn with_alloc_size(mut self, alloc_size: usize) -> Self {
        self.alloc_size = alloc_size;
        self
    }

    pub fn with_adjust_interval(mut self, interval: Duration) -> Self {
        self.adjust_interval = interval;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_observer(mut self, observer: impl ArenaObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            alloc_size: 0,
            adjust_interval: DEFAULT_ADJUST_INTERVAL,
            clock: Arc::new(MonotonicClock),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl fmt::Debug for ArenaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaConfig")
            .field("alloc_size", &self.alloc_size)
            .field("adjust_interval", &self.adjust_interval)
            .finish_non_exhaustive()
    }
}

/// Snapshot of an arena's sizing policy and block counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaInfo {
    pub alloc_size: usize,
    pub nalloc: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    /// Blocks obtained from the system allocator over the arena's lifetime.
    pub blocks_created: u64,
    /// Blocks returned to the system allocator over the arena's lifetime.
    pub blocks_destroyed: u64,
    /// Capacity held across the used and free lists.
    pub reserved_bytes: usize,
}

/// Block allocator that recycles blocks across `clear` and retunes its
/// block size to the observed allocation rate.
pub struct Arena {
    alloc_size: usize,
    nalloc: usize,
    // Heads of both lists are at the end.
    used: Vec<Block>,
    free: Vec<Block>,
    when: Instant,
    set_id: u64,
    adjust_interval: Duration,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn ArenaObserver>,
    blocks_created: u64,
    blocks_destroyed: u64,
}

impl Arena {
    pub fn new() -> Self {
        Self::with_config(ArenaConfig::default())
    }

    pub fn with_config(config: ArenaConfig) -> Self {
        Self {
            alloc_size: config.alloc_size,
            nalloc: 0,
            used: Vec::new(),
            free: Vec::new(),
            when: config.clock.now(),
            set_id: next_set_id(),
            adjust_interval: config.adjust_interval,
            clock: config.clock,
            observer: config.observer,
            blocks_created: 0,
            blocks_destroyed: 0,
        }
    }

    /// Allocate `n` bytes, rounded up to a multiple of `ALIGN`.
    ///
    /// # Panics
    /// If `n` is zero.
    pub fn alloc(&mut self, n: usize) -> Span {
        assert!(n != 0, "zero-length arena allocation");
        let rounded = n.next_multiple_of(ALIGN);

        if let Some(head) = self.used.last_mut() {
            if let Some(offset) = head.try_alloc(rounded) {
                self.nalloc += rounded;
                return self.span(self.used.len() - 1, offset, n);
            }
        }

        let recycled = if self.free.last().is_some_and(|b| b.remain() >= rounded) {
            self.free.pop()
        } else {
            None
        };
        let mut block = match recycled {
            Some(b) => b,
            None => self.create_block(self.alloc_size.max(rounded)),
        };
        let offset = block.bump(rounded);
        self.used.push(block);
        self.nalloc += rounded;
        self.span(self.used.len() - 1, offset, n)
    }

    /// Allocate `n` bytes and return them directly.
    pub fn alloc_bytes(&mut self, n: usize) -> &mut [u8] {
        let span = self.alloc(n);
        self.slice_mut(span)
    }

    /// Resolve a span from the current working set.
    pub fn get(&self, span: Span) -> Option<&[u8]> {
        if span.set != self.set_id {
            return None;
        }
        let block = self.used.get(span.block)?;
        Some(block.bytes(span.offset, span.len))
    }

    pub fn get_mut(&mut self, span: Span) -> Option<&mut [u8]> {
        if span.set != self.set_id {
            return None;
        }
        let block = self.used.get_mut(span.block)?;
        Some(block.bytes_mut(span.offset, span.len))
    }

    /// Make every used block reusable.
    ///
    /// Blocks whose capacity no longer matches `alloc_size` are released
    /// instead. All outstanding spans stop resolving.
    pub fn clear(&mut self) {
        let alloc_size = self.alloc_size;
        for mut block in self.used.drain(..).rev() {
            block.clear();
            if block.capacity() == alloc_size {
                self.free.push(block);
            } else {
                self.blocks_destroyed += 1;
            }
        }
        self.set_id = next_set_id();
    }

    /// Release every block on the free list.
    pub fn shrink_to_fit(&mut self) {
        let released = self.release_free();
        self.observer.on_event(&ArenaEvent::ShrunkToFit {
            alloc_size: self.alloc_size,
            nalloc: self.nalloc,
            used_blocks: self.used.len(),
            released,
        });
    }

    /// Cheap check, no lock needed: has the adjust interval elapsed?
    pub fn adjustment_due(&self) -> bool {
        self.clock.now().saturating_duration_since(self.when) >= self.adjust_interval
    }

    /// Called every so often.
    ///
    /// Returns immediately unless the adjust interval has elapsed since
    /// the last retune. Otherwise takes `lock` if the caller does not
    /// already hold it, then retunes.
    pub fn periodic_activity<L: LockHandle + ?Sized>(
        &mut self,
        lock: &mut L,
    ) -> Option<Direction> {
        if !self.adjustment_due() {
            return None;
        }
        if !lock.owns_lock() {
            lock.lock();
        }
        Some(self.retune())
    }

    /// Move `alloc_size` toward the allocation rate observed since the
    /// last retune, and start a new measurement window.
    pub fn retune(&mut self) -> Direction {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.when);
        self.when = now;

        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            (self.nalloc as f64 / secs).ceil() as usize
        } else {
            self.nalloc
        };

        let direction = if rate >= self.alloc_size.saturating_mul(2) {
            self.alloc_size = rate.max(self.alloc_size.saturating_mul(2));
            self.release_free();
            Direction::Up
        } else if rate <= self.alloc_size / 2 {
            self.alloc_size /= 2;
            self.release_free();
            Direction::Down
        } else {
            Direction::Hold
        };

        self.observer.on_event(&ArenaEvent::Retuned {
            rate,
            alloc_size: self.alloc_size,
            direction,
            nalloc: self.nalloc,
            used_blocks: self.used.len(),
            free_blocks: self.free.len(),
        });
        self.nalloc = 0;
        direction
    }

    /// Exchange the working state (`nalloc` and the used list) with
    /// `other`. Each arena keeps its own `alloc_size`, free list and
    /// retune timestamp. Spans follow the blocks they point into.
    pub fn swap_working_set(&mut self, other: &mut Arena) {
        std::mem::swap(&mut self.nalloc, &mut other.nalloc);
        std::mem::swap(&mut self.used, &mut other.used);
        std::mem::swap(&mut self.set_id, &mut other.set_id);
    }

    #[inline]
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    pub fn info(&self) -> ArenaInfo {
        let reserved_bytes = self
            .used
            .iter()
            .chain(self.free.iter())
            .map(Block::capacity)
            .sum();
        ArenaInfo {
            alloc_size: self.alloc_size,
            nalloc: self.nalloc,
            used_blocks: self.used.len(),
            free_blocks: self.free.len(),
            blocks_created: self.blocks_created,
            blocks_destroyed: self.blocks_destroyed,
            reserved_bytes,
        }
    }

    /// Resolve a span known to belong to the current working set.
    ///
    /// # Panics
    /// If `span` was issued to a different working set.
    #[inline]
    pub(crate) fn slice(&self, span: Span) -> &[u8] {
        assert_eq!(span.set, self.set_id, "span from another working set");
        self.used[span.block].bytes(span.offset, span.len)
    }

    #[inline]
    pub(crate) fn slice_mut(&mut self, span: Span) -> &mut [u8] {
        assert_eq!(span.set, self.set_id, "span from another working set");
        self.used[span.block].bytes_mut(span.offset, span.len)
    }

    fn span(&self, block: usize, offset: usize, len: usize) -> Span {
        Span {
            set: self.set_id,
            block,
            offset,
            len,
        }
    }

    fn create_block(&mut self, capacity: usize) -> Block {
        self.blocks_created += 1;
        self.observer.on_event(&ArenaEvent::BlockCreated { capacity });
        Block::new(capacity)
    }

    fn release_free(&mut self) -> usize {
        let released = self.free.len();
        self.free.clear();
        self.blocks_destroyed += released as u64;
        released
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("info", &self.info()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lock::UniqueLock;
    use parking_lot::Mutex;

    fn quiet() -> ArenaConfig {
        ArenaConfig::default().with_observer(NoopObserver)
    }

    fn manual(alloc_size: usize) -> (Arena, ManualClock) {
        let clock = ManualClock::new();
        let arena = Arena::with_config(
            quiet()
                .with_alloc_size(alloc_size)
                .with_clock(clock.clone()),
        );
        (arena, clock)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ArenaEvent>>);

    impl ArenaObserver for Arc<Recorder> {
        fn on_event(&self, event: &ArenaEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    #[should_panic(expected = "zero-length")]
    fn zero_length_alloc_panics() {
        let mut arena = Arena::with_config(quiet());
        arena.alloc(0);
    }

    #[test]
    fn first_block_fits_first_request() {
        let mut arena = Arena::with_config(quiet());
        let span = arena.alloc(100);
        assert_eq!(span.len(), 100);
        let info = arena.info();
        assert_eq!(info.used_blocks, 1);
        assert_eq!(info.reserved_bytes, 104);
        assert_eq!(info.nalloc, 104);
    }

    #[test]
    fn bumps_within_block() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(1024));
        let a = arena.alloc(10);
        let b = arena.alloc(10);
        assert_eq!(arena.info().used_blocks, 1);
        assert_eq!(b.offset, a.offset + 16);
    }

    #[test]
    fn oversized_request_gets_its_own_block() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(64));
        arena.alloc(8);
        let big = arena.alloc(200);
        let info = arena.info();
        assert_eq!(info.used_blocks, 2);
        assert_eq!(info.reserved_bytes, 64 + 200);
        assert_eq!(arena.get(big).unwrap().len(), 200);
    }

    #[test]
    fn writes_are_isolated() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(64));
        let a = arena.alloc(16);
        let b = arena.alloc(16);
        arena.get_mut(a).unwrap().fill(0xAA);
        arena.get_mut(b).unwrap().fill(0x55);
        assert!(arena.get(a).unwrap().iter().all(|&x| x == 0xAA));
        assert!(arena.get(b).unwrap().iter().all(|&x| x == 0x55));
    }

    #[test]
    fn clear_recycles_matching_blocks() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(256));
        for _ in 0..10 {
            arena.alloc(100);
        }
        let first = arena.info();
        assert_eq!(first.blocks_created, 5);

        arena.clear();
        assert_eq!(arena.info().free_blocks, 5);
        assert_eq!(arena.info().used_blocks, 0);

        for _ in 0..10 {
            arena.alloc(100);
        }
        assert_eq!(arena.info().blocks_created, first.blocks_created);
        assert_eq!(arena.info().free_blocks, 0);
    }

    #[test]
    fn clear_drops_stale_sized_blocks() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(64));
        arena.alloc(8);
        arena.alloc(500);
        arena.clear();
        let info = arena.info();
        assert_eq!(info.free_blocks, 1);
        assert_eq!(info.blocks_destroyed, 1);
    }

    #[test]
    fn spans_do_not_survive_clear() {
        let mut arena = Arena::with_config(quiet());
        let span = arena.alloc(32);
        assert!(arena.get(span).is_some());
        arena.clear();
        assert!(arena.get(span).is_none());
        assert!(arena.get_mut(span).is_none());
    }

    #[test]
    #[should_panic(expected = "another working set")]
    fn slice_refuses_cleared_span() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(64));
        let stale = arena.alloc(16);
        arena.clear();
        arena.alloc(16);
        arena.slice(stale);
    }

    #[test]
    #[should_panic(expected = "another working set")]
    fn slice_mut_refuses_swapped_out_span() {
        let mut a = Arena::with_config(quiet());
        let mut b = Arena::with_config(quiet());
        let span = a.alloc(8);
        b.alloc(8);
        a.swap_working_set(&mut b);
        a.slice_mut(span);
    }

    #[test]
    fn shrink_to_fit_releases_free_list() {
        let recorder = Arc::new(Recorder::default());
        let mut arena = Arena::with_config(
            ArenaConfig::default()
                .with_alloc_size(64)
                .with_observer(recorder.clone()),
        );
        arena.alloc(64);
        arena.alloc(64);
        arena.clear();
        arena.shrink_to_fit();

        let info = arena.info();
        assert_eq!(info.free_blocks, 0);
        assert_eq!(info.reserved_bytes, 0);
        assert_eq!(info.blocks_destroyed, 2);

        let events = recorder.0.lock();
        assert_eq!(
            events.last(),
            Some(&ArenaEvent::ShrunkToFit {
                alloc_size: 64,
                nalloc: 128,
                used_blocks: 0,
                released: 2,
            })
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ArenaEvent::BlockCreated { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn periodic_activity_is_debounced() {
        let (mut arena, clock) = manual(0);
        let m = Mutex::new(());
        let mut lock = UniqueLock::deferred(&m);

        arena.alloc(64);
        clock.advance(Duration::from_millis(500));
        assert_eq!(arena.periodic_activity(&mut lock), None);
        assert!(!lock.owns_lock());
        assert_eq!(arena.alloc_size(), 0);

        clock.advance(Duration::from_millis(500));
        assert_eq!(arena.periodic_activity(&mut lock), Some(Direction::Up));
        assert!(lock.owns_lock());
        assert_eq!(arena.alloc_size(), 64);
        assert_eq!(arena.info().nalloc, 0);
    }

    #[test]
    fn alloc_bytes_returns_requested_length() {
        let mut arena = Arena::with_config(quiet());
        let bytes = arena.alloc_bytes(13);
        assert_eq!(bytes.len(), 13);
        bytes.copy_from_slice(b"thirteen byte");
        assert_eq!(arena.info().nalloc, 16);
    }

    #[test]
    fn custom_adjust_interval() {
        let clock = ManualClock::new();
        let mut arena = Arena::with_config(
            quiet()
                .with_clock(clock.clone())
                .with_adjust_interval(Duration::from_secs(10)),
        );
        clock.advance(Duration::from_secs(9));
        assert!(!arena.adjustment_due());
        clock.advance(Duration::from_secs(1));
        assert!(arena.adjustment_due());
        arena.retune();
        assert!(!arena.adjustment_due());
    }

    #[test]
    fn periodic_activity_keeps_held_lock() {
        let (mut arena, clock) = manual(0);
        let m = Mutex::new(());
        let mut lock = UniqueLock::new(&m);
        clock.advance(Duration::from_secs(1));
        arena.periodic_activity(&mut lock);
        assert!(lock.owns_lock());
    }

    #[test]
    fn retune_grows_and_drops_free_list() {
        let (mut arena, clock) = manual(64);
        arena.alloc(64);
        arena.alloc(64);
        arena.clear();
        arena.alloc(512);
        assert_eq!(arena.info().free_blocks, 2);

        clock.advance(Duration::from_secs(2));
        // 640 bytes over 2s
        assert_eq!(arena.retune(), Direction::Up);
        assert_eq!(arena.alloc_size(), 320);
        assert_eq!(arena.info().free_blocks, 0);
    }

    #[test]
    fn retune_halves_when_idle() {
        let (mut arena, clock) = manual(4096);
        arena.alloc(8);
        arena.clear();
        clock.advance(Duration::from_secs(1));
        assert_eq!(arena.retune(), Direction::Down);
        assert_eq!(arena.alloc_size(), 2048);
        assert_eq!(arena.info().free_blocks, 0);
    }

    #[test]
    fn retune_holds_inside_band() {
        let (mut arena, clock) = manual(1024);
        arena.alloc(1024);
        arena.alloc(512);
        arena.clear();
        clock.advance(Duration::from_secs(1));
        assert_eq!(arena.retune(), Direction::Hold);
        assert_eq!(arena.alloc_size(), 1024);
        // matching free blocks survive a hold
        assert_eq!(arena.info().free_blocks, 2);
    }

    fn drive(arena: &mut Arena, clock: &ManualClock, rate: usize, cycles: usize) -> Vec<usize> {
        let m = Mutex::new(());
        let mut sizes = Vec::new();
        for _ in 0..cycles {
            let mut lock = UniqueLock::deferred(&m);
            for _ in 0..rate / 512 {
                arena.alloc(512);
            }
            clock.advance(Duration::from_secs(1));
            arena.periodic_activity(&mut lock);
            arena.clear();
            sizes.push(arena.alloc_size());
        }
        sizes
    }

    #[test]
    fn converges_from_below() {
        let rate = 64 * 1024;
        let (mut arena, clock) = manual(0);
        let sizes = drive(&mut arena, &clock, rate, 20);
        let settled = *sizes.last().unwrap();
        assert!(settled >= rate / 2 && settled <= rate * 2);
        assert!(sizes[10..].iter().all(|&s| s == settled));
    }

    #[test]
    fn converges_from_above() {
        let rate = 64 * 1024;
        let (mut arena, clock) = manual(rate * 16);
        let sizes = drive(&mut arena, &clock, rate, 20);
        let settled = *sizes.last().unwrap();
        assert!(settled >= rate / 2 && settled <= rate * 2);
        assert!(sizes[10..].iter().all(|&s| s == settled));
    }

    #[test]
    fn steady_rate_stops_creating_blocks() {
        let rate = 32 * 1024;
        let (mut arena, clock) = manual(0);
        drive(&mut arena, &clock, rate, 5);
        let created = arena.info().blocks_created;
        drive(&mut arena, &clock, rate, 5);
        assert_eq!(arena.info().blocks_created, created);
    }

    #[test]
    fn swap_working_set_keeps_policy() {
        let mut hot = Arena::with_config(quiet().with_alloc_size(128));
        let mut cold = Arena::with_config(quiet().with_alloc_size(4096));
        cold.alloc(8);
        cold.clear();

        let span = hot.alloc(40);
        hot.get_mut(span).unwrap().fill(7);

        hot.swap_working_set(&mut cold);
        assert_eq!(hot.alloc_size(), 128);
        assert_eq!(cold.alloc_size(), 4096);
        assert_eq!(hot.info().used_blocks, 0);
        assert_eq!(hot.info().nalloc, 8);
        assert_eq!(cold.info().used_blocks, 1);
        assert_eq!(cold.info().free_blocks, 1);
        assert_eq!(cold.info().nalloc, 48);

        assert!(hot.get(span).is_none());
        assert_eq!(cold.get(span).unwrap(), &[7u8; 40][..]);
    }

    #[test]
    fn take_leaves_fresh_arena() {
        let mut arena = Arena::with_config(quiet().with_alloc_size(64));
        let span = arena.alloc(8);
        let moved = std::mem::take(&mut arena);
        assert!(moved.get(span).is_some());
        assert_eq!(arena.info().used_blocks, 0);
        assert_eq!(arena.alloc_size(), 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn allocations_are_aligned_and_disjoint(
                hint in 0usize..512,
                sizes in proptest::collection::vec(1usize..300, 1..64),
            ) {
                let mut arena = Arena::with_config(quiet().with_alloc_size(hint));
                let spans: Vec<Span> = sizes.iter().map(|&n| arena.alloc(n)).collect();

                let mut ranges = Vec::new();
                for (span, &n) in spans.iter().zip(&sizes) {
                    let bytes = arena.get(*span).unwrap();
                    prop_assert_eq!(bytes.len(), n);
                    prop_assert_eq!(bytes.as_ptr() as usize % ALIGN, 0);
                    let start = bytes.as_ptr() as usize;
                    ranges.push((start, start + n.next_multiple_of(ALIGN)));
                }
                ranges.sort();
                for pair in ranges.windows(2) {
                    prop_assert!(pair[0].1 <= pair[1].0);
                }
            }

            #[test]
            fn replay_after_clear_reuses_blocks(
                sizes in proptest::collection::vec(1usize..256, 1..64),
            ) {
                let mut arena = Arena::with_config(quiet().with_alloc_size(256));
                for &n in &sizes {
                    arena.alloc(n);
                }
                let created = arena.info().blocks_created;
                arena.clear();
                for &n in &sizes {
                    arena.alloc(n);
                }
                prop_assert!(arena.info().blocks_created <= created);
            }
        }
    }
}
