//! Observability hook for arena housekeeping.
//!
//! The arena reports block creation, retuning and shrinking through an
//! `ArenaObserver` injected via `ArenaConfig`. The default forwards to
//! `tracing`; `NoopObserver` discards everything.

/// Which way a retune moved the block size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Hold,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaEvent {
    BlockCreated {
        capacity: usize,
    },
    Retuned {
        /// Bytes allocated per second since the previous retune.
        rate: usize,
        alloc_size: usize,
        direction: Direction,
        nalloc: usize,
        used_blocks: usize,
        free_blocks: usize,
    },
    ShrunkToFit {
        alloc_size: usize,
        nalloc: usize,
        used_blocks: usize,
        released: usize,
    },
}

pub trait ArenaObserver: Send + Sync {
    fn on_event(&self, event: &ArenaEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ArenaObserver for TracingObserver {
    fn on_event(&self, event: &ArenaEvent) {
        match *event {
            ArenaEvent::BlockCreated { capacity } => {
                tracing::trace!(capacity, "arena block created");
            }
            ArenaEvent::Retuned {
                rate,
                alloc_size,
                direction,
                nalloc,
                used_blocks,
                free_blocks,
            } => {
                tracing::debug!(
                    rate,
                    alloc_size,
                    ?direction,
                    nalloc,
                    used_blocks,
                    free_blocks,
                    "arena retuned"
                );
            }
            ArenaEvent::ShrunkToFit {
                alloc_size,
                nalloc,
                used_blocks,
                released,
            } => {
                tracing::debug!(alloc_size, nalloc, used_blocks, released, "arena shrink_to_fit");
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ArenaObserver for NoopObserver {
    #[inline]
    fn on_event(&self, _event: &ArenaEvent) {}
}
