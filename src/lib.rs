//! Write buffer for an append-only key-value store's hash index.
//!
//! During a batch of inserts, modified bucket pages are held in a
//! [`Cache`] keyed by bucket index and flushed together at commit. The
//! cache's memory comes from an [`Arena`], a block allocator that reuses
//! blocks across batches and retunes its block size to the observed
//! allocation rate.
//!
//! ```
//! use bucket_cache::{Bucket, Cache, Entry};
//!
//! let mut cache = Cache::new(32, 4096);
//! cache
//!     .create(0)
//!     .insert(Entry { offset: 8, size: 100, hash: 42 })
//!     .unwrap();
//!
//! let from_disk = Bucket::empty(4096);
//! cache.insert(1, &from_disk).unwrap();
//!
//! for (index, bucket) in &cache {
//!     // write `bucket` back to the key file at `index`
//!     let _ = (index, bucket.len());
//! }
//! cache.clear();
//! ```
pub mod arena;
pub mod bucket;
mod cache;
pub mod clock;
mod error;
pub mod lock;

pub use arena::{Arena, ArenaConfig, ArenaInfo, Span};
pub use bucket::{Bucket, Entry};
pub use cache::{BucketIndex, Cache, CacheInfo, Iter};
pub use error::{Error, Result};
