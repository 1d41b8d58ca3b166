//! Error type shared by the cache and bucket views.
//!
//! Allocation failures are not represented here: a zero-length request
//! panics and system memory exhaustion aborts through the global
//! allocator, so neither reaches a caller as a value.

use thiserror::Error;

use crate::cache::BucketIndex;

#[derive(Error, Debug)]
pub enum Error {
    /// A bucket handed to `insert` does not match the cache's page size.
    #[error("bucket block size {actual} does not match cache block size {expected}")]
    BlockSizeMismatch { expected: usize, actual: usize },

    /// Checked create/insert found the index already cached.
    #[error("bucket {0} is already cached")]
    DuplicateIndex(BucketIndex),

    #[error("bucket is full ({capacity} entries)")]
    BucketFull { capacity: usize },

    /// A bucket view was built over a buffer of the wrong length.
    #[error("bucket buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// An on-page field is limited to 48 bits.
    #[error("{field} {value} does not fit in 48 bits")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
