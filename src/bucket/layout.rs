//! Fixed layout of a bucket page.
//!
//! All integers are big-endian so pages are byte-identical across hosts.
//!
//! ```text
//! [count: u16][spill: u48][entry 0]...[entry count-1][zero padding]
//! entry = [offset: u48][size: u48][hash: u48]
//! ```

pub const COUNT_SIZE: usize = 2;
pub const SPILL_SIZE: usize = 6;

/// Bytes before the first entry.
pub const HEADER_SIZE: usize = COUNT_SIZE + SPILL_SIZE;

/// Bytes per record entry.
pub const ENTRY_SIZE: usize = 6 + 6 + 6;

/// Largest value a 48-bit field holds.
pub const U48_MAX: u64 = (1 << 48) - 1;

/// Number of entries that fit in a page of `block_size` bytes.
pub const fn bucket_capacity(block_size: usize) -> usize {
    if block_size < HEADER_SIZE {
        return 0;
    }
    let n = (block_size - HEADER_SIZE) / ENTRY_SIZE;
    // count is a u16
    if n > u16::MAX as usize {
        u16::MAX as usize
    } else {
        n
    }
}

/// Offset of entry `i` from the start of the page.
#[inline]
pub const fn entry_offset(i: usize) -> usize {
    HEADER_SIZE + i * ENTRY_SIZE
}

#[inline]
pub fn read_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

#[inline]
pub fn write_u16(buf: &mut [u8], v: u16) {
    buf[..2].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn read_u48(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b[2..].copy_from_slice(&buf[..6]);
    u64::from_be_bytes(b)
}

#[inline]
pub fn write_u48(buf: &mut [u8], v: u64) {
    debug_assert!(v <= U48_MAX, "value {v} overflows 48 bits");
    buf[..6].copy_from_slice(&v.to_be_bytes()[2..]);
}
