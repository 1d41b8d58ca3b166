/// One fixed-capacity region owned by an arena.
///
/// Storage is a boxed `u64` slice so every block starts 8-byte aligned;
/// because the arena rounds each request up to a multiple of 8, every
/// offset handed out is aligned too.
pub(crate) struct Block {
    words: Box<[u64]>,
    capacity: usize,
    used: usize,
}

impl Block {
    /// Allocate a zero-filled block of `capacity` bytes.
    ///
    /// Memory exhaustion is not recoverable here: the global allocator's
    /// OOM handler aborts.
    pub fn new(capacity: usize) -> Self {
        let words = vec![0u64; capacity.div_ceil(8)].into_boxed_slice();
        Self {
            words,
            capacity,
            used: 0,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.used = 0;
    }

    #[inline]
    pub fn remain(&self) -> usize {
        self.capacity - self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bump-allocate `n` bytes, returning the offset, or `None` if the
    /// block cannot fit all of them.
    #[inline]
    pub fn try_alloc(&mut self, n: usize) -> Option<usize> {
        if n > self.remain() {
            return None;
        }
        Some(self.bump(n))
    }

    /// Bump-allocate `n` bytes the caller already checked against `remain()`.
    #[inline]
    pub fn bump(&mut self, n: usize) -> usize {
        debug_assert!(n <= self.remain());
        let offset = self.used;
        self.used += n;
        offset
    }

    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.as_bytes()[offset..offset + len]
    }

    #[inline]
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.as_bytes_mut()[offset..offset + len]
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: u8 has no alignment or validity requirements, and the
        // byte length covers exactly the words allocation.
        unsafe {
            std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.words.len() * 8)
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; the exclusive borrow of `self` covers the slice.
        unsafe {
            std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.words.len() * 8)
        }
    }
}
