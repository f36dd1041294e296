//! Fixed-capacity FIFO ring buffer
use core::fmt;

/// A FIFO queue backed by an array. Entries are appended at
/// `(head + len) % N` and removed from `head`.
#[derive(Clone)]
pub(crate) struct Ring<T, const N: usize> {
    buf: [T; N],
    head: usize,
    len: usize,
}

impl<T: Copy, const N: usize> Ring<T, N> {
    /// Construct an empty ring. `fill` is only used to initialize the
    /// storage.
    pub(crate) const fn new(fill: T) -> Self {
        Self {
            buf: [fill; N],
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == N
    }

    /// Get the index at which the next entry will be stored.
    #[inline]
    pub(crate) fn tail(&self) -> usize {
        (self.head + self.len) % N
    }

    /// Append `x`. Returns `x` back if the ring is full.
    pub(crate) fn push(&mut self, x: T) -> Result<(), T> {
        if self.is_full() {
            return Err(x);
        }
        self.buf[self.tail()] = x;
        self.len += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let x = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        Some(x)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.buf[(self.head + i) % N])
    }
}

impl<T: Copy + fmt::Debug, const N: usize> fmt::Debug for Ring<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
