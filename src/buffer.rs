//! Flat, fixed-capacity ring buffer used to stage bytes between the socket
//! and the incremental parser.
//!
//! Unlike a true ring buffer the backing storage is never wrapped: once the
//! write cursor reaches capacity, [`FlatBuffer::prepare`] compacts the
//! unconsumed region back to offset `0`. This keeps slices handed to the
//! parser contiguous, which is what makes zero-copy parsing possible.

use crate::limits::ReqLimits;

/// Below this many free trailing bytes, [`FlatBuffer::prepare`] compacts
/// eagerly instead of waiting for the buffer to fill completely; keeps a
/// single large `read_some` call from being starved by a handful of bytes
/// stuck at the front.
const PREPARE_THRESHOLD: usize = 512;

#[derive(Debug)]
pub(crate) struct FlatBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl FlatBuffer {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            data: vec![0u8; limits.precalc.buffer].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Bytes available to the parser: `[read, write)`.
    #[inline(always)]
    pub(crate) fn readable(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Free trailing space available for the next `read_some` call.
    #[inline(always)]
    pub(crate) fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    #[inline(always)]
    pub(crate) fn is_full(&self) -> bool {
        self.write == self.data.len()
    }

    /// Records that `n` freshly-read bytes landed in [`Self::writable`].
    #[inline(always)]
    pub(crate) fn commit(&mut self, n: usize) {
        self.write += n;
        debug_assert!(self.write <= self.data.len());
    }

    /// Marks `n` bytes of [`Self::readable`] as fully parsed and removable.
    #[inline(always)]
    pub(crate) fn consume(&mut self, n: usize) {
        self.read += n;
        debug_assert!(self.read <= self.write);
    }

    /// Compacts the unconsumed region to offset `0` when there isn't much
    /// free trailing space left, so the next `read_some` can make progress.
    #[inline(always)]
    pub(crate) fn prepare(&mut self) {
        if self.read == 0 {
            return;
        }
        let remaining_capacity = self.data.len() - self.write;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        } else if remaining_capacity < PREPARE_THRESHOLD {
            self.data.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
        }
    }

    /// `true` once no further `read_some` can make progress: the buffer is
    /// full and compaction wouldn't free any space (everything unconsumed).
    #[inline(always)]
    pub(crate) fn overflowed(&self) -> bool {
        self.is_full() && self.read == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ReqLimits {
        ReqLimits {
            body_size: 16,
            ..ReqLimits::default()
        }
        .precalculate()
    }

    #[test]
    fn commit_then_consume_then_compact() {
        let limits = limits();
        let mut buf = FlatBuffer::new(&limits);

        buf.writable()[..5].copy_from_slice(b"hello");
        buf.commit(5);
        assert_eq!(buf.readable(), b"hello");

        buf.consume(5);
        assert_eq!(buf.readable(), b"");

        buf.prepare();
        assert_eq!(buf.read, 0);
        assert_eq!(buf.write, 0);
    }

    #[test]
    fn partial_consume_keeps_remainder() {
        let limits = limits();
        let mut buf = FlatBuffer::new(&limits);

        buf.writable()[..7].copy_from_slice(b"GET /a ");
        buf.commit(7);
        buf.consume(4);
        assert_eq!(buf.readable(), b"/a ");
    }

    #[test]
    fn overflow_when_full_and_nothing_consumed() {
        let limits = limits();
        let mut buf = FlatBuffer::new(&limits);
        let cap = buf.data.len();

        buf.commit(cap);
        assert!(buf.overflowed());
    }
}
