//! Staging buffers between the caller's stream buffers and the engine.
//!
//! `fifo_in` collects small inputs until a job is worth submitting;
//! `fifo_out` catches engine output that did not fit into the caller's
//! buffer, and on the inflate side additionally retains the trailing 32 KiB
//! of decompressed data as the history for the next job.
//!
//! Data always occupies `buf[cur .. cur + used]`; the compaction rules keep
//! the head from drifting past the halfway point.

/// A linear staging buffer with a moving head.
pub(crate) struct Fifo {
    pub buf: Vec<u8>,
    /// Start offset of live data.
    pub cur: usize,
    /// Live byte count.
    pub used: usize,
}

impl Fifo {
    pub fn new(len: usize) -> Fifo {
        Fifo {
            buf: vec![0; len],
            cur: 0,
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Free bytes behind the live data, honoring the half-used invariant
    /// that keeps room for compaction.
    pub fn free_half(&self) -> usize {
        (self.len() / 2).saturating_sub(self.cur + self.used)
    }

    /// Free bytes behind the live data up to the end of the buffer.
    pub fn free_all(&self) -> usize {
        self.len() - self.cur - self.used
    }

    /// Append as much of `src` as fits in `free` bytes; returns the amount
    /// copied.
    pub fn push(&mut self, src: &[u8], free: usize) -> usize {
        let n = free.min(src.len());
        let at = self.cur + self.used;
        self.buf[at..at + n].copy_from_slice(&src[..n]);
        self.used += n;
        n
    }

    /// Drop `n` bytes from the head.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.used);
        self.cur += n;
        self.used -= n;
    }

    /// Live data slice.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.cur..self.cur + self.used]
    }

    /// Move live data back to the start once the head crosses the midpoint.
    pub fn compact(&mut self) {
        if self.cur > self.len() / 2 {
            self.buf.copy_within(self.cur..self.cur + self.used, 0);
            self.cur = 0;
        }
    }

    /// Deflate-side variant: additionally rewinds an empty buffer.
    pub fn compact_out(&mut self) {
        self.compact();
        if self.used == 0 {
            self.cur = 0;
        }
    }

    /// Inflate-side variant: keep the last `history` bytes that precede the
    /// head when shifting, so the decompression window stays addressable.
    pub fn compact_keep_history(&mut self, history: usize) {
        if self.cur > self.len() / 2 {
            debug_assert!(self.cur >= history);
            let from = self.cur - history;
            self.buf.copy_within(from..self.cur + self.used, 0);
            self.cur = history;
        }
    }

    pub fn reset(&mut self) {
        self.cur = 0;
        self.used = 0;
    }
}
