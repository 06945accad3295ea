//! Wrap-free read/write cursors layered over a [`MappedRing`]. Cursor
//! arithmetic only; no byte is ever moved by `consume`/`commit`.

use crate::error::MappingError;
use crate::mapped_ring::MappedRing;

pub struct RingBuffer {
    ring: MappedRing,
    capacity: usize,
    filled_start: usize,
    filled_size: usize,
    non_filled_start: usize,
    non_filled_size: usize,
}

impl RingBuffer {
    pub fn new(size: usize) -> Result<Self, MappingError> {
        let ring = MappedRing::new(size)?;
        let capacity = ring.capacity();
        Ok(Self {
            ring,
            capacity,
            filled_start: 0,
            filled_size: 0,
            non_filled_start: 0,
            non_filled_size: capacity,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn filled_size(&self) -> usize {
        self.filled_size
    }

    #[inline]
    pub fn non_filled_size(&self) -> usize {
        self.non_filled_size
    }

    /// Linear slice of exactly `non_filled_size` bytes at `non_filled_start`.
    /// Contiguous in virtual memory even when the logical region wraps,
    /// because of the double mapping.
    pub fn writable(&mut self) -> &mut [u8] {
        let start = self.non_filled_start;
        let len = self.non_filled_size;
        &mut self.ring.as_mut_slice()[start..start + len]
    }

    pub fn writable_upto(&mut self, max: usize) -> &mut [u8] {
        let len = self.non_filled_size.min(max);
        let start = self.non_filled_start;
        &mut self.ring.as_mut_slice()[start..start + len]
    }

    /// Linear slice of exactly `filled_size` bytes at `filled_start`.
    pub fn readable(&self) -> &[u8] {
        let start = self.filled_start;
        let len = self.filled_size;
        &self.ring.as_slice()[start..start + len]
    }

    pub fn readable_upto(&self, max: usize) -> &[u8] {
        let len = self.filled_size.min(max);
        let start = self.filled_start;
        &self.ring.as_slice()[start..start + len]
    }

    /// Marks `k` previously-unfilled bytes as filled. Producer side,
    /// post-write. `k` must be `<= non_filled_size`; violating that is a
    /// caller contract bug and is a fatal assertion, not an `Err`.
    pub fn consume(&mut self, k: usize) {
        assert!(
            k <= self.non_filled_size,
            "consume({k}) exceeds non_filled_size {}",
            self.non_filled_size
        );
        self.non_filled_start = (self.non_filled_start + k) % self.capacity;
        self.non_filled_size -= k;
        self.filled_size += k;
    }

    /// Marks `k` previously-filled bytes as unfilled. Consumer side,
    /// post-read.
    pub fn commit(&mut self, k: usize) {
        assert!(
            k <= self.filled_size,
            "commit({k}) exceeds filled_size {}",
            self.filled_size
        );
        self.filled_start = (self.filled_start + k) % self.capacity;
        self.filled_size -= k;
        self.non_filled_size += k;
    }

    /// Copies `src` into the writable region and consumes that many bytes.
    pub fn memcpy_in(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.non_filled_size,
            "memcpy_in: {} bytes exceed non_filled_size {}",
            src.len(),
            self.non_filled_size
        );
        self.writable()[..src.len()].copy_from_slice(src);
        self.consume(src.len());
    }

    /// Copies into `dst` from the readable region and commits that many
    /// bytes. `dst` must not be longer than `filled_size`.
    pub fn memcpy_out(&mut self, dst: &mut [u8]) {
        assert!(
            dst.len() <= self.filled_size,
            "memcpy_out: {} bytes exceed filled_size {}",
            dst.len(),
            self.filled_size
        );
        dst.copy_from_slice(&self.readable()[..dst.len()]);
        self.commit(dst.len());
    }

    /// Reads four bytes at `filled_start` as little-endian `u32`.
    /// Precondition: `filled_size >= 4`; a caller that violates this has a
    /// programming fault, not a runtime condition.
    pub fn peek_u32_le(&self) -> u32 {
        assert!(self.filled_size >= 4, "peek_u32_le: fewer than 4 bytes filled");
        let slice = &self.readable()[..4];
        u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]])
    }

    pub fn reset(&mut self) {
        self.filled_start = 0;
        self.filled_size = 0;
        self.non_filled_start = 0;
        self.non_filled_size = self.capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_hold_across_consume_commit() {
        let mut rb = RingBuffer::new(4096).unwrap();
        let cap = rb.capacity();
        assert_eq!(rb.filled_size() + rb.non_filled_size(), cap);
        rb.consume(100);
        assert_eq!(rb.filled_size() + rb.non_filled_size(), cap);
        rb.commit(40);
        assert_eq!(rb.filled_size() + rb.non_filled_size(), cap);
        rb.consume(cap - 60);
        assert_eq!(rb.filled_size() + rb.non_filled_size(), cap);
        rb.commit(rb.filled_size());
        assert_eq!(rb.filled_size() + rb.non_filled_size(), cap);
    }

    #[test]
    fn one_page_scenario_s1() {
        let mut rb = RingBuffer::new(1).unwrap();
        let p = rb.capacity();
        rb.consume(p);
        assert_eq!(rb.readable().len(), p);
        rb.commit(p / 2);
        assert_eq!(rb.readable().len(), p / 2);
        assert_eq!(rb.writable().len(), p / 2);
        rb.consume(p / 4);
        assert!(!rb.readable().is_empty());
        assert!(!rb.writable().is_empty());
    }

    #[test]
    fn wrap_neutrality() {
        let mut rb = RingBuffer::new(4096).unwrap();
        let cap = rb.capacity();
        // Move the cursors partway around so the subsequent write wraps.
        rb.consume(cap - 16);
        rb.commit(cap - 16);

        let payload: Vec<u8> = (0u8..=255).cycle().take(500).collect();
        rb.memcpy_in(&payload);
        let mut out = vec![0u8; payload.len()];
        rb.memcpy_out(&mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn consume_then_commit_is_observably_a_no_op() {
        let mut rb = RingBuffer::new(4096).unwrap();
        rb.consume(123);
        rb.commit(40);
        let before = (
            rb.filled_size(),
            rb.non_filled_size(),
        );
        rb.consume(77);
        rb.commit(77);
        assert_eq!((rb.filled_size(), rb.non_filled_size()), before);
    }

    #[test]
    #[should_panic]
    fn commit_past_filled_region_is_fatal() {
        let mut rb = RingBuffer::new(4096).unwrap();
        rb.commit(1);
    }
}
