//! [`Channel`] layers watermark-based backpressure and one-shot wake
//! callbacks ("condition variable with a predicate on a byte count", per
//! design notes) on top of a [`RingBuffer`].

use crate::error::MappingError;
use crate::ring_buffer::RingBuffer;

pub type WakeCallback = Box<dyn FnOnce() + Send>;

struct WakeRequest {
    min_free_bytes: usize,
    callback: WakeCallback,
}

pub struct Channel {
    ring: RingBuffer,
    low_watermark: usize,
    high_watermark: usize,
    pending: Vec<WakeRequest>,
    /// Callbacks whose threshold is already satisfied, queued to run on the
    /// event loop's next dispatch rather than inline with whatever `commit`
    /// (or `on_writable`) satisfied them.
    ready: Vec<WakeCallback>,
}

impl Channel {
    pub fn new(size: usize, low_watermark: usize, high_watermark: usize) -> Result<Self, MappingError> {
        assert!(
            0 < low_watermark && low_watermark <= high_watermark,
            "watermarks must satisfy 0 < low <= high"
        );
        let ring = RingBuffer::new(size)?;
        assert!(
            high_watermark <= ring.capacity(),
            "high watermark exceeds ring capacity"
        );
        Ok(Self {
            ring,
            low_watermark,
            high_watermark,
            pending: Vec::new(),
            ready: Vec::new(),
        })
    }

    #[inline]
    pub fn buffer(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    #[inline]
    pub fn buffer_ref(&self) -> &RingBuffer {
        &self.ring
    }

    /// Consumer-side commit: releases `k` filled bytes, then fires any
    /// pending `WakeRequest`s whose threshold is now met. Must be used
    /// instead of `self.buffer().commit(k)` for that accounting to happen.
    pub fn commit(&mut self, k: usize) {
        self.ring.commit(k);
        self.dispatch_satisfied();
    }

    pub fn memcpy_out(&mut self, dst: &mut [u8]) {
        self.ring.memcpy_out(dst);
        self.dispatch_satisfied();
    }

    /// Enqueues a one-shot callback for when `non_filled_size >= min_free_bytes`.
    /// Even if already satisfied, the callback is only queued for later
    /// dispatch, never invoked inline, so callers can rely on their own
    /// code finishing before the callback runs.
    pub fn on_writable(&mut self, min_free_bytes: usize, callback: WakeCallback) {
        if self.ring.non_filled_size() >= min_free_bytes {
            self.ready.push(callback);
        } else {
            self.pending.push(WakeRequest {
                min_free_bytes,
                callback,
            });
        }
    }

    /// Drains and returns callbacks ready to run. The event loop calls this
    /// and schedules each one as a distinct task.
    #[must_use]
    pub fn take_ready(&mut self) -> Vec<WakeCallback> {
        std::mem::take(&mut self.ready)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    #[inline]
    pub fn below_low_watermark(&self) -> bool {
        self.ring.filled_size() < self.low_watermark
    }

    #[inline]
    pub fn below_high_watermark(&self) -> bool {
        self.ring.filled_size() < self.high_watermark
    }

    fn dispatch_satisfied(&mut self) {
        // Snapshot first: callbacks that enqueue new WakeRequests while we
        // scan must not observe their own dispatch in this pass.
        let free = self.ring.non_filled_size();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        let drained: Vec<_> = self.pending.drain(..).collect();
        for req in drained {
            if req.min_free_bytes <= free {
                self.ready.push(req.callback);
            } else {
                still_pending.push(req);
            }
        }
        self.pending = still_pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn wake_request_fifo_ordering_s3() {
        let mut ch = Channel::new(4096, 1, 4096).unwrap();
        // Fill the buffer so non_filled_size starts at a known small value.
        let cap = ch.buffer().capacity();
        ch.buffer().consume(cap - 100);

        let fired: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let fired_a = Arc::clone(&fired);
        ch.on_writable(
            1024,
            Box::new(move || fired_a.lock().unwrap().push("A")),
        );
        let fired_b = Arc::clone(&fired);
        ch.on_writable(
            2048,
            Box::new(move || fired_b.lock().unwrap().push("B")),
        );

        ch.commit(512);
        assert!(ch.take_ready().is_empty(), "neither should fire yet");

        ch.commit(600);
        let ready = ch.take_ready();
        assert_eq!(ready.len(), 1, "only A's threshold should be met");
        for cb in ready {
            cb();
        }
        assert_eq!(*fired.lock().unwrap(), vec!["A"]);

        ch.commit(1000);
        let ready = ch.take_ready();
        assert_eq!(ready.len(), 1);
        for cb in ready {
            cb();
        }
        assert_eq!(*fired.lock().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn on_writable_never_fires_inline_even_when_already_satisfied() {
        let mut ch = Channel::new(4096, 1, 4096).unwrap();
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = Arc::clone(&fired);
        ch.on_writable(1, Box::new(move || *fired_clone.lock().unwrap() = true));
        assert!(!*fired.lock().unwrap(), "must not run inline");
        let ready = ch.take_ready();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn watermarks() {
        let mut ch = Channel::new(4096, 100, 200).unwrap();
        assert!(ch.below_low_watermark());
        assert!(ch.below_high_watermark());
        ch.buffer().consume(150);
        assert!(!ch.below_low_watermark());
        assert!(ch.below_high_watermark());
        ch.buffer().consume(100);
        assert!(!ch.below_high_watermark());
    }
}
