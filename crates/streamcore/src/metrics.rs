//! Lock-free bridge for [`StreamEvent`] samples, for the same reason
//! `harmoniq-rt`'s `RtEvent` has one: the producer side (a `FileSender`
//! completion on the event loop, or a `cpal` callback on the audio thread)
//! must never block or allocate, so events are pushed into an `rtrb` SPSC
//! ring and drained later by whatever logs the periodic housekeeping line.

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use streamcore_rt::StreamEvent;

/// Producer half. Cheap to push into; a full ring silently drops the event
/// and bumps a counter rather than blocking the realtime caller.
pub struct MetricsProducer {
    prod: Producer<StreamEvent>,
    dropped: u64,
}

impl MetricsProducer {
    #[inline]
    pub fn push(&mut self, event: StreamEvent) {
        match self.prod.push(event) {
            Ok(()) => {}
            Err(PushError::Full(_)) => self.dropped = self.dropped.wrapping_add(1),
        }
    }

    /// Count of events dropped because the ring was full when pushed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Consumer half, owned by the housekeeping task.
pub struct MetricsConsumer {
    cons: Consumer<StreamEvent>,
}

impl MetricsConsumer {
    /// Drains everything currently buffered without blocking.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        std::iter::from_fn(|| self.cons.pop().ok()).collect()
    }
}

/// A bounded SPSC channel of [`StreamEvent`]s. `capacity` should comfortably
/// exceed the number of events expected between two housekeeping ticks.
pub fn metrics_channel(capacity: usize) -> (MetricsProducer, MetricsConsumer) {
    let (prod, cons) = RingBuffer::new(capacity);
    (
        MetricsProducer { prod, dropped: 0 },
        MetricsConsumer { cons },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let (mut prod, mut cons) = metrics_channel(8);
        prod.push(StreamEvent::BytesSent { total: 1 });
        prod.push(StreamEvent::BytesSent { total: 2 });
        let drained = cons.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind_id(), StreamEvent::BytesSent { total: 1 }.kind_id());
    }

    #[test]
    fn full_ring_drops_and_counts_instead_of_blocking() {
        let (mut prod, mut cons) = metrics_channel(1);
        prod.push(StreamEvent::Underrun { missing_bytes: 1 });
        prod.push(StreamEvent::Underrun { missing_bytes: 2 });
        assert_eq!(prod.dropped(), 1);
        assert_eq!(cons.drain().len(), 1);
    }
}
