#![cfg_attr(not(test), warn(clippy::pedantic))]

//! Event kinds emitted by the transport pipeline for the housekeeping log
//! line (a timer fires every 3-5s purely for logging, per design). Not a
//! metrics/telemetry system, just enough structure to log counters without
//! string-formatting on every commit.

#[derive(Copy, Clone, Debug)]
pub enum StreamEvent {
    /// The PCM sink underflowed: fewer bytes were readable than requested.
    Underrun { missing_bytes: usize },
    /// Bytes placed on the wire by a `FileSender` chunk completion.
    BytesSent { total: usize },
    /// Time between a `WakeRequest` being satisfied and its callback running.
    WakeLatencyMicros { us: u32 },
}

impl StreamEvent {
    #[inline]
    pub fn kind_id(&self) -> u8 {
        match self {
            StreamEvent::Underrun { .. } => 1,
            StreamEvent::BytesSent { .. } => 2,
            StreamEvent::WakeLatencyMicros { .. } => 3,
        }
    }
}
