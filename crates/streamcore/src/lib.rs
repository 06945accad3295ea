//! Byte-transport core for the MP3 streaming pipeline: a double-mapped
//! ring buffer, a watermark/wake-request channel built on it, a
//! length-prefixed framing codec, and a zero-copy file sender. Socket
//! plumbing, MP3 frame decoding and the audio sink are external
//! collaborators plugged in by the server/client binaries.

pub mod audio_pipeline;
pub mod channel;
pub mod codec;
pub mod error;
pub mod file_sender;
pub mod mapped_ring;
pub mod metrics;
pub mod ring_buffer;

pub use audio_pipeline::{AudioPipeline, AudioSink, FrameDecodeResult, Mp3FrameDecoder, PcmChannel};
pub use channel::{Channel, WakeCallback};
pub use codec::{Decoder, Encoder, MSG_MP3_BODY, MSG_TEXT, MSG_TIME};
pub use error::{MappingError, ProtocolError, TransportError};
pub use file_sender::{CancelHandle, FileHandle, FileSender, SenderCursor};
pub use mapped_ring::MappedRing;
pub use metrics::{metrics_channel, MetricsConsumer, MetricsProducer};
pub use ring_buffer::RingBuffer;
pub use streamcore_rt::StreamEvent;

/// Audio device configuration fixed by the design: 44.1kHz stereo float32,
/// 1024-frame callback buffer.
pub mod audio_format {
    pub const SAMPLE_RATE_HZ: u32 = 44_100;
    pub const CHANNELS: u16 = 2;
    pub const FRAMES_PER_CALLBACK: u32 = 1024;
    pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();
}

/// Default TCP port for the wire protocol (spec §6).
pub const DEFAULT_PORT: u16 = 8060;
