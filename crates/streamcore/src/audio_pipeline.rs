//! Pumps compressed MP3 bytes from an input [`Channel`] through an MP3
//! frame decoder into a PCM [`Channel`] feeding an audio sink. The input
//! channel is event-loop-only; the PCM channel is the single cross-thread
//! data structure in the pipeline (event loop writes, audio thread reads),
//! and its cursor bookkeeping is therefore behind a mutex — see
//! [`PcmChannel`].
//!
//! Two rings, not one: letting the compressed-bytes ring and the PCM ring
//! each run at their own natural block size means frame boundaries on the
//! network side never have to line up with the sink's pull-callback size.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::error::MappingError;

/// Result of attempting to decode one frame from a linear byte span.
/// `frame_bytes == 0` means not enough input is buffered yet (the caller
/// should stop and wait for more network bytes); otherwise `frame_bytes`
/// is how much of the input to commit and `samples` (per channel,
/// interleaved `channels`-wide) describes what was written to `pcm_out`.
#[derive(Default, Clone, Copy)]
pub struct FrameDecodeResult {
    pub frame_bytes: usize,
    pub samples_per_channel: usize,
    pub channels: usize,
}

/// Decodes one MP3 frame from `data`, writing interleaved `i16` PCM into
/// `pcm_out` (which must be at least `MAX_SAMPLES_PER_FRAME` long). MP3
/// frame decoding itself is an external collaborator; this trait is the
/// seam the audio pipeline core depends on.
pub trait Mp3FrameDecoder {
    fn decode_frame(&mut self, data: &[u8], pcm_out: &mut [i16]) -> FrameDecodeResult;
}

/// Pull-based audio output device. The pipeline only needs to know
/// whether playback has begun; the sink itself pulls PCM bytes from the
/// shared [`PcmChannel`] on its own thread via whatever mechanism the
/// concrete implementation uses (a `cpal` stream callback, in practice).
pub trait AudioSink {
    fn is_started(&self) -> bool;
    fn start(&mut self);
}

/// The PCM ring, shared between the event-loop thread (decoder, writer)
/// and the audio thread (sink, reader). Locking is limited to cursor
/// bookkeeping: `memcpy_in`/`memcpy_out` read the slice bounds under the
/// lock and perform the byte copy there too, since at one audio block's
/// worth of bytes (a few KB at 1024 frames/callback) the critical section
/// is short enough that splitting the copy out from under the lock isn't
/// worth the added complexity here.
#[derive(Clone)]
pub struct PcmChannel {
    inner: Arc<Mutex<Channel>>,
}

impl PcmChannel {
    pub fn new(size: usize, low_watermark: usize, high_watermark: usize) -> Result<Self, MappingError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Channel::new(size, low_watermark, high_watermark)?)),
        })
    }

    pub fn below_low_watermark(&self) -> bool {
        self.inner.lock().below_low_watermark()
    }

    pub fn below_high_watermark(&self) -> bool {
        self.inner.lock().below_high_watermark()
    }

    pub fn writable_size(&self) -> usize {
        self.inner.lock().buffer().non_filled_size()
    }

    pub fn readable_size(&self) -> usize {
        self.inner.lock().buffer_ref().filled_size()
    }

    pub fn memcpy_in(&self, src: &[u8]) {
        self.inner.lock().buffer().memcpy_in(src);
    }

    /// Fills as much of `dst` as `readable_size` allows, zero-padding the
    /// rest, and returns how many real bytes were copied (the rest are
    /// the caller's underflow).
    pub fn pull_or_pad(&self, dst: &mut [u8]) -> usize {
        let mut guard = self.inner.lock();
        let available = guard.buffer_ref().filled_size().min(dst.len());
        if available > 0 {
            guard.memcpy_out(&mut dst[..available]);
        }
        for b in &mut dst[available..] {
            *b = 0;
        }
        available
    }

    /// Registers a wake for when `min_free_bytes` become writable.
    pub fn on_writable(&self, min_free_bytes: usize, callback: crate::channel::WakeCallback) {
        self.inner.lock().on_writable(min_free_bytes, callback);
    }

    pub fn take_ready(&self) -> Vec<crate::channel::WakeCallback> {
        self.inner.lock().take_ready()
    }
}

const MAX_SAMPLES_PER_FRAME: usize = 1152 * 2;

pub struct AudioPipeline<D: Mp3FrameDecoder> {
    decoder: D,
    pcm: PcmChannel,
    waiting_for_bytes: Option<usize>,
}

impl<D: Mp3FrameDecoder> AudioPipeline<D> {
    pub fn new(decoder: D, pcm: PcmChannel) -> Self {
        Self {
            decoder,
            pcm,
            waiting_for_bytes: None,
        }
    }

    pub fn pcm(&self) -> &PcmChannel {
        &self.pcm
    }

    /// `Some(n)` when the last `decode_next` stopped short because the PCM
    /// ring had fewer than `n` writable bytes. The caller is expected to
    /// register `pcm().on_writable(n, retry)` and call `decode_next` again
    /// from that callback.
    pub fn waiting_for_bytes(&self) -> Option<usize> {
        self.waiting_for_bytes
    }

    /// Pumps as many frames as currently fit; see spec §4.8. Returns how
    /// many input bytes were committed this call.
    pub fn decode_next(&mut self, input: &mut Channel, sink: &mut impl AudioSink) -> usize {
        self.waiting_for_bytes = None;
        let mut committed = 0usize;
        let mut pcm_scratch = [0i16; MAX_SAMPLES_PER_FRAME];

        while input.buffer_ref().filled_size() > 0 && self.pcm.below_high_watermark() {
            let frame = input.buffer_ref().readable();
            let result = self.decoder.decode_frame(frame, &mut pcm_scratch);
            if result.frame_bytes == 0 {
                break;
            }
            let required = result.channels * result.samples_per_channel * std::mem::size_of::<f32>();
            if required > self.pcm.writable_size() {
                self.waiting_for_bytes = Some(required);
                break;
            }
            input.commit(result.frame_bytes);
            committed += result.frame_bytes;

            if required > 0 {
                let sample_count = result.channels * result.samples_per_channel;
                let mut interleaved = vec![0f32; sample_count];
                for (dst, src) in interleaved.iter_mut().zip(&pcm_scratch[..sample_count]) {
                    *dst = f32::from(*src) / f32::from(i16::MAX);
                }
                let bytes: Vec<u8> = interleaved.iter().flat_map(|s| s.to_le_bytes()).collect();
                self.pcm.memcpy_in(&bytes);
            }
        }

        if !sink.is_started() && !self.pcm.below_low_watermark() {
            sink.start();
        }

        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    struct OneShotDecoder {
        frame: Vec<u8>,
        samples: usize,
        decoded: bool,
    }

    impl Mp3FrameDecoder for OneShotDecoder {
        fn decode_frame(&mut self, data: &[u8], pcm_out: &mut [i16]) -> FrameDecodeResult {
            if self.decoded || data.len() < self.frame.len() {
                return FrameDecodeResult::default();
            }
            self.decoded = true;
            for i in 0..self.samples * 2 {
                pcm_out[i] = 1000;
            }
            FrameDecodeResult {
                frame_bytes: self.frame.len(),
                samples_per_channel: self.samples,
                channels: 2,
            }
        }
    }

    struct FakeSink {
        started: bool,
    }
    impl AudioSink for FakeSink {
        fn is_started(&self) -> bool {
            self.started
        }
        fn start(&mut self) {
            self.started = true;
        }
    }

    #[test]
    fn waits_when_pcm_ring_too_small_s6() {
        let mut input = Channel::new(4096, 1, 4096).unwrap();
        let frame = vec![0xFFu8; 100];
        input.buffer().memcpy_in(&frame);

        // PCM ring far smaller than one frame's worth of samples.
        let pcm = PcmChannel::new(4096, 1, 64).unwrap();
        let decoder = OneShotDecoder {
            frame: frame.clone(),
            samples: 1152,
            decoded: false,
        };
        let mut pipeline = AudioPipeline::new(decoder, pcm);
        let mut sink = FakeSink { started: false };

        let committed = pipeline.decode_next(&mut input, &mut sink);
        assert_eq!(committed, 0, "no input bytes should be committed yet");
        assert!(pipeline.waiting_for_bytes().is_some());
        assert_eq!(input.buffer_ref().filled_size(), frame.len());
    }

    #[test]
    fn decodes_once_pcm_ring_has_room() {
        let mut input = Channel::new(4096, 1, 4096).unwrap();
        let frame = vec![0xFFu8; 50];
        input.buffer().memcpy_in(&frame);

        let pcm = PcmChannel::new(1 << 16, 1, 1 << 15).unwrap();
        let decoder = OneShotDecoder {
            frame: frame.clone(),
            samples: 100,
            decoded: false,
        };
        let mut pipeline = AudioPipeline::new(decoder, pcm.clone());
        let mut sink = FakeSink { started: false };

        let committed = pipeline.decode_next(&mut input, &mut sink);
        assert_eq!(committed, frame.len());
        assert_eq!(input.buffer_ref().filled_size(), 0);
        assert_eq!(pcm.readable_size(), 100 * 2 * 4);
    }
}
