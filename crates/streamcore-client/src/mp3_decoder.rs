//! [`Mp3FrameDecoder`] backed by `minimp3-sys`'s `mp3dec_decode_frame`,
//! which takes a linear byte span and returns however many bytes of it one
//! frame consumed -- the exact shape `AudioPipeline` expects.

use std::mem::MaybeUninit;

use streamcore::{FrameDecodeResult, Mp3FrameDecoder};

pub struct Minimp3Decoder {
    state: Box<minimp3_sys::mp3dec_t>,
}

impl Minimp3Decoder {
    pub fn new() -> Self {
        // SAFETY: `mp3dec_init` only writes into a caller-owned struct.
        let mut state = Box::new(unsafe { MaybeUninit::<minimp3_sys::mp3dec_t>::zeroed().assume_init() });
        unsafe { minimp3_sys::mp3dec_init(state.as_mut()) };
        Self { state }
    }
}

impl Default for Minimp3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp3FrameDecoder for Minimp3Decoder {
    fn decode_frame(&mut self, data: &[u8], pcm_out: &mut [i16]) -> FrameDecodeResult {
        let mut info: minimp3_sys::mp3dec_frame_info_t = unsafe { MaybeUninit::zeroed().assume_init() };

        // SAFETY: `data` is a valid, readable span for its length; `pcm_out`
        // is valid for MAX_SAMPLES_PER_FRAME*channels i16s as required by
        // the caller contract on `Mp3FrameDecoder`.
        let samples = unsafe {
            minimp3_sys::mp3dec_decode_frame(
                self.state.as_mut(),
                data.as_ptr(),
                data.len() as i32,
                pcm_out.as_mut_ptr(),
                &mut info,
            )
        };

        if info.frame_bytes <= 0 {
            return FrameDecodeResult::default();
        }

        FrameDecodeResult {
            frame_bytes: info.frame_bytes as usize,
            samples_per_channel: samples as usize,
            channels: info.channels.max(1) as usize,
        }
    }
}
