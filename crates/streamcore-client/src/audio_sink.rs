//! `cpal`-backed [`AudioSink`]: opens the default output device at the
//! fixed 44.1kHz/2ch/f32 configuration and pulls PCM bytes out of the
//! shared [`PcmChannel`] from the device's own realtime callback thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use streamcore::{audio_format, AudioSink, MetricsProducer, PcmChannel, StreamEvent};
use tracing::error;

use crate::connection::WakeSender;

pub struct CpalSink {
    stream: Option<cpal::Stream>,
    pcm: PcmChannel,
    wake_tx: WakeSender,
    metrics: Option<MetricsProducer>,
}

impl CpalSink {
    pub fn new(pcm: PcmChannel, wake_tx: WakeSender, metrics: MetricsProducer) -> Self {
        Self {
            stream: None,
            pcm,
            wake_tx,
            metrics: Some(metrics),
        }
    }

    fn build_stream(&mut self) -> anyhow::Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device"))?;

        let config = cpal::StreamConfig {
            channels: audio_format::CHANNELS,
            sample_rate: cpal::SampleRate(audio_format::SAMPLE_RATE_HZ),
            buffer_size: cpal::BufferSize::Fixed(audio_format::FRAMES_PER_CALLBACK),
        };

        let pcm = self.pcm.clone();
        let wake_tx = self.wake_tx.clone();
        let mut metrics = self
            .metrics
            .take()
            .expect("build_stream is only ever called once, from start()");
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut bytes = vec![0u8; data.len() * std::mem::size_of::<f32>()];
                let filled = pcm.pull_or_pad(&mut bytes);
                if filled < bytes.len() {
                    // Realtime-thread callback: push the sample to the
                    // lock-free metrics ring rather than logging here.
                    metrics.push(StreamEvent::Underrun {
                        missing_bytes: bytes.len() - filled,
                    });
                }
                for (sample, chunk) in data.iter_mut().zip(bytes.chunks_exact(4)) {
                    *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                // Pulling may have satisfied a pending decode-retry wake;
                // post back to the event loop rather than running it here.
                if pcm.below_low_watermark() {
                    let _ = wake_tx.send(());
                }
            },
            |err| error!("cpal stream error: {err}"),
            None,
        )?;
        Ok(stream)
    }
}

impl AudioSink for CpalSink {
    fn is_started(&self) -> bool {
        self.stream.is_some()
    }

    fn start(&mut self) {
        if self.stream.is_some() {
            return;
        }
        match self.build_stream() {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    error!("failed to start cpal stream: {e}");
                    return;
                }
                self.stream = Some(stream);
            }
            Err(e) => error!("failed to build cpal output stream: {e}"),
        }
    }
}
