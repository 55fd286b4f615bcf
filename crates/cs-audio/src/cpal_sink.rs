//! Default-device sink over cpal.
//!
//! Opening the sink claims the default output device and starts its
//! stream straight away; the stream callback pulls source frames from
//! an SPSC ring and spreads them over the device's channel layout
//! (mono sources are duplicated, stereo sources are averaged down when
//! the device is mono). A gate flag mutes the callback while the sink
//! is suspended so pause never tears down the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing::warn;

use crate::sink::{AudioError, PcmSink};

/// How long to park between retries when the ring is full.
const FULL_RING_BACKOFF: Duration = Duration::from_micros(500);

fn backend(error: impl std::fmt::Display) -> AudioError {
    AudioError::Backend(error.to_string())
}

pub struct CpalSink {
    sample_rate: u32,
    source_channels: u8,
    producer: HeapProd<i16>,
    gate: Arc<AtomicBool>,
    // Dropping the stream is what finally stops the callback
    _stream: Stream,
}

impl CpalSink {
    /// Open the default output device for sources with the given
    /// channel count. The stream starts gated to silence; call
    /// [`PcmSink::resume`] to let audio through.
    pub fn open(source_channels: u8) -> Result<Self, AudioError> {
        let source = source_channels.clamp(1, 2) as usize;
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let config: StreamConfig =
            device.default_output_config().map_err(backend)?.into();
        let device_channels = (config.channels as usize).max(1);
        let sample_rate = config.sample_rate.0;

        // Half a second of source audio between the two threads
        let capacity = (sample_rate as usize / 2) * source;
        let (producer, mut consumer) = HeapRb::<i16>::new(capacity).split();
        let gate = Arc::new(AtomicBool::new(false));
        let open = gate.clone();

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !open.load(Ordering::Relaxed) {
                        out.fill(0.0);
                        return;
                    }
                    for device_frame in out.chunks_mut(device_channels) {
                        // Only whole source frames leave the ring
                        if consumer.occupied_len() < source {
                            device_frame.fill(0.0);
                            continue;
                        }
                        let first = consumer.try_pop().unwrap_or(0);
                        let second =
                            if source == 2 { consumer.try_pop().unwrap_or(first) } else { first };
                        spread_frame(device_frame, first, second);
                    }
                },
                |error| warn!("output stream error: {error}"),
                None,
            )
            .map_err(backend)?;
        stream.play().map_err(backend)?;

        Ok(Self {
            sample_rate,
            source_channels: source as u8,
            producer,
            gate,
            _stream: stream,
        })
    }

    /// Room in the ring, rounded down to whole frames, in samples.
    fn vacant_samples(&self) -> usize {
        let frame = self.source_channels as usize;
        (self.producer.vacant_len() / frame) * frame
    }
}

/// Lay one source frame across a device frame of any width.
fn spread_frame(device_frame: &mut [f32], left: i16, right: i16) {
    match device_frame {
        [mono] => *mono = (left as i32 + right as i32) as f32 / (2.0 * 32768.0),
        _ => {
            device_frame[0] = left as f32 / 32768.0;
            device_frame[1] = right as f32 / 32768.0;
            for silent in &mut device_frame[2..] {
                *silent = 0.0;
            }
        }
    }
}

impl PcmSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn source_channels(&self) -> u8 {
        self.source_channels
    }

    fn queue(&mut self, pcm: &[i16]) -> usize {
        let take = self.vacant_samples().min(pcm.len());
        for &sample in &pcm[..take] {
            let _ = self.producer.try_push(sample);
        }
        take
    }

    fn queue_blocking(&mut self, pcm: &[i16]) {
        let mut queued = 0;
        while queued < pcm.len() {
            let sent = self.queue(&pcm[queued..]);
            if sent == 0 {
                thread::sleep(FULL_RING_BACKOFF);
                continue;
            }
            queued += sent;
        }
    }

    fn resume(&mut self) {
        self.gate.store(true, Ordering::Relaxed);
    }

    fn suspend(&mut self) {
        self.gate.store(false, Ordering::Relaxed);
    }
}
