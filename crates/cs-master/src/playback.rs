//! The internal playback thread: pulls PCM from a decoder and feeds
//! the audio sink, observing the shared state flag between buffer
//! refills so pause/stop land on buffer boundaries only.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cs_audio::{CpalSink, PcmSink};
use tracing::debug;

use crate::Decoder;

/// Playback state shared with the feeder thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

impl PlayerState {
    fn from_raw(value: u8) -> Self {
        match value {
            1 => PlayerState::Playing,
            2 => PlayerState::Paused,
            _ => PlayerState::Stopped,
        }
    }

    fn raw(self) -> u8 {
        match self {
            PlayerState::Stopped => 0,
            PlayerState::Playing => 1,
            PlayerState::Paused => 2,
        }
    }
}

/// Frames decoded per refill (about 46 ms at 44.1 kHz).
const REFILL_FRAMES: usize = 2048;

pub(crate) struct PlaybackHandle {
    state: Arc<AtomicU8>,
    thread: Option<JoinHandle<Option<Decoder>>>,
}

impl PlaybackHandle {
    /// Spawn the feeder thread over a decoder.
    pub(crate) fn spawn(decoder: Decoder, channels: u8) -> Result<Self, cs_audio::AudioError> {
        let state = Arc::new(AtomicU8::new(PlayerState::Playing.raw()));
        let shared = state.clone();
        let thread = std::thread::spawn(move || feeder(decoder, channels, shared));
        Ok(Self { state, thread: Some(thread) })
    }

    pub(crate) fn state(&self) -> PlayerState {
        PlayerState::from_raw(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: PlayerState) {
        self.state.store(state.raw(), Ordering::Relaxed);
    }

    /// Request a stop and reclaim the decoder.
    pub(crate) fn join(mut self) -> Option<Decoder> {
        self.set_state(PlayerState::Stopped);
        self.thread.take().and_then(|t| t.join().ok()).flatten()
    }

    /// Wait for the song to finish on its own.
    pub(crate) fn wait(mut self) -> Option<Decoder> {
        self.thread.take().and_then(|t| t.join().ok()).flatten()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.set_state(PlayerState::Stopped);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The feeder loop: cooperative cancellation, checked once per buffer.
fn feeder(mut decoder: Decoder, channels: u8, state: Arc<AtomicU8>) -> Option<Decoder> {
    let mut sink = match CpalSink::open(channels) {
        Ok(sink) => sink,
        Err(error) => {
            debug!("audio output unavailable: {error}");
            state.store(PlayerState::Stopped.raw(), Ordering::Relaxed);
            return Some(decoder);
        }
    };
    sink.resume();

    let samples_per_refill = REFILL_FRAMES * channels as usize;
    let mut bytes = vec![0u8; samples_per_refill * 2];
    let mut pcm = vec![0i16; samples_per_refill];
    loop {
        match PlayerState::from_raw(state.load(Ordering::Relaxed)) {
            PlayerState::Stopped => break,
            PlayerState::Paused => {
                sink.suspend();
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            PlayerState::Playing => sink.resume(),
        }
        let written = decoder.fill(&mut bytes);
        if written <= 0 {
            break;
        }
        let samples = written as usize / 2;
        for (sample, raw) in pcm.iter_mut().zip(bytes[..written as usize].chunks_exact(2)) {
            *sample = i16::from_le_bytes([raw[0], raw[1]]);
        }
        sink.queue_blocking(&pcm[..samples]);
    }

    // Flush a tail of silence so the last buffer is heard in full
    pcm.fill(0);
    sink.queue_blocking(&pcm);
    sink.suspend();
    state.store(PlayerState::Stopped.raw(), Ordering::Relaxed);
    Some(decoder)
}
