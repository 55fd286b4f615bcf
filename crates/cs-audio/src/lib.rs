//! Audio output for chipstream.
//!
//! Decoders hand the playback thread interleaved signed 16-bit PCM;
//! a [`PcmSink`] queues that stream towards the sound device in whole
//! frames, so a mono SNDH render and a stereo module mix go through
//! the same interface.

mod cpal_sink;
mod sink;

pub use cpal_sink::CpalSink;
pub use sink::{AudioError, PcmSink};
