//! The PCM sink interface and its error type.

use std::fmt;

/// Error type for opening and driving an output sink.
#[derive(Debug)]
pub enum AudioError {
    /// No output device is available
    NoDevice,
    /// The audio backend refused the device, config or stream
    Backend(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::NoDevice => write!(f, "no audio output device"),
            AudioError::Backend(detail) => write!(f, "audio backend error: {detail}"),
        }
    }
}

impl std::error::Error for AudioError {}

/// A destination for interleaved signed 16-bit PCM.
///
/// Sinks consume whole source frames: `queue` never splits a frame
/// between calls, so interleave parity survives partial writes.
pub trait PcmSink {
    /// Device output rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Channel count of the frames this sink was opened for.
    fn source_channels(&self) -> u8;

    /// Queue as many whole frames as currently fit; returns the number
    /// of samples consumed.
    fn queue(&mut self, pcm: &[i16]) -> usize;

    /// Queue everything, parking while the device drains.
    fn queue_blocking(&mut self, pcm: &[i16]);

    /// Let queued audio through to the device.
    fn resume(&mut self);

    /// Gate the output to silence without discarding queued audio.
    fn suspend(&mut self);
}
