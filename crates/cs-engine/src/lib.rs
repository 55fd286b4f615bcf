//! Playback engine for chipstream.
//!
//! Interprets the pattern/effect model from `cs-ir` and renders it to
//! 16-bit PCM through a polyphonic sample mixer.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod channel;
mod envelope;
mod mixer;
mod period;
mod player;
pub mod tables;

pub use channel::{ChannelState, FilterState, Oscillator, RAMP_LENGTH};
pub use envelope::EnvelopeState;
pub use mixer::MIX_BLOCK;
pub use period::{frequency_from_period, period_from_note, period_to_increment};
pub use player::{Interpolation, Player, MAX_GHOSTS, MAX_VOICES};
