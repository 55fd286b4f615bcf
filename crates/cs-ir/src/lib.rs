//! Core model types for chipstream.
//!
//! This crate defines the uniform song model that every format loader
//! emits and the playback engine consumes: patterns of value-typed
//! commands, samples, instruments with envelopes, and the order list.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod effects;
mod instrument;
mod pattern;
mod sample;
pub mod song;

pub use effects::{Effect, VolumeCommand};
pub use instrument::{
    DuplicateAction, DuplicateCheck, Envelope, EnvelopeNode, Instrument, NewNoteAction,
    NoteMapEntry, MAX_ENVELOPE_NODES,
};
pub use pattern::{Cell, Note, Pattern};
pub use sample::{AdlibPatch, AutoVibrato, LoopType, Sample, SampleData, SamplePayload};
pub use song::{ChannelSettings, InstrumentId, OrderEntry, SampleId, Song, SongFlags};
