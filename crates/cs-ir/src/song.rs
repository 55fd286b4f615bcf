//! The song: header fields, order list, patterns, samples, instruments.

use alloc::string::String;
use alloc::vec::Vec;

use crate::instrument::Instrument;
use crate::pattern::Pattern;
use crate::sample::Sample;

/// Index of a sample within `Song::samples`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SampleId(pub u16);

impl SampleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an instrument within `Song::instruments`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstrumentId(pub u16);

impl InstrumentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One entry of the order list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderEntry {
    /// Play this pattern
    Pattern(u8),
    /// Skip to the next entry (S3M/IT marker 254)
    Skip,
    /// End of song (marker 255)
    End,
}

impl OrderEntry {
    /// Decode a raw order byte against the loaded pattern count.
    pub fn from_raw(value: u8, pattern_count: u16) -> Self {
        match value {
            254 => OrderEntry::Skip,
            255 => OrderEntry::End,
            n if (n as u16) < pattern_count => OrderEntry::Pattern(n),
            _ => OrderEntry::Skip,
        }
    }

    pub fn pattern(self) -> Option<u8> {
        match self {
            OrderEntry::Pattern(n) => Some(n),
            _ => None,
        }
    }
}

/// Song-level behaviour flags, decoded from format headers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SongFlags {
    /// Amiga-style (period) pitch slides rather than linear ones
    pub amiga_slides: bool,
    /// Clamp periods to the Amiga hardware range
    pub amiga_limits: bool,
    /// ST3 < 3.20 fast volume slides (slide on tick 0 as well)
    pub fast_slides: bool,
    /// IT instrument mode is active
    pub instrument_mode: bool,
    /// IT old-effects compatibility
    pub old_effects: bool,
}

/// Per-channel defaults from the module header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Initial channel volume (0-64)
    pub volume: u8,
    /// Initial panning (0-255, 128 = centre)
    pub pan: u8,
    /// Channel is muted in the file
    pub muted: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { volume: 64, pan: 128, muted: false }
    }
}

/// A fully loaded module, immutable during playback.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    /// Song title
    pub title: String,
    /// Composer, when the format records one
    pub author: Option<String>,
    /// Song message / remark
    pub remark: Option<String>,
    /// Order list (normalised; raw 254/255 markers become sentinels)
    pub orders: Vec<OrderEntry>,
    /// Restart position after the last order
    pub restart_pos: u8,
    /// Patterns
    pub patterns: Vec<Pattern>,
    /// Samples
    pub samples: Vec<Sample>,
    /// Instruments (empty unless `flags.instrument_mode`)
    pub instruments: Vec<Instrument>,
    /// Behaviour flags
    pub flags: SongFlags,
    /// Initial ticks per row
    pub initial_speed: u8,
    /// Initial tempo (BPM)
    pub initial_tempo: u8,
    /// Global volume (0-128)
    pub global_volume: u8,
    /// Master volume; bit 7 set = stereo output
    pub master_volume: u8,
    /// Stereo separation (0-128)
    pub separation: u8,
    /// Per-channel defaults
    pub channels: Vec<ChannelSettings>,
    /// Lowest admissible period for this format
    pub min_period: u32,
    /// Highest admissible period for this format
    pub max_period: u32,
}

impl Song {
    /// Create an empty song with `channels` default channels.
    pub fn with_channels(title: &str, channels: u8) -> Self {
        Self {
            title: String::from(title),
            author: None,
            remark: None,
            orders: Vec::new(),
            restart_pos: 0,
            patterns: Vec::new(),
            samples: Vec::new(),
            instruments: Vec::new(),
            flags: SongFlags::default(),
            initial_speed: 6,
            initial_tempo: 125,
            global_volume: 64,
            master_volume: 0x80 | 64,
            separation: 128,
            channels: (0..channels).map(|_| ChannelSettings::default()).collect(),
            min_period: 56,
            max_period: 7040,
        }
    }

    /// Number of playback channels.
    pub fn num_channels(&self) -> u8 {
        self.channels.len() as u8
    }

    /// True when the master volume requests stereo output.
    pub fn is_stereo(&self) -> bool {
        self.master_volume & 0x80 != 0
    }

    /// Look up a sample by 1-based cell reference.
    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(id.index())
    }

    /// Look up an instrument by id.
    pub fn instrument(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.get(id.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_entry_decoding() {
        assert_eq!(OrderEntry::from_raw(3, 16), OrderEntry::Pattern(3));
        assert_eq!(OrderEntry::from_raw(254, 16), OrderEntry::Skip);
        assert_eq!(OrderEntry::from_raw(255, 16), OrderEntry::End);
        // Out-of-range pattern references are skipped, not played
        assert_eq!(OrderEntry::from_raw(40, 16), OrderEntry::Skip);
    }

    #[test]
    fn stereo_follows_master_volume_bit() {
        let mut song = Song::with_channels("t", 4);
        assert!(song.is_stereo());
        song.master_volume &= 0x7f;
        assert!(!song.is_stereo());
    }
}
