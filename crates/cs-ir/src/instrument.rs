//! Instrument and envelope types (IT instrument mode).

use arrayvec::{ArrayString, ArrayVec};

/// Maximum number of nodes in an envelope.
pub const MAX_ENVELOPE_NODES: usize = 25;

/// An instrument definition.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    /// Instrument name
    pub name: ArrayString<26>,
    /// Note → (translated note, sample index) map, one entry per note 0-119
    pub note_map: [NoteMapEntry; 120],
    /// Volume envelope
    pub volume_envelope: Envelope,
    /// Panning envelope
    pub panning_envelope: Envelope,
    /// Pitch envelope
    pub pitch_envelope: Envelope,
    /// Fade-out speed (0 = no fade); subtracted from a 1024-scale fade
    /// level each tick once a voice is fading
    pub fadeout: u16,
    /// What happens to the previous voice when a new note arrives
    pub new_note_action: NewNoteAction,
    /// Duplicate note checking mode
    pub duplicate_check: DuplicateCheck,
    /// Action taken when the duplicate check matches
    pub duplicate_action: DuplicateAction,
    /// Instrument global volume (0-128)
    pub global_volume: u8,
    /// Default panning (0-255); None = don't override
    pub default_pan: Option<u8>,
    /// Pitch-pan separation (-32 to +32)
    pub pitch_pan_separation: i8,
    /// Centre note for pitch-pan separation
    pub pitch_pan_centre: u8,
}

impl Default for Instrument {
    fn default() -> Self {
        let mut note_map = [NoteMapEntry::default(); 120];
        for (note, entry) in note_map.iter_mut().enumerate() {
            entry.note = note as u8 + 1;
        }
        Self {
            name: ArrayString::new(),
            note_map,
            volume_envelope: Envelope::default(),
            panning_envelope: Envelope::default(),
            pitch_envelope: Envelope::default(),
            fadeout: 0,
            new_note_action: NewNoteAction::Cut,
            duplicate_check: DuplicateCheck::Off,
            duplicate_action: DuplicateAction::Cut,
            global_volume: 128,
            default_pan: None,
            pitch_pan_separation: 0,
            pitch_pan_centre: 60,
        }
    }
}

impl Instrument {
    /// Create a new instrument with default settings.
    pub fn new(name: &str) -> Self {
        let mut inst = Self::default();
        let _ = inst.name.try_push_str(name);
        inst
    }

    /// Map all notes to a single sample, untranslated.
    pub fn set_single_sample(&mut self, sample: u8) {
        for entry in &mut self.note_map {
            entry.sample = sample;
        }
    }

    /// Resolve a note (1-120) through the note map.
    pub fn translate(&self, note: u8) -> NoteMapEntry {
        self.note_map
            .get(note.saturating_sub(1) as usize)
            .copied()
            .unwrap_or_default()
    }
}

/// One entry of the instrument note map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteMapEntry {
    /// Translated note (1-120)
    pub note: u8,
    /// Sample number (0 = none, otherwise 1-based)
    pub sample: u8,
}

/// Action when a new note triggers on a channel already playing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NewNoteAction {
    /// Cut the previous voice immediately
    #[default]
    Cut,
    /// Let the previous voice keep playing in the background
    Continue,
    /// Send note-off to the previous voice
    Off,
    /// Fade the previous voice out
    Fade,
}

impl NewNoteAction {
    /// Decode the IT NNA byte; out-of-range values fall back to Cut.
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => NewNoteAction::Continue,
            2 => NewNoteAction::Off,
            3 => NewNoteAction::Fade,
            _ => NewNoteAction::Cut,
        }
    }
}

/// Duplicate note checking mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateCheck {
    #[default]
    Off,
    Note,
    Sample,
    Instrument,
}

impl DuplicateCheck {
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => DuplicateCheck::Note,
            2 => DuplicateCheck::Sample,
            3 => DuplicateCheck::Instrument,
            _ => DuplicateCheck::Off,
        }
    }
}

/// Action taken when the duplicate check matches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateAction {
    #[default]
    Cut,
    Off,
    Fade,
}

impl DuplicateAction {
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => DuplicateAction::Off,
            2 => DuplicateAction::Fade,
            _ => DuplicateAction::Cut,
        }
    }
}

/// An envelope (volume, panning or pitch).
///
/// `flags` carries the IT bit layout: bit 0 enabled, bit 1 looped,
/// bit 2 sustain loop.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    /// Raw envelope flags
    pub flags: u8,
    /// Envelope nodes, sorted by tick
    pub nodes: ArrayVec<EnvelopeNode, MAX_ENVELOPE_NODES>,
    /// Loop range (node indices, inclusive)
    pub loop_start: u8,
    pub loop_end: u8,
    /// Sustain loop range (node indices, inclusive)
    pub sustain_start: u8,
    pub sustain_end: u8,
}

impl Envelope {
    pub fn is_enabled(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn is_looped(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn has_sustain(&self) -> bool {
        self.flags & 0x04 != 0
    }

    /// Add a node to the envelope; silently ignored past capacity.
    pub fn add_node(&mut self, tick: u16, value: i8) {
        let _ = self.nodes.try_push(EnvelopeNode { tick, value });
    }

    /// Linearly interpolated value at `tick`; clamps past either end.
    pub fn value_at(&self, tick: u16) -> i8 {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut prev = &self.nodes[0];
        if tick <= prev.tick {
            return prev.value;
        }
        for node in &self.nodes {
            if node.tick > tick {
                if node.tick == prev.tick {
                    return node.value;
                }
                let t = (tick - prev.tick) as i32;
                let d = (node.tick - prev.tick) as i32;
                let v = prev.value as i32 + (node.value as i32 - prev.value as i32) * t / d;
                return v as i8;
            }
            prev = node;
        }
        prev.value
    }

    /// Tick of the last node (envelope length).
    pub fn end_tick(&self) -> u16 {
        self.nodes.last().map_or(0, |node| node.tick)
    }
}

/// A single (tick, value) envelope node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeNode {
    /// Tick position
    pub tick: u16,
    /// Value (0-64 for volume, -32..+32 for panning/pitch)
    pub value: i8,
}
