//! Sample data types.

use alloc::vec::Vec;
use arrayvec::ArrayString;

/// A sample definition.
///
/// Loop bounds are in frames. Stereo payloads are interleaved L,R. The
/// loader appends three guard frames past `length` so the sinc
/// interpolator can read one frame behind and two ahead without bounds
/// branches in the mix loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Sample name
    pub name: ArrayString<26>,
    /// PCM payload, or an Adlib patch (parsed but rendered as silence)
    pub payload: SamplePayload,
    /// Length in frames (excluding guard frames)
    pub length: u32,
    /// Loop start position (frames)
    pub loop_start: u32,
    /// Loop end position (frames, exclusive)
    pub loop_end: u32,
    /// Loop type
    pub loop_type: LoopType,
    /// Sustain loop start (frames)
    pub sustain_start: u32,
    /// Sustain loop end (frames, exclusive)
    pub sustain_end: u32,
    /// Sustain loop active
    pub sustain_loop: bool,
    /// Finetune (-8 to +7 semitone eighths)
    pub finetune: i8,
    /// Default volume (0-64)
    pub default_volume: u8,
    /// Sample global volume (0-64, IT)
    pub global_volume: u8,
    /// Default panning (0-255, 128 = centre); None = use channel default
    pub default_pan: Option<u8>,
    /// Rate at which the sample plays unshifted at C-4
    pub c4_speed: u32,
    /// Auto-vibrato settings
    pub vibrato: Option<AutoVibrato>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            payload: SamplePayload::Native(SampleData::Mono8(Vec::new())),
            length: 0,
            loop_start: 0,
            loop_end: 0,
            loop_type: LoopType::None,
            sustain_start: 0,
            sustain_end: 0,
            sustain_loop: false,
            finetune: 0,
            default_volume: 64,
            global_volume: 64,
            default_pan: None,
            c4_speed: 8363,
            vibrato: None,
        }
    }
}

impl Sample {
    /// Create a new empty sample.
    pub fn new(name: &str) -> Self {
        let mut sample = Self::default();
        let _ = sample.name.try_push_str(name);
        sample
    }

    /// The PCM data, if this is a native sample.
    pub fn data(&self) -> Option<&SampleData> {
        match &self.payload {
            SamplePayload::Native(data) => Some(data),
            SamplePayload::Adlib(_) => None,
        }
    }

    /// Returns true if the sample has no playable data.
    pub fn is_empty(&self) -> bool {
        self.length == 0 || self.data().is_none()
    }

    /// Returns true if the sample has a loop.
    pub fn has_loop(&self) -> bool {
        self.loop_type != LoopType::None && self.loop_end > self.loop_start
    }

    /// Returns true if the payload is stereo.
    pub fn is_stereo(&self) -> bool {
        self.data().is_some_and(SampleData::is_stereo)
    }

    /// Returns true if the payload is 16-bit.
    pub fn is_16bit(&self) -> bool {
        self.data().is_some_and(SampleData::is_16bit)
    }

    /// Scale `c4_speed` by the MOD finetune (eighths of a semitone).
    pub fn apply_finetune(&mut self) {
        if self.finetune != 0 {
            let factor = libm::powf(2.0, self.finetune as f32 / 96.0);
            self.c4_speed = (self.c4_speed as f32 * factor) as u32;
        }
    }
}

/// PCM payload vs an Adlib instrument descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplePayload {
    /// Native PCM audio
    Native(SampleData),
    /// Adlib/FM patch from an S3M file; kept for round-tripping, never
    /// synthesised
    Adlib(AdlibPatch),
}

/// Raw Adlib operator bytes from an S3M instrument record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdlibPatch {
    pub registers: [u8; 12],
}

/// Sample audio data. Stereo variants are interleaved L,R.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SampleData {
    Mono8(Vec<i8>),
    Mono16(Vec<i16>),
    Stereo8(Vec<i8>),
    Stereo16(Vec<i16>),
}

impl SampleData {
    /// Number of frames (including any guard frames).
    pub fn frames(&self) -> usize {
        match self {
            SampleData::Mono8(v) => v.len(),
            SampleData::Mono16(v) => v.len(),
            SampleData::Stereo8(v) => v.len() / 2,
            SampleData::Stereo16(v) => v.len() / 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn is_stereo(&self) -> bool {
        matches!(self, SampleData::Stereo8(_) | SampleData::Stereo16(_))
    }

    pub fn is_16bit(&self) -> bool {
        matches!(self, SampleData::Mono16(_) | SampleData::Stereo16(_))
    }

    /// Fetch one frame as a 16-bit pair, widening 8-bit data. Returns
    /// silence out of range.
    pub fn frame(&self, pos: usize) -> (i16, i16) {
        match self {
            SampleData::Mono8(v) => {
                let s = v.get(pos).copied().unwrap_or(0) as i16 * 256;
                (s, s)
            }
            SampleData::Mono16(v) => {
                let s = v.get(pos).copied().unwrap_or(0);
                (s, s)
            }
            SampleData::Stereo8(v) => {
                let l = v.get(pos * 2).copied().unwrap_or(0) as i16 * 256;
                let r = v.get(pos * 2 + 1).copied().unwrap_or(0) as i16 * 256;
                (l, r)
            }
            SampleData::Stereo16(v) => {
                let l = v.get(pos * 2).copied().unwrap_or(0);
                let r = v.get(pos * 2 + 1).copied().unwrap_or(0);
                (l, r)
            }
        }
    }
}

/// Sample loop type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopType {
    /// No loop
    #[default]
    None,
    /// Forward loop
    Forward,
    /// Ping-pong (bidirectional) loop
    PingPong,
}

/// Auto-vibrato settings for a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoVibrato {
    /// Vibrato speed
    pub speed: u8,
    /// Vibrato depth
    pub depth: u8,
    /// Sweep (ramp-up rate)
    pub rate: u8,
    /// Waveform type (0=sine, 1=ramp down, 2=square, 3=random)
    pub waveform: u8,
}
