//! Scream Tracker 3 (S3M) loader.

use binrw::{BinRead, BinReaderExt};
use cs_ir::{
    AdlibPatch, Cell, Effect, LoopType, Note, OrderEntry, Pattern, Sample, SampleData,
    SamplePayload, Song, VolumeCommand,
};
use tracing::debug;

use crate::mod_format::GUARD_FRAMES;
use crate::reader::{trim_string, Reader};
use crate::{FormatError, ModuleFormat};

/// Fixed-layout S3M file header (96 bytes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawHeader {
    name: [u8; 28],
    sig: u8,
    kind: u8,
    _reserved: u16,
    num_orders: u16,
    num_samples: u16,
    num_patterns: u16,
    flags: u16,
    created_with: u16,
    format_version: u16,
    magic: [u8; 4],
    global_volume: u8,
    initial_speed: u8,
    initial_tempo: u8,
    master_volume: u8,
    _ultraclick: u8,
    default_pan: u8,
    _reserved2: [u8; 8],
    _special: u16,
    channel_settings: [u8; 32],
}

/// Fixed-layout S3M sample record (80 bytes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    kind: u8,
    _filename: [u8; 12],
    memseg_hi: u8,
    memseg_lo: u16,
    length: u32,
    loop_start: u32,
    loop_end: u32,
    volume: u8,
    _reserved: u8,
    _packing: u8,
    flags: u8,
    c2speed: u32,
    _reserved2: [u8; 12],
    name: [u8; 28],
    magic: [u8; 4],
}

/// Load an S3M file from a byte image.
pub fn load_s3m(data: &[u8]) -> Result<Song, FormatError> {
    let mut reader = Reader::new(data);
    let header: RawHeader = reader.read_le()?;

    if &header.magic != b"SCRM"
        || header.sig != 0x1a
        || header.kind != 16
        || header.format_version == 0
        || header.format_version > 2
    {
        return Err(FormatError::BadSignature(ModuleFormat::S3m));
    }

    // First channel flagged unused determines the playback channel count
    let num_channels = header
        .channel_settings
        .iter()
        .position(|&settings| settings & 0x80 != 0)
        .unwrap_or(32) as u8;
    if num_channels == 0 {
        return Err(FormatError::InvalidField("channel settings"));
    }

    let mut song = Song::with_channels(&trim_string(&header.name), num_channels);
    song.global_volume = header.global_volume;
    song.initial_speed = header.initial_speed;
    song.initial_tempo = header.initial_tempo;
    song.master_volume = header.master_volume;
    song.min_period = 64;
    song.max_period = 32767;
    song.flags.amiga_slides = header.flags & 0x04 != 0;
    song.flags.amiga_limits = header.flags & 0x10 != 0;
    song.flags.fast_slides = header.created_with < 0x1320 && header.flags & 0x40 != 0;

    // L1-L8 pan left of centre, R1-R8 right of centre
    for (channel, &settings) in song.channels.iter_mut().zip(&header.channel_settings) {
        channel.pan = if settings & 0x7f < 8 { 64 } else { 192 };
    }

    let order_bytes = reader.read_bytes(header.num_orders as usize)?.to_vec();
    let mut sample_ptrs = Vec::with_capacity(header.num_samples as usize);
    for _ in 0..header.num_samples {
        sample_ptrs.push(reader.read_u16_le()?);
    }
    let mut pattern_ptrs = Vec::with_capacity(header.num_patterns as usize);
    for _ in 0..header.num_patterns {
        pattern_ptrs.push(reader.read_u16_le()?);
    }

    if header.default_pan == 0xfc {
        for i in 0..32usize {
            let value = reader.read_u8()?;
            if let Some(channel) = song.channels.get_mut(i) {
                if value & 0x20 != 0 {
                    channel.pan = (value & 0x0f) << 4 | (value & 0x0f);
                }
            }
        }
    }

    song.orders = order_bytes
        .iter()
        .map(|&o| OrderEntry::from_raw(o, header.num_patterns))
        .collect();

    for &ptr in &sample_ptrs {
        reader.seek_to((ptr as usize) << 4)?;
        song.samples.push(parse_sample(&mut reader)?);
    }

    for &ptr in &pattern_ptrs {
        if ptr == 0 {
            song.patterns.push(Pattern::new(64, num_channels));
            continue;
        }
        reader.seek_to((ptr as usize) << 4)?;
        song.patterns.push(parse_pattern(&mut reader, num_channels)?);
    }

    load_pcm(&mut reader, &mut song, header.format_version)?;

    debug!(
        title = %song.title,
        channels = num_channels,
        samples = song.samples.len(),
        "loaded S3M"
    );
    Ok(song)
}

/// Parse one sample record; type 1 is PCM, 2+ are Adlib patches.
fn parse_sample(reader: &mut Reader) -> Result<Sample, FormatError> {
    let raw: RawSample = reader.read_le()?;
    let mut sample = Sample::new(&trim_string(&raw.name));
    sample.default_volume = raw.volume.min(64);
    sample.c4_speed = if raw.c2speed == 0 { 8363 } else { raw.c2speed };

    match raw.kind {
        0 => {} // unused slot, header only
        1 => {
            if &raw.magic != b"SCRS" {
                return Err(FormatError::BadSignature(ModuleFormat::S3m));
            }
            sample.length = raw.length;
            if raw.flags & 0x01 != 0 && raw.loop_end > raw.loop_start {
                sample.loop_start = raw.loop_start;
                sample.loop_end = raw.loop_end.min(raw.length);
                sample.loop_type = LoopType::Forward;
            }
            // Stash the parapointer for the PCM pass in the otherwise
            // unused sustain slot
            sample.sustain_start = ((raw.memseg_hi as u32) << 16) | raw.memseg_lo as u32;
            let stereo = raw.flags & 0x02 != 0;
            let wide = raw.flags & 0x04 != 0;
            sample.payload = SamplePayload::Native(match (stereo, wide) {
                (false, false) => SampleData::Mono8(Vec::new()),
                (false, true) => SampleData::Mono16(Vec::new()),
                (true, false) => SampleData::Stereo8(Vec::new()),
                (true, true) => SampleData::Stereo16(Vec::new()),
            });
        }
        _ => {
            if &raw.magic != b"SCRI" {
                return Err(FormatError::BadSignature(ModuleFormat::S3m));
            }
            // The Adlib operator bytes occupy the PCM length/loop fields
            let mut registers = [0u8; 12];
            registers[0..4].copy_from_slice(&raw.length.to_le_bytes());
            registers[4..8].copy_from_slice(&raw.loop_start.to_le_bytes());
            registers[8..12].copy_from_slice(&raw.loop_end.to_le_bytes());
            sample.payload = SamplePayload::Adlib(AdlibPatch { registers });
        }
    }
    Ok(sample)
}

/// Read the PCM payload for every type-1 sample.
fn load_pcm(reader: &mut Reader, song: &mut Song, format_version: u16) -> Result<(), FormatError> {
    for sample in &mut song.samples {
        let SamplePayload::Native(data) = &sample.payload else { continue };
        if sample.length == 0 {
            continue;
        }
        let stereo = data.is_stereo();
        let wide = data.is_16bit();
        let frames = sample.length as usize;
        let byte_len = frames << (wide as usize) << (stereo as usize);

        let pos = (sample.sustain_start as usize) << 4;
        sample.sustain_start = 0;
        reader.seek_to(pos)?;
        let raw = reader.read_bytes(byte_len)?;

        // Format version 2 stores unsigned samples
        let bias = format_version == 2;
        sample.payload = SamplePayload::Native(convert_pcm(raw, wide, stereo, frames, bias));
    }
    Ok(())
}

/// Convert raw sample bytes to signed PCM, deinterleaving stereo halves
/// and appending guard frames.
pub(crate) fn convert_pcm(
    raw: &[u8],
    wide: bool,
    stereo: bool,
    frames: usize,
    unsigned: bool,
) -> SampleData {
    if wide {
        let half = if stereo { frames } else { 0 };
        let mut pcm = Vec::with_capacity((frames + GUARD_FRAMES) << (stereo as usize));
        let word = |index: usize| {
            let value = u16::from_le_bytes([raw[index * 2], raw[index * 2 + 1]]);
            if unsigned { (value ^ 0x8000) as i16 } else { value as i16 }
        };
        for i in 0..frames {
            pcm.push(word(i));
            if stereo {
                pcm.push(word(half + i));
            }
        }
        pcm.extend(core::iter::repeat(0i16).take(GUARD_FRAMES << (stereo as usize)));
        if stereo { SampleData::Stereo16(pcm) } else { SampleData::Mono16(pcm) }
    } else {
        let half = if stereo { frames } else { 0 };
        let byte = |index: usize| {
            if unsigned { (raw[index] ^ 0x80) as i8 } else { raw[index] as i8 }
        };
        let mut pcm = Vec::with_capacity((frames + GUARD_FRAMES) << (stereo as usize));
        for i in 0..frames {
            pcm.push(byte(i));
            if stereo {
                pcm.push(byte(half + i));
            }
        }
        pcm.extend(core::iter::repeat(0i8).take(GUARD_FRAMES << (stereo as usize)));
        if stereo { SampleData::Stereo8(pcm) } else { SampleData::Mono8(pcm) }
    }
}

/// Decode one packed pattern (64 rows).
fn parse_pattern(reader: &mut Reader, num_channels: u8) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(64, num_channels);
    let _packed_len = reader.read_u16_le()?;

    let mut row: u16 = 0;
    while row < 64 {
        let what = reader.read_u8()?;
        if what == 0 {
            row += 1;
            continue;
        }
        let channel = what & 0x1f;
        let mut cell = Cell::empty();
        if what & 0x20 != 0 {
            let note = reader.read_u8()?;
            cell.note = decode_note(note);
            cell.sample = reader.read_u8()?;
        }
        if what & 0x40 != 0 {
            let volume = reader.read_u8()?;
            if volume <= 64 {
                cell.volume = VolumeCommand::Volume(volume);
            }
        }
        if what & 0x80 != 0 {
            let effect = reader.read_u8()?;
            let param = reader.read_u8()?;
            cell.effect = translate_effect(effect, param, false);
        }
        if channel < num_channels {
            *pattern.cell_mut(row, channel) = cell;
        }
    }
    Ok(pattern)
}

/// Decode an S3M note byte (high nibble octave, low nibble semitone).
pub(crate) fn decode_note(value: u8) -> Note {
    match value {
        0xff => Note::None,
        0xfe => Note::Cut,
        _ => {
            let octave = value >> 4;
            let semitone = value & 0x0f;
            if semitone > 11 {
                return Note::None;
            }
            Note::On((octave + 1) * 12 + semitone + 1)
        }
    }
}

/// Translate an S3M/IT letter effect (1 = A) into the shared catalogue.
///
/// The two formats share the same letters; `it_mode` selects the IT
/// interpretations where they differ (full-range panning for `Xxx`).
pub(crate) fn translate_effect(cmd: u8, param: u8, it_mode: bool) -> Effect {
    match cmd {
        1 => Effect::SetSpeed(param),                            // Axx
        2 => Effect::PositionJump(param),                        // Bxx
        3 => Effect::PatternBreak(((param >> 4) * 10 + (param & 0x0f)).min(63)), // Cxx
        4 => Effect::VolumeSlide(param),                         // Dxy
        5 => match param >> 4 {
            0x0f => Effect::FinePortaDown(param & 0x0f),         // EFx
            0x0e => Effect::ExtraFinePortaDown(param & 0x0f),    // EEx
            _ => Effect::PortaDown(param),                       // Exx
        },
        6 => match param >> 4 {
            0x0f => Effect::FinePortaUp(param & 0x0f),           // FFx
            0x0e => Effect::ExtraFinePortaUp(param & 0x0f),      // FEx
            _ => Effect::PortaUp(param),                         // Fxx
        },
        7 => Effect::TonePorta(param),                           // Gxx
        8 => Effect::Vibrato { speed: param >> 4, depth: param & 0x0f }, // Hxy
        9 => Effect::Tremor { on: param >> 4, off: param & 0x0f }, // Ixy
        10 => Effect::Arpeggio { x: param >> 4, y: param & 0x0f }, // Jxy
        11 => Effect::VibratoVolSlide(param),                    // Kxy
        12 => Effect::TonePortaVolSlide(param),                  // Lxy
        13 => Effect::ChannelVolume(param.min(64)),              // Mxx
        14 => Effect::ChannelVolumeSlide(param),                 // Nxy
        15 => Effect::SampleOffset(param),                       // Oxx
        16 => Effect::PanningSlide(param),                       // Pxy
        17 => Effect::Retrigger(param),                          // Qxy
        18 => Effect::Tremolo { speed: param >> 4, depth: param & 0x0f }, // Rxy
        19 => translate_extended(param),                         // Sxy
        20 => Effect::SetTempo(param),                           // Txx
        21 => Effect::FineVibrato { speed: param >> 4, depth: param & 0x0f }, // Uxy
        22 => Effect::GlobalVolume(param.min(128)),              // Vxx
        23 => Effect::GlobalVolumeSlide(param),                  // Wxy
        24 => {
            // Xxx: panning; S3M uses a 0-128 scale, IT the full byte
            if it_mode {
                Effect::SetPanning(param)
            } else {
                Effect::SetPanning(param.saturating_mul(2))
            }
        }
        25 => Effect::Panbrello { speed: param >> 4, depth: param & 0x0f }, // Yxy
        26 if it_mode => {
            // Zxx drives the default filter macro
            if param < 0x80 {
                Effect::SetFilterCutoff(param)
            } else {
                Effect::SetFilterResonance(param & 0x7f)
            }
        }
        _ => Effect::None,
    }
}

/// Translate the Sxy extended family.
fn translate_extended(param: u8) -> Effect {
    let value = param & 0x0f;
    match param >> 4 {
        0x1 => Effect::Glissando(value),
        0x2 => Effect::SetFinetune(if value > 7 { value as i8 - 16 } else { value as i8 }),
        0x3 => Effect::SetVibratoWaveform(value),
        0x4 => Effect::SetTremoloWaveform(value),
        0x5 => Effect::SetPanbrelloWaveform(value),
        0x7 => Effect::SetEnvelopePosition(value),
        0x8 => Effect::SetPanning(value << 4 | value),
        0xa => Effect::SampleOffset(value), // high-offset nibble, rarely used
        0xb => Effect::PatternLoop(value),
        0xc => Effect::NoteCut(value),
        0xd => Effect::NoteDelay(value),
        0xe => Effect::PatternDelay(value),
        _ => Effect::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_decoding() {
        assert_eq!(decode_note(0xff), Note::None);
        assert_eq!(decode_note(0xfe), Note::Cut);
        // Octave 3, C → (3+1)*12 + 0 + 1 = 49
        assert_eq!(decode_note(0x30), Note::On(49));
        assert_eq!(decode_note(0x3c), Note::None); // semitone out of range
    }

    #[test]
    fn fine_porta_split() {
        assert_eq!(translate_effect(6, 0x30, false), Effect::PortaUp(0x30));
        assert_eq!(translate_effect(6, 0xf3, false), Effect::FinePortaUp(3));
        assert_eq!(translate_effect(6, 0xe3, false), Effect::ExtraFinePortaUp(3));
        assert_eq!(translate_effect(5, 0xf4, false), Effect::FinePortaDown(4));
    }

    #[test]
    fn panning_scales_by_mode() {
        assert_eq!(translate_effect(24, 0x40, false), Effect::SetPanning(0x80));
        assert_eq!(translate_effect(24, 0x40, true), Effect::SetPanning(0x40));
    }

    #[test]
    fn unsigned_conversion() {
        let data = convert_pcm(&[0x80, 0x81, 0x7f], false, false, 3, true);
        let SampleData::Mono8(pcm) = data else { panic!("expected mono8") };
        assert_eq!(&pcm[..3], &[0, 1, -1]);
        assert_eq!(pcm.len(), 3 + GUARD_FRAMES);
    }

    #[test]
    fn stereo_deinterleave() {
        // L block then R block in the file → interleaved L,R
        let data = convert_pcm(&[1, 2, 3, 4], false, true, 2, false);
        let SampleData::Stereo8(pcm) = data else { panic!("expected stereo8") };
        assert_eq!(&pcm[..4], &[1, 3, 2, 4]);
    }
}
