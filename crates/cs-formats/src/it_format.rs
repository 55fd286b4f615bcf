//! Impulse Tracker (IT) loader.

use binrw::{BinRead, BinReaderExt};
use cs_ir::{
    AutoVibrato, Cell, DuplicateAction, DuplicateCheck, Envelope, Instrument, LoopType,
    NewNoteAction, Note, NoteMapEntry, OrderEntry, Pattern, Sample, SampleData, SamplePayload,
    Song, VolumeCommand, MAX_ENVELOPE_NODES,
};
use tracing::debug;

use crate::it_sample::{unpack_16bit, unpack_8bit};
use crate::mod_format::GUARD_FRAMES;
use crate::reader::{trim_string, Reader};
use crate::s3m_format::translate_effect;
use crate::{FormatError, ModuleFormat};

/// Fixed-layout IT file header (192 bytes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawHeader {
    magic: [u8; 4],
    song_name: [u8; 26],
    _highlight: u16,
    num_orders: u16,
    num_instruments: u16,
    num_samples: u16,
    num_patterns: u16,
    _created_with: u16,
    compatible_with: u16,
    flags: u16,
    special: u16,
    global_volume: u8,
    master_volume: u8,
    initial_speed: u8,
    initial_tempo: u8,
    separation: u8,
    _pitch_wheel_depth: u8,
    message_length: u16,
    message_offset: u32,
    _reserved: u32,
    channel_pan: [u8; 64],
    channel_volume: [u8; 64],
}

/// Fixed-layout IT sample record (80 bytes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawSample {
    magic: [u8; 4],
    _filename: [u8; 12],
    _zero: u8,
    global_volume: u8,
    flags: u8,
    volume: u8,
    name: [u8; 26],
    convert: u8,
    default_pan: u8,
    length: u32,
    loop_start: u32,
    loop_end: u32,
    c5_speed: u32,
    sustain_start: u32,
    sustain_end: u32,
    sample_pointer: u32,
    vibrato_speed: u8,
    vibrato_depth: u8,
    vibrato_rate: u8,
    vibrato_type: u8,
}

/// IT 2.x instrument record head (everything before the envelopes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawInstrument {
    magic: [u8; 4],
    _filename: [u8; 12],
    _zero: u8,
    new_note_action: u8,
    duplicate_check: u8,
    duplicate_action: u8,
    fadeout: u16,
    pitch_pan_separation: i8,
    pitch_pan_centre: u8,
    global_volume: u8,
    default_pan: u8,
    _random_volume: u8,
    _random_pan: u8,
    _tracker_version: u16,
    _num_samples: u8,
    _reserved: u8,
    name: [u8; 26],
    _filter_cutoff: u8,
    _filter_resonance: u8,
    _midi_channel: u8,
    _midi_program: u8,
    _midi_bank: u16,
    note_map: [[u8; 2]; 120],
}

/// Pre-2.0 instrument record.
#[derive(BinRead, Debug)]
#[br(little)]
struct RawOldInstrument {
    magic: [u8; 4],
    _filename: [u8; 12],
    _zero: u8,
    flags: u8,
    loop_start: u8,
    loop_end: u8,
    sustain_start: u8,
    sustain_end: u8,
    _reserved: u16,
    fadeout: u16,
    new_note_action: u8,
    _duplicate_note_check: u8,
    _tracker_version: u16,
    _num_samples: u8,
    _reserved2: u8,
    name: [u8; 26],
    _reserved3: [u8; 6],
    note_map: [[u8; 2]; 120],
    _envelope_table: [u8; 200],
    node_pairs: [[u8; 2]; 25],
}

/// One envelope record inside an IT 2.x instrument (82 bytes).
#[derive(BinRead, Debug)]
#[br(little)]
struct RawEnvelope {
    flags: u8,
    num_nodes: u8,
    loop_start: u8,
    loop_end: u8,
    sustain_start: u8,
    sustain_end: u8,
    nodes: [RawNode; 25],
    _trailing: u8,
}

#[derive(BinRead, Debug, Clone, Copy)]
#[br(little)]
struct RawNode {
    value: i8,
    tick: u16,
}

/// Load an IT file from a byte image.
pub fn load_it(data: &[u8]) -> Result<Song, FormatError> {
    let mut reader = Reader::new(data);
    let header: RawHeader = reader.read_le()?;
    if &header.magic != b"IMPM" {
        return Err(FormatError::BadSignature(ModuleFormat::It));
    }

    // The first pan byte past 128 marks the end of the used channels
    let mut num_channels = header
        .channel_pan
        .iter()
        .position(|&pan| pan > 128)
        .unwrap_or(64) as u8;
    num_channels = num_channels.max(4);

    let mut song = Song::with_channels(&trim_string(&header.song_name), num_channels);
    song.global_volume = header.global_volume.min(128);
    song.master_volume = header.master_volume;
    song.initial_speed = header.initial_speed.max(1);
    song.initial_tempo = header.initial_tempo.max(32);
    song.separation = header.separation;
    song.min_period = 8;
    song.max_period = 61440;
    song.flags.instrument_mode = header.flags & 0x04 != 0;
    song.flags.amiga_slides = header.flags & 0x08 == 0;
    song.flags.old_effects = header.flags & 0x10 != 0;

    for (i, channel) in song.channels.iter_mut().enumerate() {
        let pan = header.channel_pan[i];
        channel.pan = match pan & 0x7f {
            100 => 128,
            value => (value.min(64) as u16 * 4).min(255) as u8,
        };
        channel.muted = pan > 128;
        channel.volume = header.channel_volume[i].min(64);
    }

    let order_bytes = reader.read_bytes(header.num_orders as usize)?.to_vec();
    let mut instrument_ptrs = Vec::with_capacity(header.num_instruments as usize);
    for _ in 0..header.num_instruments {
        instrument_ptrs.push(reader.read_u32_le()?);
    }
    let mut sample_ptrs = Vec::with_capacity(header.num_samples as usize);
    for _ in 0..header.num_samples {
        sample_ptrs.push(reader.read_u32_le()?);
    }
    let mut pattern_ptrs = Vec::with_capacity(header.num_patterns as usize);
    for _ in 0..header.num_patterns {
        pattern_ptrs.push(reader.read_u32_le()?);
    }

    song.orders = order_bytes
        .iter()
        .map(|&o| OrderEntry::from_raw(o, header.num_patterns))
        .collect();

    if song.flags.instrument_mode {
        for &ptr in &instrument_ptrs {
            reader.seek_to(ptr as usize)?;
            let instrument = if header.compatible_with < 0x200 {
                parse_old_instrument(&mut reader)?
            } else {
                parse_instrument(&mut reader)?
            };
            song.instruments.push(instrument);
        }
    }

    for &ptr in &sample_ptrs {
        reader.seek_to(ptr as usize)?;
        song.samples.push(parse_sample(&mut reader)?);
    }

    for &ptr in &pattern_ptrs {
        if ptr == 0 {
            song.patterns.push(Pattern::new(64, num_channels));
            continue;
        }
        reader.seek_to(ptr as usize)?;
        song.patterns.push(parse_pattern(&mut reader, num_channels)?);
    }

    load_pcm(&mut reader, &mut song, &sample_ptrs, header.compatible_with)?;

    // The song message is carried for info purposes only
    if header.special & 0x01 != 0 && header.message_offset != 0 && header.message_length > 0 {
        reader.seek_to(header.message_offset as usize)?;
        let message = reader.read_string(header.message_length as usize)?;
        song.remark = Some(message.replace('\r', "\n"));
    }

    debug!(
        title = %song.title,
        channels = num_channels,
        instruments = song.instruments.len(),
        samples = song.samples.len(),
        "loaded IT"
    );
    Ok(song)
}

fn parse_envelope(raw: &RawEnvelope) -> Result<Envelope, FormatError> {
    if raw.num_nodes as usize > MAX_ENVELOPE_NODES {
        return Err(FormatError::InvalidField("envelope node count"));
    }
    let mut envelope = Envelope {
        flags: raw.flags,
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        sustain_start: raw.sustain_start,
        sustain_end: raw.sustain_end,
        ..Envelope::default()
    };
    for node in &raw.nodes[..raw.num_nodes as usize] {
        envelope.add_node(node.tick, node.value);
    }
    Ok(envelope)
}

fn parse_instrument(reader: &mut Reader) -> Result<Instrument, FormatError> {
    let raw: RawInstrument = reader.read_le()?;
    if &raw.magic != b"IMPI" {
        return Err(FormatError::BadSignature(ModuleFormat::It));
    }
    if raw.new_note_action > 3 {
        return Err(FormatError::InvalidField("new-note action"));
    }
    let volume_envelope: RawEnvelope = reader.read_le()?;
    let panning_envelope: RawEnvelope = reader.read_le()?;
    let pitch_envelope: RawEnvelope = reader.read_le()?;

    let mut instrument = Instrument::new(&trim_string(&raw.name));
    instrument.new_note_action = NewNoteAction::from_raw(raw.new_note_action);
    instrument.duplicate_check = DuplicateCheck::from_raw(raw.duplicate_check);
    instrument.duplicate_action = DuplicateAction::from_raw(raw.duplicate_action);
    instrument.fadeout = raw.fadeout;
    instrument.pitch_pan_separation = raw.pitch_pan_separation;
    instrument.pitch_pan_centre = raw.pitch_pan_centre;
    instrument.global_volume = raw.global_volume.min(128);
    if raw.default_pan & 0x80 == 0 {
        instrument.default_pan = Some(((raw.default_pan & 0x7f).min(64) as u16 * 4).min(255) as u8);
    }
    for (entry, raw_entry) in instrument.note_map.iter_mut().zip(&raw.note_map) {
        *entry = NoteMapEntry { note: raw_entry[0].min(119) + 1, sample: raw_entry[1] };
    }
    instrument.volume_envelope = parse_envelope(&volume_envelope)?;
    instrument.panning_envelope = parse_envelope(&panning_envelope)?;
    instrument.pitch_envelope = parse_envelope(&pitch_envelope)?;
    Ok(instrument)
}

fn parse_old_instrument(reader: &mut Reader) -> Result<Instrument, FormatError> {
    let raw: RawOldInstrument = reader.read_le()?;
    if &raw.magic != b"IMPI" {
        return Err(FormatError::BadSignature(ModuleFormat::It));
    }
    if raw.new_note_action > 3 {
        return Err(FormatError::InvalidField("new-note action"));
    }
    let mut instrument = Instrument::new(&trim_string(&raw.name));
    instrument.new_note_action = NewNoteAction::from_raw(raw.new_note_action);
    // Old fade-outs are on a 0-64 scale
    instrument.fadeout = raw.fadeout << 6;
    for (entry, raw_entry) in instrument.note_map.iter_mut().zip(&raw.note_map) {
        *entry = NoteMapEntry { note: raw_entry[0].min(119) + 1, sample: raw_entry[1] };
    }
    let mut envelope = Envelope {
        flags: raw.flags & 0x07,
        loop_start: raw.loop_start,
        loop_end: raw.loop_end,
        sustain_start: raw.sustain_start,
        sustain_end: raw.sustain_end,
        ..Envelope::default()
    };
    for pair in &raw.node_pairs {
        if pair[0] == 0xff {
            break;
        }
        envelope.add_node(pair[0] as u16, pair[1] as i8);
    }
    instrument.volume_envelope = envelope;
    Ok(instrument)
}

fn parse_sample(reader: &mut Reader) -> Result<Sample, FormatError> {
    let raw: RawSample = reader.read_le()?;
    if &raw.magic != b"IMPS" {
        return Err(FormatError::BadSignature(ModuleFormat::It));
    }
    let mut sample = Sample::new(&trim_string(&raw.name));
    sample.length = raw.length;
    sample.global_volume = raw.global_volume.min(64);
    sample.default_volume = raw.volume.min(64);
    sample.c4_speed = if raw.c5_speed == 0 { 8363 } else { raw.c5_speed };
    if raw.default_pan & 0x80 != 0 {
        sample.default_pan = Some(((raw.default_pan & 0x7f).min(64) as u16 * 4).min(255) as u8);
    }
    if raw.flags & 0x10 != 0 && raw.loop_end > raw.loop_start {
        sample.loop_start = raw.loop_start;
        sample.loop_end = raw.loop_end.min(raw.length);
        sample.loop_type =
            if raw.flags & 0x40 != 0 { LoopType::PingPong } else { LoopType::Forward };
    }
    if raw.flags & 0x20 != 0 && raw.sustain_end > raw.sustain_start {
        sample.sustain_start = raw.sustain_start;
        sample.sustain_end = raw.sustain_end.min(raw.length);
        sample.sustain_loop = true;
    }
    if raw.vibrato_depth != 0 {
        sample.vibrato = Some(AutoVibrato {
            speed: raw.vibrato_speed,
            depth: raw.vibrato_depth,
            rate: raw.vibrato_rate,
            waveform: raw.vibrato_type & 0x03,
        });
    }
    Ok(sample)
}

/// Second pass: pull each sample's PCM through the raw or compressed path.
fn load_pcm(
    reader: &mut Reader,
    song: &mut Song,
    sample_ptrs: &[u32],
    compatible_with: u16,
) -> Result<(), FormatError> {
    for (index, sample) in song.samples.iter_mut().enumerate() {
        // Re-read the record flags this pass needs
        reader.seek_to(sample_ptrs[index] as usize)?;
        let raw: RawSample = reader.read_le()?;
        let has_data = raw.flags & 0x01 != 0;
        if !has_data || raw.length == 0 {
            sample.length = 0;
            continue;
        }
        let wide = raw.flags & 0x02 != 0;
        let stereo = raw.flags & 0x04 != 0;
        let compressed = raw.flags & 0x08 != 0;
        let unsigned = raw.convert & 0x01 == 0;
        let delta_mode = raw.convert & 0x04 != 0 && compatible_with >= 0x215;
        let frames = raw.length as usize;

        reader.seek_to(raw.sample_pointer as usize)?;
        let data = if compressed {
            if wide {
                let mut left = unpack_16bit(reader, frames, delta_mode)?;
                if stereo {
                    let right = unpack_16bit(reader, frames, delta_mode)?;
                    left.extend(right);
                }
                wide_to_sample_data(&left, stereo, frames, unsigned)
            } else {
                let mut left = unpack_8bit(reader, frames, delta_mode)?;
                if stereo {
                    let right = unpack_8bit(reader, frames, delta_mode)?;
                    left.extend(right);
                }
                narrow_to_sample_data(&left, stereo, frames, unsigned)
            }
        } else {
            let byte_len = frames << (wide as usize) << (stereo as usize);
            let raw_bytes = reader.read_bytes(byte_len)?;
            crate::s3m_format::convert_pcm(raw_bytes, wide, stereo, frames, unsigned)
        };
        sample.payload = SamplePayload::Native(data);
    }
    Ok(())
}

/// Assemble decompressed 8-bit halves into interleaved signed PCM.
fn narrow_to_sample_data(raw: &[u8], stereo: bool, frames: usize, unsigned: bool) -> SampleData {
    let half = if stereo { frames } else { 0 };
    let convert = |b: u8| if unsigned { (b ^ 0x80) as i8 } else { b as i8 };
    let mut pcm = Vec::with_capacity((frames + GUARD_FRAMES) << (stereo as usize));
    for i in 0..frames {
        pcm.push(convert(raw[i]));
        if stereo {
            pcm.push(convert(raw[half + i]));
        }
    }
    pcm.extend(core::iter::repeat(0i8).take(GUARD_FRAMES << (stereo as usize)));
    if stereo { SampleData::Stereo8(pcm) } else { SampleData::Mono8(pcm) }
}

/// Assemble decompressed 16-bit halves into interleaved signed PCM.
fn wide_to_sample_data(raw: &[u16], stereo: bool, frames: usize, unsigned: bool) -> SampleData {
    let half = if stereo { frames } else { 0 };
    let convert = |w: u16| if unsigned { (w ^ 0x8000) as i16 } else { w as i16 };
    let mut pcm = Vec::with_capacity((frames + GUARD_FRAMES) << (stereo as usize));
    for i in 0..frames {
        pcm.push(convert(raw[i]));
        if stereo {
            pcm.push(convert(raw[half + i]));
        }
    }
    pcm.extend(core::iter::repeat(0i16).take(GUARD_FRAMES << (stereo as usize)));
    if stereo { SampleData::Stereo16(pcm) } else { SampleData::Mono16(pcm) }
}

/// Decode an IT note byte.
fn decode_note(value: u8) -> Note {
    match value {
        255 => Note::Off,
        254 => Note::Cut,
        0..=119 => Note::On(value + 1),
        _ => Note::Fade,
    }
}

/// Decode the IT volume column by value range.
fn decode_volume(value: u8) -> VolumeCommand {
    match value {
        0..=64 => VolumeCommand::Volume(value),
        65..=74 => VolumeCommand::FineVolUp(value - 65),
        75..=84 => VolumeCommand::FineVolDown(value - 75),
        85..=94 => VolumeCommand::VolSlideUp(value - 85),
        95..=104 => VolumeCommand::VolSlideDown(value - 95),
        105..=114 => VolumeCommand::PortaDown(value - 105),
        115..=124 => VolumeCommand::PortaUp(value - 115),
        128..=192 => VolumeCommand::Panning(value - 128),
        193..=202 => VolumeCommand::TonePorta(value - 193),
        203..=212 => VolumeCommand::Vibrato(value - 203),
        _ => VolumeCommand::None,
    }
}

/// Decode one packed IT pattern.
///
/// Each channel keeps a last-value record for the duration of the
/// pattern; mask bits 16/32/64/128 replay those instead of carrying a
/// payload.
fn parse_pattern(reader: &mut Reader, num_channels: u8) -> Result<Pattern, FormatError> {
    let _packed_len = reader.read_u16_le()?;
    let rows = reader.read_u16_le()?;
    if rows == 0 || rows > 200 {
        return Err(FormatError::InvalidField("pattern row count"));
    }
    reader.skip(4)?;

    let mut pattern = Pattern::new(rows, num_channels);
    let mut last_mask = [0u8; 64];
    let mut last_note = [0u8; 64];
    let mut last_sample = [0u8; 64];
    let mut last_volume = [0u8; 64];
    let mut last_effect = [(0u8, 0u8); 64];

    let mut row: u16 = 0;
    while row < rows {
        let var = reader.read_u8()?;
        if var == 0 {
            row += 1;
            continue;
        }
        let channel = ((var - 1) & 63) as usize;
        if var & 0x80 != 0 {
            last_mask[channel] = reader.read_u8()?;
        }
        let mask = last_mask[channel];
        let mut cell = Cell::empty();
        if mask & 0x01 != 0 {
            let note = reader.read_u8()?;
            last_note[channel] = note;
            cell.note = decode_note(note);
        }
        if mask & 0x10 != 0 {
            cell.note = decode_note(last_note[channel]);
        }
        if mask & 0x02 != 0 {
            let sample = reader.read_u8()?;
            last_sample[channel] = sample;
            cell.sample = sample;
        }
        if mask & 0x20 != 0 {
            cell.sample = last_sample[channel];
        }
        if mask & 0x04 != 0 {
            let volume = reader.read_u8()?;
            last_volume[channel] = volume;
            cell.volume = decode_volume(volume);
        }
        if mask & 0x40 != 0 {
            cell.volume = decode_volume(last_volume[channel]);
        }
        if mask & 0x08 != 0 {
            let effect = reader.read_u8()?;
            let param = reader.read_u8()?;
            last_effect[channel] = (effect, param);
            cell.effect = translate_effect(effect, param, true);
        }
        if mask & 0x80 != 0 {
            let (effect, param) = last_effect[channel];
            cell.effect = translate_effect(effect, param, true);
        }
        if (channel as u8) < num_channels {
            *pattern.cell_mut(row, channel as u8) = cell;
        }
    }
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_byte_ranges() {
        assert_eq!(decode_note(0), Note::On(1));
        assert_eq!(decode_note(119), Note::On(120));
        assert_eq!(decode_note(254), Note::Cut);
        assert_eq!(decode_note(255), Note::Off);
        assert_eq!(decode_note(180), Note::Fade);
    }

    #[test]
    fn volume_column_ranges() {
        assert_eq!(decode_volume(32), VolumeCommand::Volume(32));
        assert_eq!(decode_volume(68), VolumeCommand::FineVolUp(3));
        assert_eq!(decode_volume(80), VolumeCommand::FineVolDown(5));
        assert_eq!(decode_volume(85), VolumeCommand::VolSlideUp(0));
        assert_eq!(decode_volume(104), VolumeCommand::VolSlideDown(9));
        assert_eq!(decode_volume(110), VolumeCommand::PortaDown(5));
        assert_eq!(decode_volume(120), VolumeCommand::PortaUp(5));
        assert_eq!(decode_volume(160), VolumeCommand::Panning(32));
        assert_eq!(decode_volume(196), VolumeCommand::TonePorta(3));
        assert_eq!(decode_volume(210), VolumeCommand::Vibrato(7));
        assert_eq!(decode_volume(125), VolumeCommand::None);
    }
}
