//! Scream Tracker 2 (STM) loader.

use cs_ir::{
    Cell, Effect, LoopType, Note, OrderEntry, Pattern, Sample, SampleData, SamplePayload, Song,
    VolumeCommand,
};
use tracing::debug;

use crate::mod_format::GUARD_FRAMES;
use crate::reader::Reader;
use crate::{FormatError, ModuleFormat};

const SAMPLE_RECORDS: usize = 31;
const ORDER_OFFSET: usize = 1040;
const PATTERN_OFFSET: usize = 1168;
const PATTERN_BYTES: usize = 64 * 4 * 4;

/// Load an STM file from a byte image.
pub fn load_stm(data: &[u8]) -> Result<Song, FormatError> {
    let mut reader = Reader::new(data);
    let title = reader.read_string(20)?;
    let magic = reader.read_array::<9>()?;
    let kind = reader.read_u8()?;
    let _version = reader.read_u8()?;
    let initial_speed = reader.read_u8()? >> 4;
    let num_patterns = reader.read_u8()? as u16;
    let global_volume = reader.read_u8()?;
    reader.skip(13)?;

    if &magic != b"!Scream!\x1a" || kind != 2 {
        return Err(FormatError::BadSignature(ModuleFormat::Stm));
    }

    let mut song = Song::with_channels(&title, 4);
    song.initial_speed = if initial_speed == 0 { 6 } else { initial_speed };
    song.global_volume = global_volume.min(64);
    song.min_period = 64;
    song.max_period = 32767;

    for _ in 0..SAMPLE_RECORDS {
        song.samples.push(parse_sample(&mut reader)?);
    }

    reader.seek_to(ORDER_OFFSET)?;
    let order_bytes = reader.read_array::<128>()?;
    // Entries of 99 and up mark the end of the song
    song.orders = order_bytes
        .iter()
        .map(|&o| {
            if o >= 99 {
                OrderEntry::End
            } else {
                OrderEntry::from_raw(o, num_patterns)
            }
        })
        .collect();

    reader.seek_to(PATTERN_OFFSET)?;
    for _ in 0..num_patterns {
        song.patterns.push(parse_pattern(&mut reader)?);
    }

    // PCM follows the patterns, padded to 16-byte paragraphs
    reader.seek_to(PATTERN_OFFSET + num_patterns as usize * PATTERN_BYTES)?;
    for sample in &mut song.samples {
        let length = sample.length as usize;
        if length == 0 {
            continue;
        }
        let raw = reader.read_bytes(length)?;
        let mut pcm: Vec<i8> = raw.iter().map(|&b| b as i8).collect();
        pcm.extend([0i8; GUARD_FRAMES]);
        sample.payload = SamplePayload::Native(SampleData::Mono8(pcm));
        reader.skip(length % 16).ok();
    }

    debug!(title = %song.title, patterns = num_patterns, "loaded STM");
    Ok(song)
}

/// Parse one 32-byte sample record.
fn parse_sample(reader: &mut Reader) -> Result<Sample, FormatError> {
    let name = reader.read_string(12)?;
    let _zero = reader.read_u8()?;
    let _disk = reader.read_u8()?;
    let _reserved = reader.read_u16_le()?;
    let length = reader.read_u16_le()? as u32;
    let loop_start = reader.read_u16_le()? as u32;
    let loop_end = reader.read_u16_le()? as u32;
    let volume = reader.read_u8()?;
    let _reserved = reader.read_u8()?;
    let c2speed = reader.read_u16_le()? as u32;
    reader.skip(6)?;

    let mut sample = Sample::new(&name);
    sample.length = length;
    sample.default_volume = volume.min(64);
    sample.c4_speed = if c2speed == 0 { 8448 } else { c2speed };
    // 0xffff marks "no loop"
    if loop_end != 0xffff && loop_end > loop_start {
        sample.loop_start = loop_start;
        sample.loop_end = loop_end.min(length);
        sample.loop_type = LoopType::Forward;
    }
    Ok(sample)
}

/// Parse one 64-row, 4-channel pattern.
fn parse_pattern(reader: &mut Reader) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(64, 4);
    for row in 0..64 {
        for ch in 0..4 {
            let bytes = reader.read_array::<4>()?;
            *pattern.cell_mut(row, ch) = parse_cell(bytes);
        }
    }
    Ok(pattern)
}

/// Decode one STM cell.
///
/// Byte 0: note; byte 1: instrument in bits 3-7, volume bits 0-2;
/// byte 2: volume bits 3-6 in the high nibble, command in the low
/// nibble; byte 3: command parameter.
fn parse_cell(data: [u8; 4]) -> Cell {
    let mut cell = Cell::empty();
    cell.note = match data[0] {
        0xff | 0xfb => Note::None,
        0xfe | 0xfc => Note::Cut,
        value => crate::s3m_format::decode_note(value),
    };
    cell.sample = data[1] >> 3;
    let volume = (data[1] & 0x07) | (data[2] >> 4) << 3;
    if volume <= 64 {
        cell.volume = VolumeCommand::Volume(volume);
    }
    cell.effect = translate_effect(data[2] & 0x0f, data[3]);
    cell
}

/// Translate an STM command (1 = A) into the shared catalogue.
fn translate_effect(cmd: u8, param: u8) -> Effect {
    match cmd {
        1 => Effect::SetSpeed(param >> 4),
        2 => Effect::PositionJump(param),
        3 => Effect::PatternBreak(((param >> 4) * 10 + (param & 0x0f)).min(63)),
        4 => Effect::VolumeSlide(param),
        5 => Effect::PortaDown(param),
        6 => Effect::PortaUp(param),
        7 => Effect::TonePorta(param),
        8 => Effect::Vibrato { speed: param >> 4, depth: param & 0x0f },
        9 => Effect::Tremor { on: param >> 4, off: param & 0x0f },
        10 => Effect::Arpeggio { x: param >> 4, y: param & 0x0f },
        _ => Effect::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_volume_is_split_across_bytes() {
        // volume 0b0101_010 = 42: low 3 bits in byte1, high 4 in byte2
        let cell = parse_cell([0x30, (3 << 3) | 0b010, 0b0101 << 4, 0]);
        assert_eq!(cell.sample, 3);
        assert_eq!(cell.volume, VolumeCommand::Volume(42));
    }

    #[test]
    fn speed_uses_high_nibble() {
        assert_eq!(translate_effect(1, 0x60), Effect::SetSpeed(6));
    }
}
