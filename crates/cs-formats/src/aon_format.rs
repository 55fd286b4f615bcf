//! Art of Noise (AON) loader.
//!
//! AON modules are chunk-structured with big-endian lengths; the chunk
//! sequence is fixed and every chunk whose length or content breaks its
//! contract aborts the load.

use cs_ir::{Cell, Note, OrderEntry, Pattern, Sample, SampleData, SamplePayload, Song};
use tracing::debug;

use crate::mod_format::GUARD_FRAMES;
use crate::reader::Reader;
use crate::{FormatError, ModuleFormat};

const TEXT_MAGIC: &[u8; 42] = b"artofnoise by bastian spiegel (twice/lego)";

/// Load an AON file from a byte image.
pub fn load_aon(data: &[u8]) -> Result<Song, FormatError> {
    let mut reader = Reader::new(data);
    let magic = reader.read_array::<4>()?;
    let num_channels = match &magic {
        b"AON4" => 4u8,
        b"AON8" => 8u8,
        _ => return Err(FormatError::BadSignature(ModuleFormat::Aon)),
    };
    let text = reader.read_array::<42>()?;
    if &text != TEXT_MAGIC {
        return Err(FormatError::BadSignature(ModuleFormat::Aon));
    }

    let name_len = expect_chunk(&mut reader, b"NAME")?;
    let title = reader.read_string(name_len)?;
    let mut song = Song::with_channels(&title, num_channels);
    song.min_period = 56;
    song.max_period = 7040;

    let author_len = expect_chunk(&mut reader, b"AUTH")?;
    song.author = Some(reader.read_string(author_len)?);

    let date_len = expect_chunk(&mut reader, b"DATE")?;
    reader.skip(date_len)?;

    let remark_len = expect_chunk(&mut reader, b"RMRK")?;
    if remark_len > 0 {
        song.remark = Some(reader.read_string(remark_len)?);
    }

    let info_len = expect_chunk(&mut reader, b"INFO")?;
    if info_len != 4 || reader.read_u8()? != 0x34 {
        return Err(FormatError::InvalidField("INFO chunk"));
    }
    let num_orders = reader.read_u8()? as usize;
    song.restart_pos = reader.read_u8()?;
    let _flags = reader.read_u8()?;

    // Arpeggio table: 16 four-byte rows, row 0 must be all zero
    let arpg_len = expect_chunk(&mut reader, b"ARPG")?;
    if arpg_len != 64 {
        return Err(FormatError::InvalidField("ARPG chunk"));
    }
    let arp_table = reader.read_array::<64>()?;
    if arp_table[..4] != [0, 0, 0, 0] {
        return Err(FormatError::InvalidField("ARPG chunk"));
    }

    let mut plst_len = expect_chunk(&mut reader, b"PLST")?;
    let padded = num_orders & 1 != 0;
    if padded {
        plst_len -= 1;
    }
    if plst_len != num_orders {
        return Err(FormatError::InvalidField("PLST chunk"));
    }
    let order_bytes = reader.read_bytes(num_orders)?.to_vec();
    if padded {
        reader.skip(1)?;
    }

    // Patterns: 1 KiB each for 4 voices, 2 KiB for 8
    let pattern_shift = (num_channels as u32 >> 2) + 9;
    let patt_len = expect_chunk(&mut reader, b"PATT")?;
    if patt_len & ((1 << pattern_shift) - 1) != 0 {
        return Err(FormatError::InvalidField("PATT chunk"));
    }
    let num_patterns = (patt_len >> pattern_shift) as u16;
    for _ in 0..num_patterns {
        song.patterns.push(parse_pattern(&mut reader, num_channels)?);
    }

    song.orders = order_bytes
        .iter()
        .map(|&o| OrderEntry::from_raw(o, num_patterns))
        .collect();

    // Instrument records are 32 bytes each; only the count is retained
    let inst_len = expect_chunk(&mut reader, b"INST")?;
    if inst_len % 32 != 0 {
        return Err(FormatError::InvalidField("INST chunk"));
    }
    reader.skip(inst_len)?;

    let mut tag = reader.read_array::<4>()?;
    let mut len = reader.read_u32_be()? as usize;
    if &tag == b"INAM" {
        reader.skip(len)?;
        tag = reader.read_array::<4>()?;
        len = reader.read_u32_be()? as usize;
    }
    if &tag != b"WLEN" || len != 0x100 {
        return Err(FormatError::InvalidField("WLEN chunk"));
    }
    let mut total = 0usize;
    for i in 0..64 {
        let length = reader.read_u32_be()?;
        let mut sample = Sample::new(&format!("wave {i}"));
        sample.length = length;
        total += length as usize;
        song.samples.push(sample);
    }

    let wave_len = expect_chunk(&mut reader, b"WAVE")?;
    if wave_len != total {
        return Err(FormatError::InvalidField("WAVE chunk"));
    }
    for sample in &mut song.samples {
        let length = sample.length as usize;
        if length == 0 {
            continue;
        }
        let raw = reader.read_bytes(length)?;
        let mut pcm: Vec<i8> = raw.iter().map(|&b| b as i8).collect();
        pcm.extend([0i8; GUARD_FRAMES]);
        sample.payload = SamplePayload::Native(SampleData::Mono8(pcm));
    }

    debug!(title = %song.title, channels = num_channels, patterns = num_patterns, "loaded AON");
    Ok(song)
}

/// Read a chunk header, demanding the expected FourCC.
fn expect_chunk(reader: &mut Reader, fourcc: &[u8; 4]) -> Result<usize, FormatError> {
    let tag = reader.read_array::<4>()?;
    if &tag != fourcc {
        return Err(FormatError::BadSignature(ModuleFormat::Aon));
    }
    Ok(reader.read_u32_be()? as usize)
}

/// Decode one pattern: 64 rows of 4-byte cells per voice.
fn parse_pattern(reader: &mut Reader, num_channels: u8) -> Result<Pattern, FormatError> {
    let mut pattern = Pattern::new(64, num_channels);
    for row in 0..64 {
        for ch in 0..num_channels {
            let bytes = reader.read_array::<4>()?;
            *pattern.cell_mut(row, ch) = parse_cell(bytes);
        }
    }
    Ok(pattern)
}

/// Decode one AON cell: note index, instrument, effect, parameter.
fn parse_cell(data: [u8; 4]) -> Cell {
    let mut cell = Cell::empty();
    if (1..=60).contains(&data[0]) {
        cell.note = Note::On(data[0] + 36);
    }
    cell.sample = data[1];
    // Effects follow the Amiga convention
    cell.effect = super::mod_format::translate_aon_effect(data[2] & 0x0f, data[3]);
    cell
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal well-formed AON image builder for header tests.
    fn build_aon(order_count: usize) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(b"AON4");
        data.extend(TEXT_MAGIC);
        let chunk = |data: &mut Vec<u8>, tag: &[u8; 4], body: &[u8]| {
            data.extend(tag);
            data.extend((body.len() as u32).to_be_bytes());
            data.extend(body);
        };
        chunk(&mut data, b"NAME", b"tiny");
        chunk(&mut data, b"AUTH", b"nobody");
        chunk(&mut data, b"DATE", b"1994");
        chunk(&mut data, b"RMRK", b"");
        chunk(&mut data, b"INFO", &[0x34, order_count as u8, 0, 0]);
        chunk(&mut data, b"ARPG", &[0u8; 64]);
        let mut orders = vec![0u8; order_count];
        if order_count & 1 != 0 {
            orders.push(0);
        }
        chunk(&mut data, b"PLST", &orders);
        chunk(&mut data, b"PATT", &vec![0u8; 1024]);
        chunk(&mut data, b"INST", &[0u8; 32]);
        chunk(&mut data, b"WLEN", &[0u8; 0x100]);
        chunk(&mut data, b"WAVE", &[]);
        data
    }

    #[test]
    fn minimal_module_loads() {
        let data = build_aon(2);
        let song = load_aon(&data).unwrap();
        assert_eq!(song.title, "tiny");
        assert_eq!(song.author.as_deref(), Some("nobody"));
        assert_eq!(song.num_channels(), 4);
        assert_eq!(song.patterns.len(), 1);
        assert_eq!(song.samples.len(), 64);
    }

    #[test]
    fn odd_order_count_reads_fill_byte() {
        let data = build_aon(3);
        let song = load_aon(&data).unwrap();
        assert_eq!(song.orders.len(), 3);
    }

    #[test]
    fn wrong_chunk_order_is_rejected() {
        let mut data = build_aon(2);
        // Corrupt the NAME tag
        let pos = 46;
        data[pos] = b'X';
        assert_eq!(load_aon(&data), Err(FormatError::BadSignature(ModuleFormat::Aon)));
    }

    #[test]
    fn nonzero_first_arpeggio_row_is_rejected() {
        let mut data = build_aon(2);
        // ARPG body starts after NAME(4)+AUTH(6)+DATE(4)+RMRK(0)+INFO(4) chunks
        let pos = data.windows(4).position(|w| w == b"ARPG").unwrap() + 8;
        data[pos] = 1;
        assert_eq!(load_aon(&data), Err(FormatError::InvalidField("ARPG chunk")));
    }
}
