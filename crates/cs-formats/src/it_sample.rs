//! Impulse Tracker packed-sample decompressor (IT 2.14/2.15).
//!
//! Compressed samples are a sequence of blocks (0x8000 samples for
//! 8-bit, 0x4000 for 16-bit). Each block restarts the bit width and the
//! delta accumulators and begins with a 16-bit header that is skipped.
//! Codes are either width changes (three disjoint encodings depending
//! on the current width) or sign-extended deltas. IT 2.15 streams
//! accumulate twice ("delta of delta").

use crate::reader::Reader;
use crate::FormatError;

/// LSB-first bit reader over the module image.
struct BitReader<'r, 'a> {
    reader: &'r mut Reader<'a>,
    buffer: u8,
    remaining: u8,
}

impl<'r, 'a> BitReader<'r, 'a> {
    fn new(reader: &'r mut Reader<'a>) -> Self {
        Self { reader, buffer: 0, remaining: 0 }
    }

    /// Discard any buffered bits (block boundary).
    fn reset(&mut self) {
        self.remaining = 0;
    }

    fn read(&mut self, bits: u8) -> Result<u32, FormatError> {
        let mut value = 0u32;
        for i in 0..bits {
            if self.remaining == 0 {
                self.buffer = self.reader.read_u8().map_err(|_| FormatError::Corrupt)?;
                self.remaining = 8;
            }
            value |= ((self.buffer & 1) as u32) << i;
            self.buffer >>= 1;
            self.remaining -= 1;
        }
        Ok(value)
    }
}

/// Decompress an 8-bit packed sample of `length` frames.
///
/// `delta_mode` selects the IT 2.15 double accumulation.
pub fn unpack_8bit(
    reader: &mut Reader,
    length: usize,
    delta_mode: bool,
) -> Result<Vec<u8>, FormatError> {
    let mut pcm = vec![0u8; length];
    let mut bits = BitReader::new(reader);
    let mut remaining = length;
    let mut base = 0usize;
    let mut block_len = 0usize;
    let mut width: u8 = 9;
    let mut delta: i8 = 0;
    let mut adj_delta: i8 = 0;

    while remaining != 0 {
        if block_len == 0 {
            block_len = 0x8000;
            bits.reset();
            bits.read(16)?;
            width = 9;
            delta = 0;
            adj_delta = 0;
        }
        let run = block_len.min(remaining);
        let mut offs = 0usize;
        while offs < run {
            let value = bits.read(width)? as u16;
            if width < 7 {
                // Narrow widths escape via an all-but-sign-bit pattern
                if value == 1 << (width - 1) {
                    let new = bits.read(3)? as u8 + 1;
                    width = if new < width { new } else { new + 1 };
                    continue;
                }
            } else if width < 9 {
                let top = (0xffu16 >> (9 - width)) + 4;
                let bottom = top - 8;
                if value > bottom && value <= top {
                    let new = (value - bottom) as u8;
                    width = if new < width { new } else { new + 1 };
                    continue;
                }
            } else if width > 9 {
                // Invalid width: consume the slot without emitting
                offs += 1;
                continue;
            } else if value >= 256 {
                width = ((value & 0xff) as u8).wrapping_add(1);
                if width == 0 {
                    // A zero width can never terminate the block
                    return Err(FormatError::Corrupt);
                }
                continue;
            }
            let sample = if width < 8 {
                let shift = 8 - width;
                ((value as u8) << shift) as i8 >> shift
            } else {
                value as u8 as i8
            };
            delta = delta.wrapping_add(sample);
            adj_delta = adj_delta.wrapping_add(delta);
            pcm[base + offs] = if delta_mode { adj_delta as u8 } else { delta as u8 };
            offs += 1;
        }
        base += run;
        remaining -= run;
        block_len -= run;
    }
    Ok(pcm)
}

/// Decompress a 16-bit packed sample of `length` frames.
pub fn unpack_16bit(
    reader: &mut Reader,
    length: usize,
    delta_mode: bool,
) -> Result<Vec<u16>, FormatError> {
    let mut pcm = vec![0u16; length];
    let mut bits = BitReader::new(reader);
    let mut remaining = length;
    let mut base = 0usize;
    let mut block_len = 0usize;
    let mut width: u8 = 17;
    let mut delta: i16 = 0;
    let mut adj_delta: i16 = 0;

    while remaining != 0 {
        if block_len == 0 {
            block_len = 0x4000;
            bits.reset();
            bits.read(16)?;
            width = 17;
            delta = 0;
            adj_delta = 0;
        }
        let run = block_len.min(remaining);
        let mut offs = 0usize;
        while offs < run {
            let value = bits.read(width)?;
            if width < 7 {
                if value == 1 << (width - 1) {
                    let new = bits.read(4)? as u8 + 1;
                    width = if new < width { new } else { new + 1 };
                    continue;
                }
            } else if width < 17 {
                let top = (0xffffu32 >> (17 - width)) + 8;
                let bottom = top - 16;
                if value > bottom && value <= top {
                    let new = (value - bottom) as u8;
                    width = if new < width { new } else { new + 1 };
                    continue;
                }
            } else if width > 17 {
                offs += 1;
                continue;
            } else if value >= 65536 {
                width = ((value & 0xffff) as u8).wrapping_add(1);
                if width == 0 {
                    return Err(FormatError::Corrupt);
                }
                continue;
            }
            let sample = if width < 16 {
                let shift = 16 - width;
                ((value as u16) << shift) as i16 >> shift
            } else {
                value as u16 as i16
            };
            delta = delta.wrapping_add(sample);
            adj_delta = adj_delta.wrapping_add(delta);
            pcm[base + offs] = if delta_mode { adj_delta as u16 } else { delta as u16 };
            offs += 1;
        }
        base += run;
        remaining -= run;
        block_len -= run;
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// LSB-first bit writer mirroring the decoder's read order.
    struct BitWriter {
        bytes: Vec<u8>,
        bit: u8,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { bytes: Vec::new(), bit: 0 }
        }

        fn push(&mut self, value: u32, bits: u8) {
            for i in 0..bits {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                if value >> i & 1 != 0 {
                    let last = self.bytes.len() - 1;
                    self.bytes[last] |= 1 << self.bit;
                }
                self.bit = (self.bit + 1) & 7;
            }
        }
    }

    fn stream_of_unit_deltas(count: usize) -> Vec<u8> {
        let mut writer = BitWriter::new();
        writer.push(0x0200, 16); // block header, skipped
        for _ in 0..count {
            writer.push(1, 9);
        }
        writer.bytes
    }

    #[test]
    fn unit_deltas_accumulate_linearly() {
        let data = stream_of_unit_deltas(16);
        let mut reader = Reader::new(&data);
        let pcm = unpack_8bit(&mut reader, 16, false).unwrap();
        let expected: Vec<u8> = (1..=16).collect();
        assert_eq!(pcm, expected);
    }

    #[test]
    fn unit_deltas_accumulate_triangularly_in_delta_mode() {
        let data = stream_of_unit_deltas(16);
        let mut reader = Reader::new(&data);
        let pcm = unpack_8bit(&mut reader, 16, true).unwrap();
        let expected: Vec<u8> = (1..=16u32).map(|n| (n * (n + 1) / 2) as u8).collect();
        assert_eq!(pcm, expected);
    }

    #[test]
    fn width_change_is_honoured() {
        let mut writer = BitWriter::new();
        writer.push(0, 16);
        // At width 9 a value >= 256 switches width to (value & 0xff) + 1
        writer.push(256 | 3, 9); // new width = 4
        writer.push(1, 4);
        writer.push(1, 4);
        let data = writer.bytes;
        let mut reader = Reader::new(&data);
        let pcm = unpack_8bit(&mut reader, 2, false).unwrap();
        assert_eq!(pcm, vec![1, 2]);
    }

    #[test]
    fn width_escape_to_zero_is_corrupt() {
        // 511 at width 9 encodes new width (255 + 1) & 0xff = 0, which
        // could never terminate; the stream is rejected, not decoded
        let mut writer = BitWriter::new();
        writer.push(0, 16);
        writer.push(511, 9);
        writer.push(1, 9);
        let data = writer.bytes;
        let mut reader = Reader::new(&data);
        assert_eq!(unpack_8bit(&mut reader, 4, false), Err(FormatError::Corrupt));
    }

    #[test]
    fn wide_width_escape_to_zero_is_corrupt() {
        let mut writer = BitWriter::new();
        writer.push(0, 16);
        writer.push(0x1ffff, 17);
        writer.push(1, 17);
        let data = writer.bytes;
        let mut reader = Reader::new(&data);
        assert_eq!(unpack_16bit(&mut reader, 4, false), Err(FormatError::Corrupt));
    }

    #[test]
    fn negative_deltas_sign_extend() {
        let mut writer = BitWriter::new();
        writer.push(0, 16);
        writer.push(256 | 2, 9); // width 3
        writer.push(0b111, 3); // -1 at width 3
        writer.push(0b111, 3);
        let data = writer.bytes;
        let mut reader = Reader::new(&data);
        let pcm = unpack_8bit(&mut reader, 2, false).unwrap();
        assert_eq!(pcm, vec![0xff, 0xfe]); // -1, -2
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let data = stream_of_unit_deltas(4);
        let mut reader = Reader::new(&data);
        assert_eq!(unpack_8bit(&mut reader, 64, false), Err(FormatError::Corrupt));
    }

    #[test]
    fn sixteen_bit_unit_deltas() {
        let mut writer = BitWriter::new();
        writer.push(0, 16);
        for _ in 0..8 {
            writer.push(1, 17);
        }
        let data = writer.bytes;
        let mut reader = Reader::new(&data);
        let pcm = unpack_16bit(&mut reader, 8, false).unwrap();
        let expected: Vec<u16> = (1..=8).collect();
        assert_eq!(pcm, expected);
    }
}
