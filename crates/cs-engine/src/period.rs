//! Period and frequency math.
//!
//! Pitch is tracked in Scream Tracker period units (four times the
//! Amiga Paula value): C-4 at the reference rate is period 1712 and
//! lower periods are higher pitches. Periods are derived from the note
//! and the sample's C-4 speed, and converted back to a playback
//! frequency with the fixed Paula clock product.

/// Base periods for one octave, C through B, in quadrupled Amiga units
/// at octave 4.
const BASE_PERIODS: [u32; 12] = [
    1712, 1616, 1524, 1440, 1356, 1280, 1208, 1140, 1076, 1016, 960, 907,
];

/// Reference rate a sample with `c4_speed` 8363 plays at period 1712.
const PAULA_CLOCK: u64 = 14_317_456; // 8363 * 1712

/// Compute the period for a note (1-120) on a sample with the given
/// C-4 speed. Returns 0 for "no note" or a silent sample rate.
pub fn period_from_note(note: u8, c4_speed: u32) -> u32 {
    if note == 0 || note > 120 || c4_speed == 0 {
        return 0;
    }
    let index = note as u32 - 1;
    let semitone = (index % 12) as usize;
    let octave = index / 12;
    let scaled = (8363u64 << 4) * BASE_PERIODS[semitone] as u64;
    ((scaled >> octave) / c4_speed as u64) as u32
}

/// Convert a period back to a playback frequency in Hz.
pub fn frequency_from_period(period: u32) -> u32 {
    if period == 0 {
        return 0;
    }
    (PAULA_CLOCK / period as u64) as u32
}

/// 16.16 fixed-point mix increment for a period at the given output rate.
pub fn period_to_increment(period: u32, sample_rate: u32) -> u32 {
    if period == 0 || sample_rate == 0 {
        return 0;
    }
    let freq = PAULA_CLOCK / period as u64;
    ((freq << 16) / sample_rate as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_note_period() {
        // C-4 (note 49) at the reference rate
        assert_eq!(period_from_note(49, 8363), 1712);
    }

    #[test]
    fn octave_halves_period() {
        let c4 = period_from_note(49, 8363);
        let c5 = period_from_note(61, 8363);
        assert_eq!(c5, c4 / 2);
    }

    #[test]
    fn c4_speed_scales_inversely() {
        // Doubling the sample rate halves the period for the same note
        let base = period_from_note(49, 8363);
        let double = period_from_note(49, 16726);
        assert!((base / 2).abs_diff(double) <= 1);
    }

    #[test]
    fn frequency_round_trip() {
        assert_eq!(frequency_from_period(1712), 8363);
        assert_eq!(frequency_from_period(856), 16726);
        assert_eq!(frequency_from_period(0), 0);
    }

    #[test]
    fn increment_at_output_rate() {
        // freq 8363 at 44100 → 8363/44100 of a frame per output frame
        let inc = period_to_increment(1712, 44100);
        let expected = ((8363u64 << 16) / 44100) as u32;
        assert_eq!(inc, expected);
    }

    #[test]
    fn no_note_is_silent() {
        assert_eq!(period_from_note(0, 8363), 0);
        assert_eq!(period_from_note(121, 8363), 0);
        assert_eq!(period_to_increment(1712, 0), 0);
    }
}
