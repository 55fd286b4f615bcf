//! The sample mixer: renders active voices between tick boundaries.
//!
//! Each voice selects a mix kernel monomorphised over interpolation
//! quality, volume ramping and filter state; sample depth and channel
//! layout are resolved by the PCM view. Kernels accumulate into a
//! 32-bit scratch buffer which is DC-corrected and saturated to
//! 16-bit output.

use cs_ir::{LoopType, SampleData};

use crate::channel::{ChannelState, FilterState};
use crate::player::{Interpolation, Player};
use crate::tables::FAST_SINC;

/// Frames mixed per inner block.
pub const MIX_BLOCK: usize = 512;

/// Borrowed PCM payload, normalised to 16-bit on fetch.
#[derive(Clone, Copy)]
enum PcmView<'a> {
    Mono8(&'a [i8]),
    Mono16(&'a [i16]),
    Stereo8(&'a [i8]),
    Stereo16(&'a [i16]),
}

impl<'a> PcmView<'a> {
    fn new(data: &'a SampleData) -> Self {
        match data {
            SampleData::Mono8(v) => PcmView::Mono8(v),
            SampleData::Mono16(v) => PcmView::Mono16(v),
            SampleData::Stereo8(v) => PcmView::Stereo8(v),
            SampleData::Stereo16(v) => PcmView::Stereo16(v),
        }
    }

    fn is_stereo(&self) -> bool {
        matches!(self, PcmView::Stereo8(_) | PcmView::Stereo16(_))
    }

    /// Fetch one frame; out-of-range positions read as silence.
    #[inline]
    fn frame(&self, pos: usize) -> (i32, i32) {
        match self {
            PcmView::Mono8(v) => {
                let s = v.get(pos).map_or(0, |&b| b as i32) << 8;
                (s, s)
            }
            PcmView::Mono16(v) => {
                let s = v.get(pos).map_or(0, |&w| w as i32);
                (s, s)
            }
            PcmView::Stereo8(v) => {
                let l = v.get(pos * 2).map_or(0, |&b| b as i32) << 8;
                let r = v.get(pos * 2 + 1).map_or(0, |&b| b as i32) << 8;
                (l, r)
            }
            PcmView::Stereo16(v) => {
                let l = v.get(pos * 2).map_or(0, |&w| w as i32);
                let r = v.get(pos * 2 + 1).map_or(0, |&w| w as i32);
                (l, r)
            }
        }
    }
}

/// Compute the resonant filter coefficients from the stored cutoff and
/// resonance, on the 13-bit fixed-point scale the kernels use.
pub fn setup_filter(filter: &mut FilterState, sample_rate: u32) {
    let cutoff_hz = 110.0 * libm::powf(2.0, 0.25 + filter.cutoff as f32 / 16.0);
    let cutoff_hz = cutoff_hz.min(sample_rate as f32 * 0.45).min(20000.0);
    let q = 0.707 + filter.resonance as f32 / 20.0;
    let omega = 2.0 * core::f32::consts::PI * cutoff_hz / sample_rate as f32;
    let rho = (1.0 - omega / (2.0 * q)).clamp(0.0, 0.999);
    let b0 = 2.0 * rho * libm::cosf(omega);
    let b1 = -rho * rho;
    let a0 = 1.0 - b0 - b1;
    filter.a0 = (a0 * 8192.0) as i32;
    filter.b0 = (b0 * 8192.0) as i32;
    filter.b1 = (b1 * 8192.0) as i32;
}

/// One voice's contribution to an interleaved L,R block.
fn mix_voice(chan: &mut ChannelState, data: &SampleData, interp: Interpolation, out: &mut [i32]) {
    let view = PcmView::new(data);
    // The filter carries a single history pair, so it only runs over
    // mono payloads
    let filter = chan.filter.enabled && !view.is_stereo();
    let ramp = chan.ramp_remaining > 0;
    let interp = match interp {
        Interpolation::None => 0u8,
        Interpolation::Linear => 1,
        Interpolation::Sinc => 2,
    };
    match (interp, ramp, filter) {
        (0, false, false) => kernel::<0, false, false>(chan, view, out),
        (0, false, true) => kernel::<0, false, true>(chan, view, out),
        (0, true, false) => kernel::<0, true, false>(chan, view, out),
        (0, true, true) => kernel::<0, true, true>(chan, view, out),
        (1, false, false) => kernel::<1, false, false>(chan, view, out),
        (1, false, true) => kernel::<1, false, true>(chan, view, out),
        (1, true, false) => kernel::<1, true, false>(chan, view, out),
        (1, true, true) => kernel::<1, true, true>(chan, view, out),
        (_, false, false) => kernel::<2, false, false>(chan, view, out),
        (_, false, true) => kernel::<2, false, true>(chan, view, out),
        (_, true, false) => kernel::<2, true, false>(chan, view, out),
        (_, true, true) => kernel::<2, true, true>(chan, view, out),
    }
}

/// The mix loop proper: advance the 16.16 cursor, interpolate, apply
/// the filter and volume, accumulate, handle loop wrap or voice death.
fn kernel<const INTERP: u8, const RAMP: bool, const FILTER: bool>(
    chan: &mut ChannelState,
    view: PcmView,
    out: &mut [i32],
) {
    let mut pos = ((chan.pos as u64) << 16) | chan.pos_lo as u64;
    let increment = chan.increment as u64;
    let loop_start = (chan.loop_start as u64) << 16;
    let end_frame = if chan.loop_type != LoopType::None {
        chan.loop_end.min(chan.length)
    } else {
        chan.length
    };
    let end = (end_frame as u64) << 16;
    if increment == 0 || end == 0 {
        return;
    }

    let mut left_vol = chan.left_vol;
    let mut right_vol = chan.right_vol;
    let mut fy1 = chan.filter.y1;
    let mut fy2 = chan.filter.y2;

    for frame in out.chunks_exact_mut(2) {
        let index = (pos >> 16) as usize;
        let frac = (pos & 0xffff) as u32;

        let (mut left, mut right) = match INTERP {
            0 => view.frame(index),
            1 => {
                let (a_l, a_r) = view.frame(index);
                let (b_l, b_r) = view.frame(index + 1);
                (
                    a_l + (((b_l - a_l) * frac as i32) >> 16),
                    a_r + (((b_r - a_r) * frac as i32) >> 16),
                )
            }
            _ => {
                let phase = ((frac >> 8) as usize) * 4;
                let taps = &FAST_SINC[phase..phase + 4];
                let p0 = view.frame(index.wrapping_sub(1));
                let p1 = view.frame(index);
                let p2 = view.frame(index + 1);
                let p3 = view.frame(index + 2);
                (
                    (taps[0] as i32 * p0.0
                        + taps[1] as i32 * p1.0
                        + taps[2] as i32 * p2.0
                        + taps[3] as i32 * p3.0)
                        >> 14,
                    (taps[0] as i32 * p0.1
                        + taps[1] as i32 * p1.1
                        + taps[2] as i32 * p2.1
                        + taps[3] as i32 * p3.1)
                        >> 14,
                )
            }
        };

        if FILTER {
            let x = left;
            let fy = (x * chan.filter.a0 + fy1 * chan.filter.b0 + fy2 * chan.filter.b1 + 4096)
                >> 13;
            fy2 = fy1;
            fy1 = fy - (x & chan.filter.high_pass);
            left = fy;
            right = fy;
        }

        frame[0] += (left * ((left_vol >> 16) as i32)) >> 6;
        frame[1] += (right * ((right_vol >> 16) as i32)) >> 6;

        if RAMP {
            if chan.ramp_remaining > 0 {
                left_vol += chan.left_ramp;
                right_vol += chan.right_ramp;
                chan.ramp_remaining -= 1;
                if chan.ramp_remaining == 0 {
                    left_vol = chan.target_left;
                    right_vol = chan.target_right;
                }
            }
        }

        // Advance and wrap
        if chan.reverse {
            if pos < loop_start + increment {
                let overshoot = (loop_start + increment) - pos;
                pos = loop_start + overshoot;
                chan.reverse = false;
            } else {
                pos -= increment;
            }
        } else {
            pos += increment;
            if pos >= end {
                match chan.loop_type {
                    LoopType::None => {
                        chan.playing = false;
                        break;
                    }
                    LoopType::Forward => {
                        let len = end - loop_start;
                        pos = loop_start + (pos - end) % len;
                    }
                    LoopType::PingPong => {
                        let overshoot = pos - end;
                        pos = end.saturating_sub(overshoot + 1).max(loop_start);
                        chan.reverse = true;
                    }
                }
            }
        }
    }

    chan.pos = (pos >> 16) as u32;
    chan.pos_lo = (pos & 0xffff) as u16;
    chan.left_vol = left_vol;
    chan.right_vol = right_vol;
    chan.filter.y1 = fy1;
    chan.filter.y2 = fy2;
}

impl Player {
    /// Render interleaved signed 16-bit PCM into `out`. Returns the
    /// number of samples (i16 units) written; 0 means the song ended.
    pub fn mix(&mut self, out: &mut [i16]) -> usize {
        #[cfg(feature = "alloc_check")]
        {
            assert_no_alloc::assert_no_alloc(|| self.mix_inner(out))
        }
        #[cfg(not(feature = "alloc_check"))]
        {
            self.mix_inner(out)
        }
    }

    fn mix_inner(&mut self, out: &mut [i16]) -> usize {
        let out_channels = self.output_channels() as usize;
        let max_frames = out.len() / out_channels;
        let mut written = 0usize;

        while written < max_frames {
            if self.samples_until_tick == 0 {
                if !self.advance_tick() {
                    break;
                }
                self.samples_until_tick = self.samples_per_tick.max(1);
            }
            let count = (self.samples_until_tick as usize)
                .min(max_frames - written)
                .min(MIX_BLOCK);

            let buffer = &mut self.mix_buffer[..count * 2];
            buffer.fill(0);

            let song = &self.song;
            let interp = self.interpolation;
            for chan in self.channels.iter_mut().chain(self.ghosts.iter_mut()) {
                if !chan.playing {
                    continue;
                }
                let Some(sample) = song.samples.get((chan.sample as usize).wrapping_sub(1))
                else {
                    continue;
                };
                let Some(data) = sample.data() else { continue };
                mix_voice(chan, data, interp, buffer);
            }

            // DC follower then saturate to 16 bits
            for frame in 0..count {
                let left = buffer[frame * 2];
                let right = buffer[frame * 2 + 1];
                self.dc_left += (left - self.dc_left) >> 11;
                self.dc_right += (right - self.dc_right) >> 11;
                let left = (left - self.dc_left) >> 6;
                let right = (right - self.dc_right) >> 6;
                let base = (written + frame) * out_channels;
                if out_channels == 2 {
                    out[base] = left.clamp(-32768, 32767) as i16;
                    out[base + 1] = right.clamp(-32768, 32767) as i16;
                } else {
                    // Mono output folds the right channel into the left
                    let mono = (left + right) / 2;
                    out[base] = mono.clamp(-32768, 32767) as i16;
                }
            }

            self.samples_until_tick -= count as u32;
            written += count;
        }
        written * out_channels
    }
}
