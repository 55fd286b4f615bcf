//! The emulated Atari ST: CPU, RAM, sound chip and timer wired to one
//! memory map, plus the SNDH driving loop that produces PCM.

use tracing::{debug, warn};

use crate::bus::{ClockManager, Device, MemoryMap};
use crate::cpu::M68000;
use crate::mc68901::{Mc68901, TIMER_BITS};
use crate::sndh::SndhTune;
use crate::ym2149::Ym2149;
use crate::EmuError;

/// CPU clock.
pub const CPU_HZ: u32 = 8_000_000;
/// Sound chip input clock.
pub const PSG_HZ: u32 = 2_000_000;
/// MFP timer input clock.
pub const MFP_HZ: u32 = 2_457_600;

const RAM_SIZE: u32 = 0x40_0000;
const PSG_BASE: u32 = 0xff_8800;
const MFP_BASE: u32 = 0xff_fa00;
/// Tunes load clear of the vector table and system variables.
const TUNE_BASE: u32 = 0x01_0000;
/// Stack for init/play routine calls.
const STACK_TOP: u32 = 0x08_0000;
/// Per-routine instruction budget before giving up on a runaway tune.
const MAX_ROUTINE_STEPS: u32 = 4_000_000;

/// MFP prescale divisors by control value, for timer programming.
const PRESCALE: [u32; 8] = [0, 4, 10, 16, 50, 64, 100, 200];

pub struct AtariSt {
    cpu: M68000,
    bus: MemoryMap,
    psg: usize,
    mfp: usize,
    pub sample_rate: u32,
    sample_clock: ClockManager,
    /// One-pole high-pass removing the PSG's unipolar DC offset
    dc_in: i32,
    dc_out: i32,
    sample: i16,
    ready: bool,
    /// Driving timer index (0-3), or None for the VBL fallback
    timer: Option<usize>,
    vbl_clock: ClockManager,
    play_pending: bool,
    play_entry: u32,
    trapped: bool,
}

impl AtariSt {
    pub fn new(sample_rate: u32) -> Self {
        let mut bus = MemoryMap::new(0x00ff_ffff);
        bus.add_device(0, RAM_SIZE, Device::Ram(vec![0; RAM_SIZE as usize]));
        let psg = bus.add_device(PSG_BASE, 0x100, Device::Psg(Ym2149::new()));
        let mfp = bus.add_device(MFP_BASE, 0x40, Device::Mfp(Mc68901::new()));
        bus.add_clock(psg, PSG_HZ, CPU_HZ);
        bus.add_clock(mfp, MFP_HZ, CPU_HZ);

        Self {
            cpu: M68000::new(),
            bus,
            psg,
            mfp,
            sample_rate,
            sample_clock: ClockManager::new(sample_rate, CPU_HZ),
            dc_in: 0,
            dc_out: 0,
            sample: 0,
            ready: false,
            timer: None,
            vbl_clock: ClockManager::new(50, CPU_HZ),
            play_pending: false,
            play_entry: 0,
            trapped: false,
        }
    }

    /// Select the timer and rate that drives the play routine.
    pub fn configure_timer(&mut self, timer: Option<(char, u32)>) {
        match timer {
            Some((letter @ 'A'..='D', hz)) if hz > 0 => {
                let index = (letter as u8 - b'A') as usize;
                self.timer = Some(index);
                let (prescale, reload) = best_timer_settings(hz);
                if let Device::Mfp(mfp) = self.bus.device_mut(self.mfp) {
                    mfp.program_timer(index, prescale, reload);
                }
                debug!(timer = %letter, hz, prescale, reload, "timer configured");
            }
            Some((_, hz)) if hz > 0 => {
                self.timer = None;
                self.vbl_clock = ClockManager::new(hz, CPU_HZ);
            }
            _ => {
                // No timer tag: VBL-driven at 50 Hz
                self.timer = None;
                self.vbl_clock = ClockManager::new(50, CPU_HZ);
            }
        }
    }

    /// Copy a tune payload into RAM and remember the entry points.
    pub fn load_tune(&mut self, tune: &SndhTune) -> Result<(), EmuError> {
        if tune.data.len() as u32 > RAM_SIZE - TUNE_BASE {
            return Err(EmuError::BadTune("image too large for RAM"));
        }
        if let Device::Ram(ram) = self.bus.device_mut(0) {
            let base = TUNE_BASE as usize;
            ram[base..base + tune.data.len()].copy_from_slice(&tune.data);
        }
        self.play_entry = TUNE_BASE + tune.play_offset();
        Ok(())
    }

    /// Run the tune's init routine for a subtune (1-based, as the tag
    /// stream counts them).
    pub fn init(&mut self, subtune: u16) -> Result<(), EmuError> {
        self.cpu.d[0] = subtune.max(1) as u32;
        self.cpu.execute_from(TUNE_BASE, STACK_TOP, &mut self.bus)?;
        self.cpu.execute_to_return(&mut self.bus, MAX_ROUTINE_STEPS)?;
        debug!(subtune, "tune initialised");
        Ok(())
    }

    /// Advance the machine by one CPU instruction (or an idle slot) and
    /// distribute peripheral clocks. Returns false after a fatal CPU
    /// error.
    pub fn advance_clock(&mut self) -> bool {
        if self.trapped {
            return false;
        }
        let cycles = if !self.cpu.returned() {
            let result = self.cpu.step(&mut self.bus);
            if result.trap && !result.valid_insn {
                warn!(pc = self.cpu.pc, "cpu fell off the rails");
                self.trapped = true;
                return false;
            }
            result.cycles
        } else {
            4
        };

        self.bus.run_clocks(cycles);

        // Timer expiry schedules the next play call
        let fired = match self.timer {
            Some(index) => {
                let Device::Mfp(mfp) = self.bus.device_mut(self.mfp) else { unreachable!() };
                let bit = TIMER_BITS[index];
                let fired = mfp.pending_interrupts() & bit != 0;
                if fired {
                    mfp.clear_interrupts(bit);
                }
                fired
            }
            None => self.vbl_clock.advance(cycles) > 0,
        };
        if fired {
            self.play_pending = true;
        }

        if self.play_pending && self.cpu.returned() {
            self.play_pending = false;
            if self.cpu.execute_from(self.play_entry, STACK_TOP, &mut self.bus).is_err() {
                self.trapped = true;
                return false;
            }
        }

        if self.sample_clock.advance(cycles) > 0 {
            self.latch_sample();
        }
        true
    }

    fn latch_sample(&mut self) {
        let Device::Psg(psg) = self.bus.device(self.psg) else { unreachable!() };
        let input = psg.output() as i32;
        // y[n] = x[n] - x[n-1] + (255/256) y[n-1]
        let output = input - self.dc_in + ((self.dc_out * 255) >> 8);
        self.dc_in = input;
        self.dc_out = output;
        self.sample = output.clamp(-32768, 32767) as i16;
        self.ready = true;
    }

    /// True when a new output sample is waiting.
    pub fn sample_ready(&self) -> bool {
        self.ready
    }

    /// Take the waiting sample.
    pub fn read_sample(&mut self) -> i16 {
        self.ready = false;
        self.sample
    }

    /// CPU state summary for post-mortem logging.
    pub fn cpu_state(&self) -> String {
        format!(
            "pc={:#010x} sr={:#06x} d0={:#010x} a7={:#010x}",
            self.cpu.pc,
            self.cpu.status(),
            self.cpu.d[0],
            self.cpu.a[7]
        )
    }
}

/// Pick the prescale/reload pair whose rate best matches `hz`.
fn best_timer_settings(hz: u32) -> (u8, u8) {
    let mut best = (7u8, 1u8);
    let mut best_error = u32::MAX;
    for (index, &prescale) in PRESCALE.iter().enumerate().skip(1) {
        for reload in 1..=255u32 {
            let rate = MFP_HZ / (prescale * reload);
            let error = rate.abs_diff(hz);
            if error < best_error {
                best_error = error;
                best = (index as u8, reload as u8);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sndh::SndhTune;

    /// A tune whose play routine pokes the PSG: select register 0,
    /// write the period, set level and mixer, then rts.
    fn beeper_tune() -> SndhTune {
        let mut body = Vec::new();
        // init (offset 0): bra.w to the code block
        body.extend([0x60, 0x00, 0x00, 0x18]);
        // exit (offset 4): rts padded to 4 bytes
        body.extend([0x4e, 0x75, 0x4e, 0x71]);
        // play (offset 8): same code block
        body.extend([0x60, 0x00, 0x00, 0x10]);
        body.extend(b"SNDH");
        body.extend(b"TC50\0\0");
        body.extend(b"HDNS");
        let code_offset = body.len();
        // move.b #0,$ff8800 ; select register 0
        body.extend([0x13, 0xfc, 0x00, 0x00, 0x00, 0xff, 0x88, 0x00]);
        // move.b #$40,$ff8802 ; fine period
        body.extend([0x13, 0xfc, 0x00, 0x40, 0x00, 0xff, 0x88, 0x02]);
        // move.b #8,$ff8800 ; select level A
        body.extend([0x13, 0xfc, 0x00, 0x08, 0x00, 0xff, 0x88, 0x00]);
        // move.b #$0f,$ff8802
        body.extend([0x13, 0xfc, 0x00, 0x0f, 0x00, 0xff, 0x88, 0x02]);
        // move.b #7,$ff8800 ; select mixer
        body.extend([0x13, 0xfc, 0x00, 0x07, 0x00, 0xff, 0x88, 0x00]);
        // move.b #$3e,$ff8802 ; tone A only
        body.extend([0x13, 0xfc, 0x00, 0x3e, 0x00, 0xff, 0x88, 0x02]);
        // rts
        body.extend([0x4e, 0x75]);
        assert_eq!(code_offset, 0x1a);
        SndhTune::parse(&body).unwrap()
    }

    #[test]
    fn init_and_generate_samples() {
        let tune = beeper_tune();
        let mut machine = AtariSt::new(44100);
        machine.configure_timer(tune.metadata.timer);
        machine.load_tune(&tune).unwrap();
        machine.init(1).unwrap();

        let mut samples = Vec::new();
        let mut guard = 0u64;
        while samples.len() < 4410 {
            assert!(machine.advance_clock(), "machine crashed: {}", machine.cpu_state());
            if machine.sample_ready() {
                samples.push(machine.read_sample());
            }
            guard += 1;
            assert!(guard < 40_000_000, "no samples produced");
        }
        assert!(samples.iter().any(|&s| s != 0), "expected audible output");
    }

    #[test]
    fn timer_settings_approximate_rate() {
        let (prescale, reload) = best_timer_settings(50);
        let rate = MFP_HZ / (PRESCALE[prescale as usize] * reload as u32);
        assert!((48..=52).contains(&rate));

        let (prescale, reload) = best_timer_settings(200);
        let rate = MFP_HZ / (PRESCALE[prescale as usize] * reload as u32);
        assert!((195..=205).contains(&rate));
    }

    #[test]
    fn oversized_tune_is_rejected() {
        let mut machine = AtariSt::new(44100);
        let tune = SndhTune {
            metadata: Default::default(),
            data: vec![0; (RAM_SIZE - TUNE_BASE + 4) as usize],
        };
        assert!(machine.load_tune(&tune).is_err());
    }
}
