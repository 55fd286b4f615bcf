//! The pattern interpreter: drives order/row/tick state and per-channel
//! effect processing. The mixer (`mixer.rs`) calls [`Player::advance_tick`]
//! at every tick boundary and renders the frames in between.

use alloc::vec::Vec;

use cs_ir::{
    Cell, DuplicateAction, DuplicateCheck, Effect, Instrument, LoopType, NewNoteAction, Note,
    OrderEntry, Sample, Song, VolumeCommand,
};
use heapless::Vec as BoundedVec;

use crate::channel::ChannelState;
use crate::envelope::EnvelopeState;
use crate::period::{period_from_note, period_to_increment};
use crate::tables::waveform;

/// Hard cap on simultaneously sounding voices (channels + ghosts).
pub const MAX_VOICES: usize = 128;

/// Ghost voices kept alive by new-note actions.
pub const MAX_GHOSTS: usize = 64;

/// Interpolation quality for the sample mixer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest sample
    None,
    /// Two-point linear
    #[default]
    Linear,
    /// 256-phase 4-tap windowed sinc
    Sinc,
}

/// IT volume-column tone portamento speeds.
const VOL_COLUMN_PORTA: [u8; 10] = [0, 1, 4, 8, 16, 32, 64, 96, 128, 255];

pub struct Player {
    pub(crate) song: Song,
    pub(crate) sample_rate: u32,
    pub(crate) interpolation: Interpolation,
    pub(crate) channels: Vec<ChannelState>,
    pub(crate) ghosts: BoundedVec<ChannelState, MAX_GHOSTS>,

    // Sequencer position
    current_order: usize,
    current_row: u16,
    next_order: usize,
    next_row: u16,
    tick_in_row: u32,
    speed: u32,
    tempo: u32,
    pattern_delay: u32,
    global_volume: u32,
    global_slide: u8,
    finished: bool,

    // Mixing cadence
    pub(crate) samples_per_tick: u32,
    pub(crate) samples_until_tick: u32,
    pub(crate) dc_left: i32,
    pub(crate) dc_right: i32,
    pub(crate) mix_buffer: Vec<i32>,
}

impl Player {
    pub fn new(song: Song, sample_rate: u32) -> Self {
        let channels = song
            .channels
            .iter()
            .map(|settings| {
                let mut chan = ChannelState::new();
                chan.panning = settings.pan;
                chan.channel_volume = settings.volume;
                chan
            })
            .collect();
        let speed = song.initial_speed.max(1) as u32;
        let tempo = song.initial_tempo.max(32) as u32;
        let global_volume = song.global_volume.min(128) as u32;
        let mut player = Self {
            song,
            sample_rate,
            interpolation: Interpolation::default(),
            channels,
            ghosts: BoundedVec::new(),
            current_order: 0,
            current_row: 0,
            next_order: 0,
            next_row: 0,
            tick_in_row: 0,
            speed,
            tempo,
            pattern_delay: 0,
            global_volume,
            global_slide: 0,
            finished: false,
            samples_per_tick: 0,
            samples_until_tick: 0,
            dc_left: 0,
            dc_right: 0,
            mix_buffer: alloc::vec![0i32; crate::mixer::MIX_BLOCK * 2],
        };
        player.update_samples_per_tick();
        player
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    /// Output channel count: stereo unless the master volume says mono.
    pub fn output_channels(&self) -> u8 {
        if self.song.is_stereo() {
            2
        } else {
            1
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Currently sounding voices (channels plus ghosts).
    pub fn active_voices(&self) -> usize {
        self.channels.iter().filter(|c| c.playing).count()
            + self.ghosts.iter().filter(|g| g.playing).count()
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelState> {
        self.channels.get(index)
    }

    /// Rough song length from the order list, tracking speed/tempo
    /// changes but ignoring jumps and loops.
    pub fn estimate_duration_secs(&self) -> f64 {
        let mut speed = self.song.initial_speed.max(1) as u64;
        let mut tempo = self.song.initial_tempo.max(32) as u64;
        let mut samples: u64 = 0;
        for entry in &self.song.orders {
            let OrderEntry::Pattern(index) = entry else {
                if *entry == OrderEntry::End {
                    break;
                }
                continue;
            };
            let Some(pattern) = self.song.patterns.get(*index as usize) else { continue };
            for row in 0..pattern.rows {
                for cell in pattern.row(row) {
                    match cell.effect {
                        Effect::SetSpeed(s) if s > 0 => speed = s as u64,
                        Effect::SetTempo(t) if t >= 0x20 => tempo = t as u64,
                        _ => {}
                    }
                }
                samples += speed * (self.sample_rate as u64 * 10) / (tempo * 4);
            }
        }
        samples as f64 / self.sample_rate as f64
    }

    pub(crate) fn update_samples_per_tick(&mut self) {
        self.samples_per_tick = (self.sample_rate * 10) / (self.tempo * 4);
    }

    /// Advance one tick: row processing on tick 0, per-tick effects on
    /// the rest, then rebuild every voice's increment and mix targets.
    /// Returns false once the song has ended.
    pub fn advance_tick(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.tick_in_row == 0 {
            if !self.process_row() {
                self.finished = true;
                return false;
            }
        } else {
            self.process_tick_effects();
        }
        self.update_voices();
        self.tick_in_row += 1;
        if self.tick_in_row >= self.speed {
            self.tick_in_row = 0;
        }
        true
    }

    /// Find the next playable order at or after `from`.
    fn resolve_order(&self, mut from: usize) -> Option<usize> {
        loop {
            match self.song.orders.get(from)? {
                OrderEntry::Pattern(_) => return Some(from),
                OrderEntry::Skip => from += 1,
                OrderEntry::End => return None,
            }
        }
    }

    /// Row boundary: advance position and latch tick-0 state.
    fn process_row(&mut self) -> bool {
        if self.pattern_delay > 0 {
            // Row repeats under pattern delay; state stays latched
            self.pattern_delay -= 1;
            return true;
        }

        let Some(order) = self.resolve_order(self.next_order) else {
            return false;
        };
        self.current_order = order;
        let pattern_index = match self.song.orders[order] {
            OrderEntry::Pattern(index) => index as usize,
            _ => unreachable!(),
        };
        let Some(pattern) = self.song.patterns.get(pattern_index) else {
            return false;
        };
        self.current_row = self.next_row.min(pattern.rows.saturating_sub(1));

        self.next_row = self.current_row + 1;
        self.next_order = order;
        if self.next_row >= pattern.rows {
            self.next_row = 0;
            self.next_order = order + 1;
        }


        let mut row_cells = [Cell::empty(); 64];
        let count = (pattern.channels as usize).min(64).min(self.channels.len());
        row_cells[..count].copy_from_slice(&pattern.row(self.current_row)[..count]);

        // Flow control is resolved across the whole row, so a jump on
        // one channel combines with a break on another
        let mut jump_order = None;
        let mut break_row = None;
        for cell in &row_cells[..count] {
            match cell.effect {
                Effect::PositionJump(target) => jump_order = Some(target as usize),
                Effect::PatternBreak(row) => break_row = Some(row as u16),
                _ => {}
            }
        }
        match (jump_order, break_row) {
            (Some(target), Some(row)) => {
                self.next_order = target;
                self.next_row = row;
            }
            (Some(target), None) => {
                self.next_order = target;
                self.next_row = 0;
            }
            (None, Some(row)) => {
                self.next_order = order + 1;
                self.next_row = row;
            }
            (None, None) => {}
        }

        for index in 0..count {
            self.process_cell(index, row_cells[index]);
        }
        true
    }

    /// Tick-0 handling for one channel's cell.
    fn process_cell(&mut self, index: usize, cell: Cell) {
        let mut chan = core::mem::take(&mut self.channels[index]);
        chan.row_note = cell.note;
        chan.row_sample = cell.sample;
        chan.row_volume = cell.volume;
        chan.row_effect = cell.effect;
        chan.note_cut_tick = 0xff;
        chan.note_delay_tick = 0;

        // A note delay postpones the whole note/volume latch
        if let Effect::NoteDelay(delay) = cell.effect {
            if delay > 0 && (delay as u32) < self.speed {
                chan.note_delay_tick = delay;
                self.apply_effect_tick0(&mut chan, cell.effect);
                self.channels[index] = chan;
                return;
            }
        }

        self.apply_note(&mut chan, cell);
        self.apply_volume_tick0(&mut chan, cell.volume);
        self.apply_effect_tick0(&mut chan, cell.effect);
        self.channels[index] = chan;
    }

    /// Resolve a cell's note/sample pair and trigger the voice.
    fn apply_note(&mut self, chan: &mut ChannelState, cell: Cell) {
        let instrument_mode = self.song.flags.instrument_mode;

        if cell.sample > 0 {
            chan.instrument = cell.sample;
            if !instrument_mode {
                chan.sample = cell.sample;
            }
            // An instrument without a note resets the volume
            if let Some(sample) = self.song.samples.get((chan.sample as usize).wrapping_sub(1)) {
                chan.volume = sample.default_volume;
            }
        }

        match cell.note {
            Note::None => {}
            Note::Off => {
                let has_env = self
                    .current_instrument(chan)
                    .map(|inst| inst.volume_envelope.is_enabled())
                    .unwrap_or(false);
                chan.release(has_env);
            }
            Note::Cut => chan.cut(),
            Note::Fade => chan.start_fade(),
            Note::On(note) => self.trigger_note(chan, note, cell),
        }
    }

    fn current_instrument(&self, chan: &ChannelState) -> Option<&Instrument> {
        if !self.song.flags.instrument_mode || chan.instrument == 0 {
            return None;
        }
        self.song.instruments.get(chan.instrument as usize - 1)
    }

    fn trigger_note(&mut self, chan: &mut ChannelState, note: u8, cell: Cell) {
        let instrument_mode = self.song.flags.instrument_mode;

        // Resolve through the instrument note map when in instrument mode
        let (real_note, sample_index) = if instrument_mode {
            match self.current_instrument(chan) {
                Some(instrument) => {
                    let entry = instrument.translate(note);
                    (entry.note, entry.sample)
                }
                None => (note, 0),
            }
        } else {
            (note, chan.sample)
        };

        if sample_index == 0 {
            return;
        }
        // Snapshot the sample's cursor parameters up front
        let Some(sample) = self.song.samples.get(sample_index as usize - 1) else {
            return;
        };
        if sample.is_empty() {
            chan.playing = false;
            return;
        }
        let c4_speed = finetuned_c4_speed(sample, chan.finetune);
        let sample_volume = sample.global_volume;
        let length = sample.length;
        let loop_start = sample.loop_start;
        let loop_end = if sample.has_loop() { sample.loop_end } else { sample.length };
        let loop_type = sample.loop_type;
        let sample_pan = sample.default_pan;

        // Tone portamento glides to the new note instead of retriggering
        let is_porta = matches!(
            cell.effect,
            Effect::TonePorta(_) | Effect::TonePortaVolSlide(_)
        ) || matches!(cell.volume, VolumeCommand::TonePorta(_));
        if is_porta && chan.playing {
            chan.porta_dest = self.clamp_period(period_from_note(real_note, c4_speed));
            chan.note = real_note;
            return;
        }

        // Previous voice may survive as a ghost under its new-note action
        if instrument_mode && chan.playing {
            let action = self
                .current_instrument(chan)
                .map(|inst| inst.new_note_action)
                .unwrap_or(NewNoteAction::Cut);
            self.run_duplicate_check(chan);
            if action != NewNoteAction::Cut {
                self.spawn_ghost(chan, action);
            }
        }

        chan.sample = sample_index;
        chan.note = real_note;
        chan.c4_speed = c4_speed;
        chan.sample_volume = sample_volume;
        chan.length = length;
        chan.loop_start = loop_start;
        chan.loop_end = loop_end;
        chan.loop_type = loop_type;
        if let Some(pan) = sample_pan {
            chan.panning = pan;
        }

        let instrument = self.current_instrument(chan);
        chan.fadeout_speed = instrument.map_or(0, |inst| inst.fadeout);
        chan.instrument_volume = instrument.map_or(128, |inst| inst.global_volume);
        if let Some(pan) = instrument.and_then(|inst| inst.default_pan) {
            chan.panning = pan;
        }

        chan.pos = 0;
        if let Effect::SampleOffset(param) = cell.effect {
            if param != 0 {
                chan.offset_param = (param as u32) << 8;
            }
            if chan.offset_param < chan.length {
                chan.pos = chan.offset_param;
            }
        }
        chan.pos_lo = 0;
        chan.reverse = false;
        chan.period = self.clamp_period(period_from_note(real_note, c4_speed));
        chan.porta_dest = chan.period;
        chan.fade_volume = 1024;
        chan.fading = false;
        chan.released = false;
        chan.volume_env = EnvelopeState::default();
        chan.panning_env = EnvelopeState::default();
        chan.pitch_env = EnvelopeState::default();
        chan.auto_vibrato_pos = 0;
        chan.auto_vibrato_depth = 0;
        chan.vibrato.retrigger();
        chan.tremolo.retrigger();
        chan.panbrello.retrigger();
        chan.retrigger_count = 0;
        chan.tremor_position = 0;
        chan.tremor_mute = false;
        chan.playing = true;
    }

    /// Apply the instrument's duplicate check against the ghost pool.
    fn run_duplicate_check(&mut self, chan: &ChannelState) {
        let Some(instrument) = self.current_instrument(chan) else { return };
        let check = instrument.duplicate_check;
        if check == DuplicateCheck::Off {
            return;
        }
        let action = instrument.duplicate_action;
        let (note, sample, inst) = (chan.note, chan.sample, chan.instrument);
        for ghost in self.ghosts.iter_mut() {
            let matches = match check {
                DuplicateCheck::Note => ghost.note == note && ghost.instrument == inst,
                DuplicateCheck::Sample => ghost.sample == sample,
                DuplicateCheck::Instrument => ghost.instrument == inst,
                DuplicateCheck::Off => false,
            };
            if matches {
                match action {
                    DuplicateAction::Cut => ghost.cut(),
                    DuplicateAction::Off => ghost.release(true),
                    DuplicateAction::Fade => ghost.start_fade(),
                }
            }
        }
    }

    /// Move the current voice into the ghost pool so the channel can
    /// start a fresh note. Oldest-and-quietest eviction when full.
    fn spawn_ghost(&mut self, chan: &ChannelState, action: NewNoteAction) {
        let mut ghost = chan.clone();
        match action {
            NewNoteAction::Continue => {}
            NewNoteAction::Off => {
                let has_env = self
                    .current_instrument(chan)
                    .map(|inst| inst.volume_envelope.is_enabled())
                    .unwrap_or(false);
                ghost.release(has_env);
            }
            NewNoteAction::Fade => ghost.start_fade(),
            NewNoteAction::Cut => return,
        }
        // Ramp from the current level, not from silence
        ghost.ramp_remaining = 0;

        if self.ghosts.is_full() {
            let victim = self
                .ghosts
                .iter()
                .enumerate()
                .min_by_key(|(i, g)| ((g.fade_volume as u32) << 8 | (g.volume as u32), *i))
                .map(|(i, _)| i);
            if let Some(index) = victim {
                self.ghosts[index] = ghost;
            }
            return;
        }
        let _ = self.ghosts.push(ghost);
    }

    /// Volume-column handling on tick 0.
    fn apply_volume_tick0(&mut self, chan: &mut ChannelState, command: VolumeCommand) {
        match command {
            VolumeCommand::None => {}
            VolumeCommand::Volume(value) => chan.volume = value.min(64),
            VolumeCommand::Panning(value) => {
                chan.panning = ((value.min(64) as u16) * 4).min(255) as u8;
            }
            VolumeCommand::FineVolUp(value) => {
                if value != 0 {
                    chan.vol_column_param = value;
                }
                chan.volume = (chan.volume + chan.vol_column_param).min(64);
            }
            VolumeCommand::FineVolDown(value) => {
                if value != 0 {
                    chan.vol_column_param = value;
                }
                chan.volume = chan.volume.saturating_sub(chan.vol_column_param);
            }
            VolumeCommand::VolSlideUp(value) | VolumeCommand::VolSlideDown(value) => {
                if value != 0 {
                    chan.vol_column_param = value;
                }
            }
            VolumeCommand::TonePorta(value) => {
                let speed = VOL_COLUMN_PORTA[(value as usize).min(9)];
                if speed != 0 {
                    chan.porta_speed = speed;
                }
            }
            VolumeCommand::Vibrato(depth) => chan.vibrato.latch(0, depth),
            VolumeCommand::PortaUp(value) | VolumeCommand::PortaDown(value) => {
                if value != 0 {
                    chan.porta_param = value << 2;
                }
            }
        }
    }

    /// Effect-column handling on tick 0.
    fn apply_effect_tick0(&mut self, chan: &mut ChannelState, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Arpeggio { x, y } => chan.arpeggio = x << 4 | y,
            Effect::PortaUp(param) | Effect::PortaDown(param) => {
                if param != 0 {
                    chan.porta_param = param;
                }
            }
            Effect::TonePorta(param) => {
                if param != 0 {
                    chan.porta_speed = param;
                }
            }
            Effect::Vibrato { speed, depth } | Effect::FineVibrato { speed, depth } => {
                chan.vibrato.latch(speed, depth);
            }
            Effect::Tremolo { speed, depth } => chan.tremolo.latch(speed, depth),
            Effect::Panbrello { speed, depth } => chan.panbrello.latch(speed, depth),
            Effect::TonePortaVolSlide(param) | Effect::VibratoVolSlide(param) => {
                self.latch_volume_slide(chan, param);
            }
            Effect::SetPanning(value) => chan.panning = value,
            Effect::SampleOffset(_) => {} // consumed at note trigger
            Effect::VolumeSlide(param) => self.latch_volume_slide(chan, param),
            // Position jumps and pattern breaks are resolved row-wide
            // before the per-channel pass (see process_row)
            Effect::PositionJump(_) | Effect::PatternBreak(_) => {}
            Effect::SetSpeed(speed) => {
                if speed > 0 {
                    self.speed = speed as u32;
                }
            }
            Effect::SetTempo(tempo) => {
                if tempo >= 0x20 {
                    self.tempo = tempo as u32;
                    self.update_samples_per_tick();
                }
            }
            Effect::SetVolume(value) => chan.volume = value.min(64),
            Effect::ChannelVolume(value) => chan.channel_volume = value.min(64),
            Effect::ChannelVolumeSlide(param) => {
                if param != 0 {
                    chan.channel_volume_slide = param;
                }
                let slide = chan.channel_volume_slide;
                if slide & 0x0f == 0x0f && slide >> 4 > 0 {
                    chan.channel_volume = (chan.channel_volume + (slide >> 4)).min(64);
                } else if slide >> 4 == 0x0f && slide & 0x0f > 0 {
                    chan.channel_volume = chan.channel_volume.saturating_sub(slide & 0x0f);
                }
            }
            Effect::PanningSlide(param) => {
                if param != 0 {
                    chan.pan_slide = param;
                }
                let slide = chan.pan_slide;
                if slide & 0x0f == 0x0f && slide >> 4 > 0 {
                    chan.panning = chan.panning.saturating_sub((slide >> 4) << 2);
                } else if slide >> 4 == 0x0f && slide & 0x0f > 0 {
                    chan.panning = (chan.panning as u16 + ((slide & 0x0f) << 2) as u16).min(255) as u8;
                }
            }
            Effect::Tremor { on, off } => {
                if on != 0 || off != 0 {
                    chan.tremor_param = on << 4 | off;
                }
            }
            Effect::GlobalVolume(value) => self.global_volume = value.min(128) as u32,
            Effect::GlobalVolumeSlide(param) => {
                if param != 0 {
                    self.global_slide = param;
                }
                let slide = self.global_slide;
                if slide & 0x0f == 0x0f && slide >> 4 > 0 {
                    self.global_volume = (self.global_volume + (slide >> 4) as u32).min(128);
                } else if slide >> 4 == 0x0f && slide & 0x0f > 0 {
                    self.global_volume = self.global_volume.saturating_sub((slide & 0x0f) as u32);
                }
            }
            Effect::FinePortaUp(param) => {
                self.slide_period(chan, -((param as i32) << 2));
            }
            Effect::FinePortaDown(param) => {
                self.slide_period(chan, (param as i32) << 2);
            }
            Effect::ExtraFinePortaUp(param) => {
                self.slide_period(chan, -(param as i32));
            }
            Effect::ExtraFinePortaDown(param) => {
                self.slide_period(chan, param as i32);
            }
            Effect::Glissando(value) => chan.glissando = value != 0,
            Effect::SetVibratoWaveform(value) => chan.vibrato.waveform = value & 0x07,
            Effect::SetTremoloWaveform(value) => chan.tremolo.waveform = value & 0x07,
            Effect::SetPanbrelloWaveform(value) => chan.panbrello.waveform = value & 0x07,
            Effect::SetFinetune(finetune) => {
                chan.finetune = finetune;
                if let Some(sample) = self.song.samples.get((chan.sample as usize).wrapping_sub(1)) {
                    chan.c4_speed = finetuned_c4_speed(sample, finetune);
                }
            }
            Effect::PatternLoop(param) => self.pattern_loop(chan, param),
            Effect::Retrigger(param) => {
                if param != 0 {
                    chan.retrigger_param = param;
                }
                chan.retrigger_count = 0;
            }
            Effect::FineVolumeSlideUp(param) => {
                chan.volume = (chan.volume + param).min(64);
            }
            Effect::FineVolumeSlideDown(param) => {
                chan.volume = chan.volume.saturating_sub(param);
            }
            Effect::NoteCut(tick) => {
                chan.note_cut_tick = tick;
                if tick == 0 {
                    chan.volume = 0;
                }
            }
            Effect::NoteDelay(_) => {} // handled in process_cell
            Effect::PatternDelay(rows) => {
                if self.pattern_delay == 0 {
                    self.pattern_delay = rows as u32;
                }
            }
            Effect::SetEnvelopePosition(position) => {
                chan.volume_env.position = position as u16;
                chan.volume_env.finished = false;
            }
            Effect::SetFilterCutoff(cutoff) => {
                chan.filter.cutoff = cutoff & 0x7f;
                chan.filter.enabled = true;
                crate::mixer::setup_filter(&mut chan.filter, self.sample_rate);
            }
            Effect::SetFilterResonance(resonance) => {
                chan.filter.resonance = resonance & 0x7f;
                chan.filter.enabled = true;
                crate::mixer::setup_filter(&mut chan.filter, self.sample_rate);
            }
        }

        // Fast volume slides also run on tick 0
        if self.song.flags.fast_slides {
            if let Effect::VolumeSlide(_) = effect {
                self.run_volume_slide(chan);
            }
        }
    }

    fn latch_volume_slide(&mut self, chan: &mut ChannelState, param: u8) {
        if param != 0 {
            chan.volume_slide = param;
        }
        let slide = chan.volume_slide;
        // x0F / xF0 are the fine variants, applied once here
        if slide & 0x0f == 0x0f && slide >> 4 > 0 {
            chan.volume = (chan.volume + (slide >> 4)).min(64);
        } else if slide >> 4 == 0x0f && slide & 0x0f > 0 {
            chan.volume = chan.volume.saturating_sub(slide & 0x0f);
        }
    }

    fn run_volume_slide(&mut self, chan: &mut ChannelState) {
        let slide = chan.volume_slide;
        let up = slide >> 4;
        let down = slide & 0x0f;
        // Fine variants were consumed on tick 0
        if down == 0x0f && up > 0 || up == 0x0f && down > 0 {
            return;
        }
        if up > 0 {
            chan.volume = (chan.volume + up).min(64);
        } else if down > 0 {
            chan.volume = chan.volume.saturating_sub(down);
        }
    }

    fn pattern_loop(&mut self, chan: &mut ChannelState, param: u8) {
        if param == 0 {
            chan.pattern_loop_row = self.current_row;
            return;
        }
        if chan.pattern_loop_count == 0 {
            chan.pattern_loop_count = param;
        } else {
            chan.pattern_loop_count -= 1;
            if chan.pattern_loop_count == 0 {
                return;
            }
        }
        self.next_row = chan.pattern_loop_row;
        self.next_order = self.current_order;
    }

    fn clamp_period(&self, period: u32) -> u32 {
        period.clamp(self.song.min_period, self.song.max_period)
    }

    fn slide_period(&self, chan: &mut ChannelState, delta: i32) {
        let period = (chan.period as i64 + delta as i64)
            .clamp(self.song.min_period as i64, self.song.max_period as i64);
        chan.period = period as u32;
    }

    /// Ticks 1..speed-1: incremental effect state.
    fn process_tick_effects(&mut self) {
        let tick = self.tick_in_row;
        for index in 0..self.channels.len() {
            let mut chan = core::mem::take(&mut self.channels[index]);

            // Delayed notes fire on their tick
            if chan.note_delay_tick != 0 && tick == chan.note_delay_tick as u32 {
                let cell = Cell {
                    note: chan.row_note,
                    sample: chan.row_sample,
                    volume: chan.row_volume,
                    effect: Effect::None,
                };
                chan.note_delay_tick = 0;
                self.apply_note(&mut chan, cell);
                self.apply_volume_tick0(&mut chan, cell.volume);
            }

            self.run_tick_effect(&mut chan, tick);
            self.run_tick_volume_column(&mut chan);
            self.channels[index] = chan;
        }
    }

    fn run_tick_effect(&mut self, chan: &mut ChannelState, tick: u32) {
        match chan.row_effect {
            Effect::Arpeggio { x, y } => {
                let offset = match tick % 3 {
                    1 => x,
                    2 => y,
                    _ => 0,
                };
                if offset != 0 {
                    let shifted = chan.note.saturating_add(offset).min(120);
                    let target = self.clamp_period(period_from_note(shifted, chan.c4_speed));
                    chan.period_offset += target as i32 - chan.period as i32;
                }
            }
            Effect::PortaUp(_) => self.slide_period(chan, -((chan.porta_param as i32) << 2)),
            Effect::PortaDown(_) => self.slide_period(chan, (chan.porta_param as i32) << 2),
            Effect::TonePorta(_) => self.run_tone_porta(chan),
            Effect::TonePortaVolSlide(_) => {
                self.run_tone_porta(chan);
                self.run_volume_slide(chan);
            }
            Effect::Vibrato { .. } => self.run_vibrato(chan, 4),
            Effect::FineVibrato { .. } => self.run_vibrato(chan, 2),
            Effect::VibratoVolSlide(_) => {
                self.run_vibrato(chan, 4);
                self.run_volume_slide(chan);
            }
            Effect::Tremolo { .. } => {
                chan.tremolo.advance();
                let value = waveform(chan.tremolo.waveform, chan.tremolo.position) as i32;
                chan.volume_offset = (value * chan.tremolo.depth as i32) >> 5;
            }
            Effect::Panbrello { .. } => {
                chan.panbrello.advance();
                let value = waveform(chan.panbrello.waveform, chan.panbrello.position) as i32;
                chan.pan_offset = (value * chan.panbrello.depth as i32) >> 4;
            }
            Effect::VolumeSlide(_) => self.run_volume_slide(chan),
            Effect::ChannelVolumeSlide(_) => {
                let slide = chan.channel_volume_slide;
                let up = slide >> 4;
                let down = slide & 0x0f;
                if down == 0x0f && up > 0 || up == 0x0f && down > 0 {
                    // fine variant, tick-0 only
                } else if up > 0 {
                    chan.channel_volume = (chan.channel_volume + up).min(64);
                } else if down > 0 {
                    chan.channel_volume = chan.channel_volume.saturating_sub(down);
                }
            }
            Effect::PanningSlide(_) => {
                let slide = chan.pan_slide;
                let left = slide >> 4;
                let right = slide & 0x0f;
                if right == 0x0f && left > 0 || left == 0x0f && right > 0 {
                    // fine variant, tick-0 only
                } else if left > 0 {
                    chan.panning = chan.panning.saturating_sub(left << 2);
                } else if right > 0 {
                    chan.panning = (chan.panning as u16 + ((right as u16) << 2)).min(255) as u8;
                }
            }
            Effect::GlobalVolumeSlide(_) => {
                let slide = self.global_slide;
                let up = slide >> 4;
                let down = slide & 0x0f;
                if down == 0x0f && up > 0 || up == 0x0f && down > 0 {
                } else if up > 0 {
                    self.global_volume = (self.global_volume + up as u32).min(128);
                } else if down > 0 {
                    self.global_volume = self.global_volume.saturating_sub(down as u32);
                }
            }
            Effect::Tremor { .. } => {
                let on = (chan.tremor_param >> 4).max(1);
                let off = chan.tremor_param & 0x0f;
                let cycle = on as u32 + off as u32;
                chan.tremor_mute = (chan.tremor_position as u32 % cycle) >= on as u32;
                chan.tremor_position = chan.tremor_position.wrapping_add(1);
            }
            Effect::Retrigger(_) => {
                let interval = chan.retrigger_param & 0x0f;
                if interval != 0 {
                    chan.retrigger_count += 1;
                    if chan.retrigger_count as u32 >= interval as u32 {
                        chan.retrigger_count = 0;
                        chan.pos = 0;
                        chan.pos_lo = 0;
                        chan.reverse = false;
                        chan.playing = chan.length > 0;
                        apply_retrigger_volume(chan);
                    }
                }
            }
            Effect::NoteCut(_) => {
                if tick == chan.note_cut_tick as u32 {
                    chan.volume = 0;
                }
            }
            _ => {}
        }
    }

    fn run_tick_volume_column(&mut self, chan: &mut ChannelState) {
        match chan.row_volume {
            VolumeCommand::VolSlideUp(_) => {
                chan.volume = (chan.volume + chan.vol_column_param).min(64);
            }
            VolumeCommand::VolSlideDown(_) => {
                chan.volume = chan.volume.saturating_sub(chan.vol_column_param);
            }
            VolumeCommand::PortaUp(_) => {
                self.slide_period(chan, -((chan.porta_param as i32) << 2));
            }
            VolumeCommand::PortaDown(_) => {
                self.slide_period(chan, (chan.porta_param as i32) << 2);
            }
            VolumeCommand::TonePorta(_) => self.run_tone_porta(chan),
            VolumeCommand::Vibrato(_) => self.run_vibrato(chan, 4),
            _ => {}
        }
    }

    /// Step the period toward the portamento target without overshoot.
    fn run_tone_porta(&mut self, chan: &mut ChannelState) {
        if chan.porta_dest == 0 || chan.period == 0 {
            return;
        }
        let step = (chan.porta_speed as u32) << 2;
        if chan.period < chan.porta_dest {
            chan.period = (chan.period + step).min(chan.porta_dest);
        } else if chan.period > chan.porta_dest {
            chan.period = chan.period.saturating_sub(step).max(chan.porta_dest);
        }
        if chan.glissando && chan.period != chan.porta_dest {
            // Snap to the nearest semitone of the source note scale
            let mut best = chan.period;
            let mut best_diff = u32::MAX;
            for note in 1..=120u8 {
                let candidate = period_from_note(note, chan.c4_speed);
                let diff = candidate.abs_diff(chan.period);
                if diff < best_diff {
                    best_diff = diff;
                    best = candidate;
                }
            }
            chan.period = self.clamp_period(best);
        }
    }

    /// Vibrato modulates the played period without touching the base.
    fn run_vibrato(&mut self, chan: &mut ChannelState, scale: u32) {
        chan.vibrato.advance();
        let value = waveform(chan.vibrato.waveform, chan.vibrato.position) as i32;
        chan.period_offset += (value * chan.vibrato.depth as i32 * scale as i32) >> 6;
    }

    /// Per-tick voice refresh: envelopes, fades, auto-vibrato, then the
    /// mix increment and ramp targets for every live voice.
    fn update_voices(&mut self) {
        let global_volume = self.global_volume;
        let master = (self.song.master_volume & 0x7f).max(1) as u32;
        let min_period = self.song.min_period;
        let max_period = self.song.max_period;
        let sample_rate = self.sample_rate;
        let stereo = self.song.is_stereo();

        for index in 0..self.channels.len() {
            let muted = self.song.channels[index].muted;
            let mut chan = core::mem::take(&mut self.channels[index]);
            let instrument = self.current_instrument(&chan);
            let vibrato = self
                .song
                .samples
                .get((chan.sample as usize).wrapping_sub(1))
                .and_then(|sample| sample.vibrato);
            update_voice(
                &mut chan,
                instrument,
                vibrato,
                global_volume,
                master,
                min_period,
                max_period,
                sample_rate,
                stereo,
                muted,
            );
            self.channels[index] = chan;
        }

        for ghost in self.ghosts.iter_mut() {
            let instrument = if self.song.flags.instrument_mode && ghost.instrument > 0 {
                self.song.instruments.get(ghost.instrument as usize - 1)
            } else {
                None
            };
            let vibrato = self
                .song
                .samples
                .get((ghost.sample as usize).wrapping_sub(1))
                .and_then(|sample| sample.vibrato);
            update_voice(
                ghost,
                instrument,
                vibrato,
                global_volume,
                master,
                min_period,
                max_period,
                sample_rate,
                stereo,
                false,
            );
        }
        // Drop ghosts that have faded to nothing
        self.ghosts.retain(|ghost| ghost.is_audible());

        debug_assert!(self.active_voices() <= MAX_VOICES);
    }
}

/// Retrigger volume adjustment from the Qxy high nibble.
fn apply_retrigger_volume(chan: &mut ChannelState) {
    let volume = chan.volume as i32;
    chan.volume = match chan.retrigger_param >> 4 {
        1 => (volume - 1).max(0),
        2 => (volume - 2).max(0),
        3 => (volume - 4).max(0),
        4 => (volume - 8).max(0),
        5 => (volume - 16).max(0),
        6 => volume * 2 / 3,
        7 => volume / 2,
        9 => (volume + 1).min(64),
        10 => (volume + 2).min(64),
        11 => (volume + 4).min(64),
        12 => (volume + 8).min(64),
        13 => (volume + 16).min(64),
        14 => (volume * 3 / 2).min(64),
        15 => (volume * 2).min(64),
        _ => volume,
    } as u8;
}

/// Scale a sample's C-4 speed by a channel finetune override.
fn finetuned_c4_speed(sample: &Sample, finetune: i8) -> u32 {
    if finetune == 0 {
        return sample.c4_speed;
    }
    let factor = libm::powf(2.0, finetune as f32 / 96.0);
    (sample.c4_speed as f32 * factor) as u32
}

/// Envelope/fade bookkeeping plus increment and mix-target computation
/// for one voice. Shared between song channels and ghosts.
#[allow(clippy::too_many_arguments)]
fn update_voice(
    chan: &mut ChannelState,
    instrument: Option<&Instrument>,
    vibrato: Option<cs_ir::AutoVibrato>,
    global_volume: u32,
    master: u32,
    min_period: u32,
    max_period: u32,
    sample_rate: u32,
    stereo: bool,
    muted: bool,
) {
    if !chan.playing {
        chan.set_mix_targets(0, 0);
        chan.period_offset = 0;
        chan.volume_offset = 0;
        chan.pan_offset = 0;
        return;
    }

    let mut env_volume: u32 = 64;
    let mut env_pan: i32 = 0;
    if let Some(instrument) = instrument {
        let envelope = &instrument.volume_envelope;
        if envelope.is_enabled() {
            env_volume = chan.volume_env.value(envelope).clamp(0, 64) as u32;
            chan.volume_env.advance(envelope, chan.released);
            if chan.volume_env.finished {
                chan.fading = true;
                if env_volume == 0 {
                    chan.playing = false;
                }
            }
        } else if chan.released {
            chan.fading = true;
        }
        let pan_envelope = &instrument.panning_envelope;
        if pan_envelope.is_enabled() {
            env_pan = chan.panning_env.value(pan_envelope) as i32;
            chan.panning_env.advance(pan_envelope, chan.released);
        }
        let pitch_envelope = &instrument.pitch_envelope;
        if pitch_envelope.is_enabled() {
            let value = chan.pitch_env.value(pitch_envelope) as i32;
            chan.pitch_env.advance(pitch_envelope, chan.released);
            chan.period_offset -= value << 2;
        }
    }

    if chan.fading {
        chan.fade_volume = chan.fade_volume.saturating_sub(chan.fadeout_speed);
        if chan.fade_volume == 0 {
            chan.playing = false;
        }
    }

    // Sample auto-vibrato sweeps its depth up at the sample's rate
    if let Some(vibrato) = vibrato {
        if vibrato.depth > 0 {
            let target = (vibrato.depth as u32) << 8;
            if vibrato.rate == 0 {
                chan.auto_vibrato_depth = target;
            } else {
                chan.auto_vibrato_depth =
                    (chan.auto_vibrato_depth + vibrato.rate as u32).min(target);
            }
            chan.auto_vibrato_pos = chan.auto_vibrato_pos.wrapping_add(vibrato.speed as u32);
            let value = waveform(vibrato.waveform, (chan.auto_vibrato_pos >> 2) as u8) as i32;
            chan.period_offset += (value * (chan.auto_vibrato_depth >> 8) as i32) >> 6;
        }
    }

    if !chan.playing {
        chan.set_mix_targets(0, 0);
        chan.period_offset = 0;
        chan.volume_offset = 0;
        chan.pan_offset = 0;
        return;
    }

    let period = ((chan.period as i64 + chan.period_offset as i64)
        .clamp(min_period as i64, max_period as i64)) as u32;
    chan.increment = period_to_increment(period, sample_rate);

    // Volume pipeline, everything on its own scale
    let mut volume = (chan.volume as i32 + chan.volume_offset).clamp(0, 64) as u32;
    if chan.tremor_mute || muted {
        volume = 0;
    }
    volume = volume * chan.channel_volume as u32 / 64;
    volume = volume * env_volume / 64;
    volume = volume * chan.fade_volume as u32 / 1024;
    volume = volume * chan.sample_volume as u32 / 64;
    volume = volume * chan.instrument_volume as u32 / 128;
    volume = volume * global_volume / 128;
    volume = volume * master / 64;
    let volume = volume.min(64);

    let pan = (chan.panning as i32 + chan.pan_offset + env_pan * 4).clamp(0, 255) as u32;
    let (left, right) = if stereo {
        (volume * (256 - pan) >> 2, volume * pan >> 2)
    } else {
        (volume << 5, volume << 5)
    };
    chan.set_mix_targets(left.min(4096), right.min(4096));

    // Transient offsets rebuild next tick
    chan.period_offset = 0;
    chan.volume_offset = 0;
    chan.pan_offset = 0;
}
