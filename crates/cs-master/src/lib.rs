//! The pull-based decode API for chipstream.
//!
//! [`AudioFile::open`] sniffs the file type, builds the right decoder
//! (tracker module player or Atari ST emulator) and exposes one
//! surface: `info`, `fill_buffer`, `play`/`pause`/`stop`. All decoding
//! happens on the caller's thread inside `fill_buffer`; the optional
//! internal playback thread just pulls the same interface and feeds
//! the audio backend.

mod fileinfo;
mod playback;

use std::fmt;
use std::path::Path;

use cs_emu::{AtariSt, EmuError, SndhTune};
use cs_engine::{Interpolation, Player};
use cs_formats::FormatError;
use tracing::{debug, warn};

pub use cs_audio::{AudioError, CpalSink, PcmSink};
pub use cs_ir::Song;
pub use fileinfo::FileInfo;
pub use playback::PlayerState;

use playback::PlaybackHandle;

/// `fill_buffer` error returns.
pub const FILL_ERR_DECODE: i64 = -1;
pub const FILL_ERR_PAST_END: i64 = -2;
pub const FILL_ERR_ARGS: i64 = -3;

/// Options for [`AudioFile::open`].
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    /// Output sample rate for module rendering and PSG sampling
    pub sample_rate: u32,
    /// When set, the caller drives `fill_buffer` itself and `play`
    /// only flips the state flag
    pub external_playback: bool,
    /// Module mixer interpolation quality
    pub interpolation: Interpolation,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            external_playback: false,
            interpolation: Interpolation::default(),
        }
    }
}

/// Error type for `open`.
#[derive(Debug)]
pub enum OpenError {
    Io(String),
    Format(FormatError),
    Emu(EmuError),
    Unrecognised,
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::Io(e) => write!(f, "i/o error: {e}"),
            OpenError::Format(e) => write!(f, "module load failed: {e}"),
            OpenError::Emu(e) => write!(f, "tune load failed: {e}"),
            OpenError::Unrecognised => write!(f, "unrecognised file type"),
        }
    }
}

impl std::error::Error for OpenError {}

impl From<FormatError> for OpenError {
    fn from(e: FormatError) -> Self {
        OpenError::Format(e)
    }
}

impl From<EmuError> for OpenError {
    fn from(e: EmuError) -> Self {
        OpenError::Emu(e)
    }
}

/// The decoding engine behind a handle.
pub(crate) enum Decoder {
    Module(Box<Player>),
    Sndh(Box<AtariSt>),
}

impl Decoder {
    /// Fill `out` with interleaved little-endian 16-bit PCM. Returns
    /// bytes written; 0 at end of stream, negative on error.
    pub(crate) fn fill(&mut self, out: &mut [u8]) -> i64 {
        match self {
            Decoder::Module(player) => {
                let mut scratch = vec![0i16; out.len() / 2];
                let mut written = 0usize;
                // Keep mixing until the buffer is full or the song ends
                while written < scratch.len() {
                    let got = player.mix(&mut scratch[written..]);
                    if got == 0 {
                        break;
                    }
                    written += got;
                }
                for (bytes, sample) in out.chunks_exact_mut(2).zip(&scratch[..written]) {
                    bytes.copy_from_slice(&sample.to_le_bytes());
                }
                (written * 2) as i64
            }
            Decoder::Sndh(machine) => {
                for slot in out.chunks_exact_mut(2) {
                    while !machine.sample_ready() {
                        if !machine.advance_clock() {
                            warn!("emulator fault: {}", machine.cpu_state());
                            return FILL_ERR_DECODE;
                        }
                    }
                    slot.copy_from_slice(&machine.read_sample().to_le_bytes());
                }
                (out.len() & !1) as i64
            }
        }
    }
}

/// An open audio source.
pub struct AudioFile {
    info: FileInfo,
    options: OpenOptions,
    /// Taken by the playback thread while it runs
    decoder: Option<Decoder>,
    playback: Option<PlaybackHandle>,
    past_end: bool,
}

impl AudioFile {
    /// Open a file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OpenError> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, OpenError> {
        let data = std::fs::read(path.as_ref()).map_err(|e| OpenError::Io(e.to_string()))?;
        Self::open_bytes(&data, options)
    }

    /// Open from an in-memory image.
    pub fn open_bytes(data: &[u8], options: OpenOptions) -> Result<Self, OpenError> {
        if cs_emu::sndh::is_sndh(data) {
            let tune = SndhTune::parse(data)?;
            let mut machine = AtariSt::new(options.sample_rate);
            machine.configure_timer(tune.metadata.timer);
            machine.load_tune(&tune)?;
            machine.init(tune.metadata.default_subtune)?;
            let info = FileInfo::from_sndh(&tune.metadata, options.sample_rate);
            debug!(title = %info.title, "opened SNDH tune");
            return Ok(Self {
                info,
                options,
                decoder: Some(Decoder::Sndh(Box::new(machine))),
                playback: None,
                past_end: false,
            });
        }

        if cs_formats::detect(data).is_some() {
            let song = cs_formats::load_module(data)?;
            let mut player = Player::new(song, options.sample_rate);
            player.set_interpolation(options.interpolation);
            let info = FileInfo::from_module(&player);
            debug!(title = %info.title, "opened module");
            return Ok(Self {
                info,
                options,
                decoder: Some(Decoder::Module(Box::new(player))),
                playback: None,
                past_end: false,
            });
        }

        Err(OpenError::Unrecognised)
    }

    /// Stream parameters and metadata.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Pull decoded PCM. The buffer length must be a positive multiple
    /// of the frame size; short reads only happen at end of stream.
    pub fn fill_buffer(&mut self, out: &mut [u8]) -> i64 {
        let frame_bytes = self.info.channels as usize * 2;
        if out.is_empty() || out.len() % frame_bytes != 0 {
            return FILL_ERR_ARGS;
        }
        if self.past_end {
            return FILL_ERR_PAST_END;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            // The playback thread owns the decoder right now
            return FILL_ERR_ARGS;
        };
        let written = decoder.fill(out);
        if written == 0 {
            self.past_end = true;
        }
        written
    }

    /// Current playback state.
    pub fn state(&self) -> PlayerState {
        self.playback.as_ref().map_or(PlayerState::Stopped, |p| p.state())
    }

    /// Start (or resume) playback. Without external playback this
    /// spawns the feeder thread on first use.
    pub fn play(&mut self) -> Result<(), AudioError> {
        if let Some(playback) = &self.playback {
            playback.set_state(PlayerState::Playing);
            return Ok(());
        }
        if self.options.external_playback {
            return Ok(());
        }
        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => return Ok(()),
        };
        let channels = self.info.channels;
        self.playback = Some(PlaybackHandle::spawn(decoder, channels)?);
        Ok(())
    }

    /// Pause at the next buffer boundary.
    pub fn pause(&mut self) {
        if let Some(playback) = &self.playback {
            playback.set_state(PlayerState::Paused);
        }
    }

    /// Stop playback and reclaim the decoder.
    pub fn stop(&mut self) {
        if let Some(playback) = self.playback.take() {
            if let Some(decoder) = playback.join() {
                self.decoder = Some(decoder);
            }
        }
    }

    /// Block until the feeder thread finishes the song.
    pub fn wait_until_done(&mut self) {
        if let Some(playback) = self.playback.take() {
            if let Some(decoder) = playback.wait() {
                self.decoder = Some(decoder);
            }
        }
    }
}

impl Drop for AudioFile {
    fn drop(&mut self) {
        self.stop();
    }
}
