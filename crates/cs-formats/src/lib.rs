//! Module format loaders for chipstream.
//!
//! Sniffs and parses MOD, S3M, STM, AON and IT files into the uniform
//! [`Song`] model. Parsing is strict: any magic mismatch, inconsistent
//! size field or out-of-range pointer fails the whole load and no
//! partial state survives.

use std::fmt;

use cs_ir::Song;
use tracing::debug;

mod aon_format;
mod it_format;
mod it_sample;
mod mod_format;
mod reader;
mod s3m_format;
mod stm_format;

pub use aon_format::load_aon;
pub use it_format::load_it;
pub use mod_format::load_mod;
pub use reader::Reader;
pub use s3m_format::load_s3m;
pub use stm_format::load_stm;

/// The module formats this crate can identify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleFormat {
    Mod,
    S3m,
    Stm,
    Aon,
    It,
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleFormat::Mod => "ProTracker MOD",
            ModuleFormat::S3m => "Scream Tracker 3",
            ModuleFormat::Stm => "Scream Tracker 2",
            ModuleFormat::Aon => "Art of Noise",
            ModuleFormat::It => "Impulse Tracker",
        };
        f.write_str(name)
    }
}

/// Error type for format parsing.
#[derive(Debug, PartialEq, Eq)]
pub enum FormatError {
    /// Magic bytes did not match the expected format signature
    BadSignature(ModuleFormat),
    /// A read or seek ran past the end of the file
    Truncated,
    /// A size or index field was outside its contract
    InvalidField(&'static str),
    /// The IT sample decompressor hit a malformed stream
    Corrupt,
    /// A recognised format that is deliberately not implemented
    Unsupported(&'static str),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadSignature(format) => write!(f, "bad {format} signature"),
            FormatError::Truncated => write!(f, "file truncated"),
            FormatError::InvalidField(which) => write!(f, "invalid field: {which}"),
            FormatError::Corrupt => write!(f, "compressed sample stream corrupt"),
            FormatError::Unsupported(what) => write!(f, "unsupported format: {what}"),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<binrw::Error> for FormatError {
    fn from(_: binrw::Error) -> Self {
        FormatError::Truncated
    }
}

/// Identify the module format of a byte image from its signatures.
pub fn detect(data: &[u8]) -> Option<ModuleFormat> {
    if data.len() >= 4 && &data[0..4] == b"IMPM" {
        return Some(ModuleFormat::It);
    }
    if data.len() >= 4 && (&data[0..4] == b"AON4" || &data[0..4] == b"AON8") {
        return Some(ModuleFormat::Aon);
    }
    if data.len() >= 48 && &data[44..48] == b"SCRM" {
        return Some(ModuleFormat::S3m);
    }
    if data.len() >= 29 && &data[20..29] == b"!Scream!\x1a" {
        return Some(ModuleFormat::Stm);
    }
    if data.len() >= 1084 && mod_format::channels_from_magic(&data[1080..1084]).is_some() {
        return Some(ModuleFormat::Mod);
    }
    None
}

/// Sniff and load a module from a byte image.
pub fn load_module(data: &[u8]) -> Result<Song, FormatError> {
    if data.len() >= 4 && (&data[0..4] == b"SMOD" || &data[0..4] == b"FC14") {
        return Err(FormatError::Unsupported("Future Composer"));
    }
    let format = detect(data).ok_or(FormatError::Unsupported("unrecognised module"))?;
    debug!(%format, bytes = data.len(), "loading module");
    match format {
        ModuleFormat::Mod => load_mod(data),
        ModuleFormat::S3m => load_s3m(data),
        ModuleFormat::Stm => load_stm(data),
        ModuleFormat::Aon => load_aon(data),
        ModuleFormat::It => load_it(data),
    }
}
