//! Stream parameters and metadata reported by `info()`.

use cs_emu::SndhMetadata;
use cs_engine::Player;

/// What the dispatch layer needs to know about an open source.
#[derive(Clone, Debug)]
pub struct FileInfo {
    /// Output rate in Hz
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    /// Interleaved output channels (1 or 2)
    pub channels: u8,
    /// Estimated play time, when the format allows estimating one
    pub total_time_secs: Option<f64>,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Free-form remarks (song message, converter credits, ...)
    pub comments: Vec<String>,
}

impl FileInfo {
    pub(crate) fn from_module(player: &Player) -> Self {
        let song = player.song();
        let mut comments = Vec::new();
        if let Some(remark) = &song.remark {
            if !remark.is_empty() {
                comments.push(remark.clone());
            }
        }
        Self {
            sample_rate: player.sample_rate(),
            bits_per_sample: 16,
            channels: player.output_channels(),
            total_time_secs: Some(player.estimate_duration_secs()),
            title: song.title.clone(),
            artist: song.author.clone(),
            album: None,
            comments,
        }
    }

    pub(crate) fn from_sndh(metadata: &SndhMetadata, sample_rate: u32) -> Self {
        let mut comments = Vec::new();
        if let Some(converter) = &metadata.converter {
            comments.push(format!("converted by {converter}"));
        }
        if let Some(ripper) = &metadata.ripper {
            comments.push(format!("ripped by {ripper}"));
        }
        if let Some(year) = &metadata.year {
            comments.push(year.clone());
        }
        Self {
            sample_rate,
            bits_per_sample: 16,
            // The PSG render path is mono
            channels: 1,
            total_time_secs: None,
            title: metadata.title.clone().unwrap_or_default(),
            artist: metadata.artist.clone(),
            album: None,
            comments,
        }
    }
}
