//! chipstream CLI: print what a file is and play it.

use std::process::ExitCode;

use cs_master::{AudioFile, PlayerState};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: chipstream <file>");
        return ExitCode::FAILURE;
    };

    let mut file = match AudioFile::open(&path) {
        Ok(file) => file,
        Err(e) => {
            error!("{path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let info = file.info();
    println!("title:    {}", info.title);
    if let Some(artist) = &info.artist {
        println!("artist:   {artist}");
    }
    println!(
        "format:   {} Hz, {}-bit, {} channel{}",
        info.sample_rate,
        info.bits_per_sample,
        info.channels,
        if info.channels == 1 { "" } else { "s" }
    );
    if let Some(secs) = info.total_time_secs {
        println!("length:   {}:{:02}", secs as u64 / 60, secs as u64 % 60);
    }
    for comment in &info.comments {
        println!("          {comment}");
    }

    if let Err(e) = file.play() {
        error!("playback failed: {e}");
        return ExitCode::FAILURE;
    }
    file.wait_until_done();
    if file.state() != PlayerState::Stopped {
        file.stop();
    }
    ExitCode::SUCCESS
}
