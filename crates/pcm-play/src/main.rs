//! pcm-play: stream raw PCM files to an output device through a pool of reusable
//! device sources.
//!
//! ## Modes
//! - `devices`: list output devices.
//! - `play`: play one or more files concurrently, optionally several rounds.

use anyhow::Result;
use clap::Parser;
use pcm_play::{cli, config::PlayConfig, runtime};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pcm_play=info,pcm_stream=info")
        }))
        .init();

    let _ = ctrlc::set_handler(|| std::process::exit(130));

    match &args.cmd {
        cli::Command::Devices => runtime::list_devices(),
        cli::Command::Play {
            paths,
            sample_rate,
            repeat,
        } => runtime::run_play(PlayConfig::from_args(
            &args,
            paths.clone(),
            *sample_rate,
            *repeat,
        )),
    }
}
