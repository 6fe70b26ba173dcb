//! pcm-play runtime helpers.
//!
//! Provides device enumeration and concurrent playback of raw PCM files.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use pcm_stream::output::{self, CpalDevice, OutputSelection};
use pcm_stream::{Context, Device, Error, Player};

use crate::config::PlayConfig;

/// Outcome counts for one round of playback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub finished: usize,
    pub failed: usize,
    /// Files skipped because the source pool was full.
    pub skipped: usize,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    output::list_devices()
}

/// Play every configured file concurrently, `repeat` times.
pub fn run_play(config: PlayConfig) -> Result<()> {
    let device = CpalDevice::new(OutputSelection {
        device: config.device.clone(),
        sample_rate: Some(config.sample_rate),
        ..OutputSelection::for_stream(&config.stream)
    });
    let ctx = Context::with_config(device, config.stream.clone());

    for round in 1..=config.repeat {
        tracing::info!(round, files = config.paths.len(), "starting round");
        let summary = play_round(&ctx, &config.paths, config.sample_rate)?;
        let pool = ctx.pool_status();
        tracing::info!(
            round,
            finished = summary.finished,
            failed = summary.failed,
            skipped = summary.skipped,
            pooled_sources = pool.sources,
            max_sources = pool.max_sources,
            "round finished"
        );
    }
    Ok(())
}

/// Open and start one player per file, then wait for all of them.
pub fn play_round<D: Device>(
    ctx: &Context<D>,
    paths: &[PathBuf],
    sample_rate: u32,
) -> Result<RoundSummary> {
    let mut summary = RoundSummary::default();
    let mut players: Vec<(&PathBuf, Player<D>)> = Vec::with_capacity(paths.len());

    for path in paths {
        let file = File::open(path).with_context(|| format!("open {path:?}"))?;
        match ctx.open_player(BufReader::new(file), sample_rate) {
            Ok(mut player) => {
                player
                    .play()
                    .with_context(|| format!("start playback of {path:?}"))?;
                players.push((path, player));
            }
            Err(Error::TooManyResources { max_sources }) => {
                tracing::warn!(path = ?path, max_sources, "no free source; skipping file");
                summary.skipped += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("open player for {path:?}")),
        }
    }

    for (path, mut player) in players {
        let result = player.wait();
        let stats = player.stats();
        match result {
            Ok(()) => {
                tracing::info!(
                    path = ?path,
                    bytes = stats.bytes_queued,
                    queued_ms = ?stats.queued_ms,
                    underrun_recoveries = stats.underrun_recoveries,
                    "playback finished"
                );
                summary.finished += 1;
            }
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "playback failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
