use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pcm-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Bytes pulled from the source per device buffer (rounded down to whole frames)
    #[arg(long, global = true, default_value_t = 1024)]
    pub chunk_bytes: usize,

    /// Buffers kept in flight per player. Lower => less latency, more underruns
    #[arg(long, global = true, default_value_t = 8)]
    pub queue_depth: usize,

    /// Maximum device sources the pool may allocate
    #[arg(long, global = true, default_value_t = 32)]
    pub max_sources: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    Devices,

    /// Play raw PCM files (interleaved s16le stereo), all at once
    Play {
        /// Paths to raw PCM files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Sample rate of the PCM data in Hz
        #[arg(long, default_value_t = 44_100)]
        sample_rate: u32,

        /// Play the set this many times; later rounds reuse pooled sources
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_defaults_match_stream_constants() {
        let args = Args::parse_from(["pcm-play", "play", "a.pcm"]);
        assert_eq!(args.chunk_bytes, 1024);
        assert_eq!(args.queue_depth, 8);
        assert_eq!(args.max_sources, 32);
        match args.cmd {
            Command::Play {
                paths,
                sample_rate,
                repeat,
            } => {
                assert_eq!(paths, vec![PathBuf::from("a.pcm")]);
                assert_eq!(sample_rate, 44_100);
                assert_eq!(repeat, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::parse_from([
            "pcm-play",
            "play",
            "a.pcm",
            "b.pcm",
            "--sample-rate",
            "48000",
            "--device",
            "usb",
            "--queue-depth",
            "4",
        ]);
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert_eq!(args.queue_depth, 4);
        assert!(matches!(args.cmd, Command::Play { sample_rate: 48_000, ref paths, .. } if paths.len() == 2));
    }

    #[test]
    fn play_requires_a_path() {
        assert!(Args::try_parse_from(["pcm-play", "play"]).is_err());
    }
}
