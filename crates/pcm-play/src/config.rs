use std::path::PathBuf;
use std::time::Duration;

use pcm_stream::StreamConfig;

use crate::cli::Args;

#[derive(Clone, Debug)]
pub struct PlayConfig {
    pub paths: Vec<PathBuf>,
    pub device: Option<String>,
    pub sample_rate: u32,
    pub repeat: usize,
    pub stream: StreamConfig,
}

impl PlayConfig {
    pub fn from_args(args: &Args, paths: Vec<PathBuf>, sample_rate: u32, repeat: usize) -> Self {
        Self {
            paths,
            device: normalize_device_name(args.device.clone()),
            sample_rate,
            repeat: repeat.max(1),
            stream: stream_config(args),
        }
    }
}

/// Map the global tuning flags onto the stream config.
pub fn stream_config(args: &Args) -> StreamConfig {
    StreamConfig {
        chunk_bytes: args.chunk_bytes,
        queue_depth: args.queue_depth,
        max_sources: args.max_sources,
        poll_interval: Duration::from_millis(1),
    }
    .normalized()
}

pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }

    #[test]
    fn from_args_normalizes_tuning() {
        let args = Args::parse_from([
            "pcm-play",
            "play",
            "a.pcm",
            "--chunk-bytes",
            "1001",
            "--device",
            " ",
        ]);
        let cfg = PlayConfig::from_args(&args, vec![PathBuf::from("a.pcm")], 22_050, 0);
        assert_eq!(cfg.stream.chunk_bytes, 1000);
        assert_eq!(cfg.device, None);
        assert_eq!(cfg.repeat, 1);
        assert_eq!(cfg.sample_rate, 22_050);
    }
}
