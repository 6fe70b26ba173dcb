//! How `CpalDevice` finds its output.
//!
//! The device is named by substring or left to the host. Among its stream configs
//! the one nearest the player rate wins, with sample format only breaking ties.
//! The callback size is bounded by what a player keeps queued.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Device whose description contains `needle`, ignoring case; the host default
/// when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        if let Some(d) = devices.find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Stream config for PCM arriving at `target_rate`.
///
/// Hitting the rate exactly avoids stepping in the mixer. Otherwise a lower rate is
/// taken over a higher one, and a range with no rate under the target contributes
/// its lowest. With no target the fastest rate is used. Formats the callback
/// cannot write are skipped.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let format_rank = sample_format_rank(range.sample_format());
        if format_rank == UNSUPPORTED_RANK {
            continue;
        }
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = target_rate.map(|t| rate <= t).unwrap_or(true);
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed callback size no larger than `max_frames`.
///
/// `None` leaves the host default in place, either because the device reports no
/// range or because its smallest size is already over `max_frames`.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    max_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            fixed_buffer_frames(*min, *max, max_frames).map(cpal::BufferSize::Fixed)
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print available output devices for `host`.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

const UNSUPPORTED_RANK: u8 = 10;

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => UNSUPPORTED_RANK,
    }
}

fn fixed_buffer_frames(min: u32, max: u32, max_frames: u32) -> Option<u32> {
    if min > max_frames {
        tracing::warn!(min, max_frames, "device callback exceeds the player queue; using host default");
        return None;
    }
    Some(max.clamp(min, max_frames))
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        if below { rate > best_rate } else { rate < best_rate }
    } else {
        format_rank < best_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::output::OutputSelection;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
    }

    #[test]
    fn pick_rate_for_range_defaults_to_max() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn is_better_candidate_prefers_below_target() {
        assert!(is_better_candidate(true, 48_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_closest_rate_above_target() {
        assert!(is_better_candidate(false, 48_000, 1, false, 96_000, 1));
        assert!(!is_better_candidate(false, 96_000, 1, false, 48_000, 1));
    }

    #[test]
    fn is_better_candidate_prefers_lower_rank() {
        assert!(is_better_candidate(true, 48_000, 0, true, 48_000, 2));
    }

    #[test]
    fn callback_never_outruns_a_full_player_queue() {
        let stream = StreamConfig::default();
        let limit = OutputSelection::for_stream(&stream).max_callback_frames;
        let frames = fixed_buffer_frames(64, 8_192, limit).unwrap();
        assert_eq!(frames, 1_024);
        assert!(frames as usize * 2 <= stream.queued_frames());
    }

    #[test]
    fn small_device_ranges_are_used_whole() {
        assert_eq!(fixed_buffer_frames(64, 512, 1_024), Some(512));
    }

    #[test]
    fn oversized_minimum_falls_back_to_host_default() {
        assert_eq!(fixed_buffer_frames(4_096, 8_192, 1_024), None);
    }

    #[test]
    fn unsupported_formats_rank_last() {
        assert_eq!(sample_format_rank(cpal::SampleFormat::U8), UNSUPPORTED_RANK);
        assert!(sample_format_rank(cpal::SampleFormat::I16) < UNSUPPORTED_RANK);
    }
}
