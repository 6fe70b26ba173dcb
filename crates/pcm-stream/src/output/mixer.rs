//! Source and buffer state behind [`super::CpalDevice`].
//!
//! The output callback renders from here while device calls mutate it, both under
//! the same mutex. Each playing source walks its queue front to back, stepping
//! through a buffer at `buffer_rate / output_rate` frames per output frame;
//! finished buffers stay queued and count as processed until unqueued.

use std::collections::{HashMap, VecDeque};

use crate::device::{BufferId, ErrorCode, SourceId, SourceState};

/// Interleaved stereo samples plus the rate they were written at.
#[derive(Debug, Default)]
struct Pcm {
    samples: Vec<i16>,
    rate: u32,
}

#[derive(Debug)]
struct Voice {
    queue: VecDeque<BufferId>,
    processed: usize,
    /// Fractional frame position inside `queue[processed]`.
    pos: f64,
    state: SourceState,
}

impl Voice {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            processed: 0,
            pos: 0.0,
            state: SourceState::Initial,
        }
    }

    /// Next stereo frame, or `None` when the queue ran dry.
    fn next_frame(&mut self, buffers: &HashMap<BufferId, Pcm>, out_rate: u32) -> Option<(f32, f32)> {
        loop {
            let id = *self.queue.get(self.processed)?;
            let frames = buffers.get(&id).map(|p| p.samples.len() / 2).unwrap_or(0);
            let idx = self.pos as usize;
            if idx >= frames {
                self.processed += 1;
                self.pos = (self.pos - frames as f64).max(0.0);
                continue;
            }
            let pcm = &buffers[&id];
            let l = f32::from(pcm.samples[idx * 2]) / 32_768.0;
            let r = f32::from(pcm.samples[idx * 2 + 1]) / 32_768.0;
            self.pos += f64::from(pcm.rate.max(1)) / f64::from(out_rate.max(1));
            return Some((l, r));
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Mixer {
    voices: HashMap<SourceId, Voice>,
    buffers: HashMap<BufferId, Pcm>,
    next_id: u32,
    out_rate: u32,
    error: ErrorCode,
}

impl Mixer {
    pub(crate) fn set_output_rate(&mut self, rate: u32) {
        self.out_rate = rate;
    }

    pub(crate) fn take_error(&mut self) -> ErrorCode {
        std::mem::take(&mut self.error)
    }

    fn set_error(&mut self, code: ErrorCode) {
        if !self.error.is_error() {
            self.error = code;
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn voice(&mut self, source: SourceId) -> Option<&mut Voice> {
        if !self.voices.contains_key(&source) {
            self.set_error(ErrorCode::INVALID_NAME);
        }
        self.voices.get_mut(&source)
    }

    pub(crate) fn gen_source(&mut self) -> SourceId {
        let id = SourceId(self.next_id());
        self.voices.insert(id, Voice::new());
        id
    }

    pub(crate) fn gen_buffers(&mut self, n: usize) -> Vec<BufferId> {
        (0..n)
            .map(|_| {
                let id = BufferId(self.next_id());
                self.buffers.insert(id, Pcm::default());
                id
            })
            .collect()
    }

    pub(crate) fn queue(&mut self, source: SourceId, buffers: &[BufferId]) {
        if buffers.iter().any(|b| !self.buffers.contains_key(b)) {
            self.set_error(ErrorCode::INVALID_NAME);
            return;
        }
        if let Some(voice) = self.voice(source) {
            voice.queue.extend(buffers.iter().copied());
        }
    }

    pub(crate) fn unqueue(&mut self, source: SourceId, n: usize) -> Vec<BufferId> {
        let Some(voice) = self.voice(source) else {
            return Vec::new();
        };
        if n > voice.processed {
            self.set_error(ErrorCode::INVALID_VALUE);
            return Vec::new();
        }
        voice.processed -= n;
        voice.queue.drain(..n).collect()
    }

    pub(crate) fn queued(&mut self, source: SourceId) -> usize {
        self.voice(source).map(|v| v.queue.len()).unwrap_or(0)
    }

    pub(crate) fn processed(&mut self, source: SourceId) -> usize {
        self.voice(source).map(|v| v.processed).unwrap_or(0)
    }

    pub(crate) fn buffer_data(&mut self, buffer: BufferId, pcm: &[u8], rate: u32) {
        if pcm.len() % crate::device::FRAME_BYTES != 0 || rate == 0 {
            self.set_error(ErrorCode::INVALID_VALUE);
            return;
        }
        let Some(slot) = self.buffers.get_mut(&buffer) else {
            self.set_error(ErrorCode::INVALID_NAME);
            return;
        };
        slot.samples = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        slot.rate = rate;
    }

    pub(crate) fn play(&mut self, source: SourceId) {
        if let Some(voice) = self.voice(source) {
            if voice.state == SourceState::Stopped {
                voice.processed = 0;
                voice.pos = 0.0;
            }
            voice.state = if voice.processed < voice.queue.len() {
                SourceState::Playing
            } else {
                SourceState::Stopped
            };
        }
    }

    pub(crate) fn stop(&mut self, source: SourceId) {
        if let Some(voice) = self.voice(source) {
            voice.processed = voice.queue.len();
            voice.pos = 0.0;
            voice.state = SourceState::Stopped;
        }
    }

    pub(crate) fn rewind(&mut self, source: SourceId) {
        if let Some(voice) = self.voice(source) {
            voice.processed = 0;
            voice.pos = 0.0;
            voice.state = SourceState::Initial;
        }
    }

    pub(crate) fn state(&mut self, source: SourceId) -> SourceState {
        self.voice(source)
            .map(|v| v.state)
            .unwrap_or(SourceState::Initial)
    }

    /// Sum every playing source into `out` (interleaved, `channels` wide).
    ///
    /// A source whose queue runs dry mid-callback is marked stopped (underrun).
    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }
        let Mixer {
            voices,
            buffers,
            out_rate,
            ..
        } = self;
        for voice in voices.values_mut() {
            if voice.state != SourceState::Playing {
                continue;
            }
            for frame in out.chunks_exact_mut(channels) {
                let Some((l, r)) = voice.next_frame(buffers, *out_rate) else {
                    voice.state = SourceState::Stopped;
                    break;
                };
                mix_frame(frame, l, r);
            }
        }
        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Add one stereo frame to an output frame of any width.
///
/// Mapping rules:
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - wider layouts: L/R on the first two channels, the rest untouched
fn mix_frame(frame: &mut [f32], l: f32, r: f32) {
    match frame {
        [mono] => *mono += 0.5 * (l + r),
        [left, right, ..] => {
            *left += l;
            *right += r;
        }
        [] => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(frames: &[(i16, i16)]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|(l, r)| {
                let mut b = l.to_le_bytes().to_vec();
                b.extend_from_slice(&r.to_le_bytes());
                b
            })
            .collect()
    }

    fn voice_with(mixer: &mut Mixer, chunks: &[Vec<u8>], rate: u32) -> SourceId {
        let source = mixer.gen_source();
        let buffers = mixer.gen_buffers(chunks.len());
        for (b, data) in buffers.iter().zip(chunks) {
            mixer.buffer_data(*b, data, rate);
        }
        mixer.queue(source, &buffers);
        source
    }

    #[test]
    fn render_walks_the_queue_and_marks_processed() {
        let mut mixer = Mixer::default();
        mixer.set_output_rate(100);
        let half = i16::MAX / 2 + 1;
        let source = voice_with(
            &mut mixer,
            &[pcm(&[(half, 0), (half, 0)]), pcm(&[(0, half)])],
            100,
        );
        mixer.play(source);

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.0, 0.5, 0.0]);
        assert_eq!(mixer.processed(source), 0);

        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.0, 0.5, 0.0, 0.0]);
        assert_eq!(mixer.processed(source), 2);
        assert_eq!(mixer.state(source), SourceState::Stopped);
    }

    #[test]
    fn render_steps_by_rate_ratio() {
        let mut mixer = Mixer::default();
        mixer.set_output_rate(200);
        let source = voice_with(&mut mixer, &[pcm(&[(1000, 1000), (2000, 2000)])], 100);
        mixer.play(source);

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);
        let expected: Vec<f32> = [1000.0, 1000.0, 2000.0, 2000.0]
            .iter()
            .map(|v| v / 32_768.0)
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn render_sums_and_clamps_sources() {
        let mut mixer = Mixer::default();
        mixer.set_output_rate(10);
        let a = voice_with(&mut mixer, &[pcm(&[(i16::MAX, i16::MIN)])], 10);
        let b = voice_with(&mut mixer, &[pcm(&[(i16::MAX, i16::MIN)])], 10);
        mixer.play(a);
        mixer.play(b);

        let mut out = vec![0.0f32; 2];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![1.0, -1.0]);
    }

    #[test]
    fn stopped_sources_are_silent() {
        let mut mixer = Mixer::default();
        mixer.set_output_rate(10);
        let source = voice_with(&mut mixer, &[pcm(&[(100, 100)])], 10);
        mixer.play(source);
        mixer.stop(source);

        let mut out = vec![1.0f32; 2];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.0, 0.0]);
        assert_eq!(mixer.unqueue(source, 1).len(), 1);
    }

    #[test]
    fn one_callback_leaves_a_full_player_queue_playing() {
        let stream = crate::config::StreamConfig::default();
        let frames = crate::output::OutputSelection::for_stream(&stream).max_callback_frames as usize;
        let chunk = pcm(&vec![(1_000, -1_000); stream.chunk_bytes / crate::device::FRAME_BYTES]);

        let mut mixer = Mixer::default();
        mixer.set_output_rate(44_100);
        let source = voice_with(&mut mixer, &vec![chunk; stream.queue_depth], 44_100);
        mixer.play(source);

        let mut out = vec![0.0f32; frames * 2];
        mixer.render(&mut out, 2);
        assert!(out.iter().all(|s| *s != 0.0));
        assert_eq!(mixer.state(source), SourceState::Playing);
        assert!(mixer.processed(source) < stream.queue_depth);
    }

    #[test]
    fn misaligned_buffer_data_sets_invalid_value() {
        let mut mixer = Mixer::default();
        let buffer = mixer.gen_buffers(1)[0];
        mixer.buffer_data(buffer, &[0, 1, 2], 44_100);
        assert_eq!(mixer.take_error(), ErrorCode::INVALID_VALUE);
        assert_eq!(mixer.take_error(), ErrorCode::NONE);
    }

    #[test]
    fn mix_frame_maps_channels() {
        let mut mono = [0.0f32];
        mix_frame(&mut mono, 0.5, 0.25);
        assert_eq!(mono, [0.375]);

        let mut surround = [0.0f32; 4];
        mix_frame(&mut surround, 0.5, 0.25);
        assert_eq!(surround, [0.5, 0.25, 0.0, 0.0]);
    }
}
