//! CPAL-backed [`Device`].
//!
//! The CPAL stream lives on its own thread for its whole life, so `CpalDevice`
//! stays `Send` on every platform. Sources and buffers are plain data in a
//! [`mixer::Mixer`] shared with the real-time callback.

mod mixer;
pub mod select;

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::config::StreamConfig;
use crate::device::{BufferId, Device, ErrorCode, SourceId, SourceState};
use mixer::Mixer;

/// Which output device to open and at what rate.
#[derive(Clone, Debug)]
pub struct OutputSelection {
    /// Case-insensitive substring of the device name; `None` for the host default.
    pub device: Option<String>,
    /// Preferred output rate; buffers at other rates are stepped to match.
    pub sample_rate: Option<u32>,
    /// Upper bound on frames rendered per callback.
    pub max_callback_frames: u32,
}

impl OutputSelection {
    /// Selection whose callback drains at most half of one player's full queue,
    /// leaving the other half for the streaming loop to refill.
    pub fn for_stream(config: &StreamConfig) -> Self {
        let frames = config.normalized().queued_frames() / 2;
        Self {
            device: None,
            sample_rate: None,
            max_callback_frames: u32::try_from(frames).unwrap_or(u32::MAX).max(1),
        }
    }
}

impl Default for OutputSelection {
    fn default() -> Self {
        Self::for_stream(&StreamConfig::default())
    }
}

/// Print the output devices of the default host.
pub fn list_devices() -> Result<()> {
    select::list_devices(&cpal::default_host())
}

/// Output stream thread handle; dropping it stops the stream.
struct StreamThread {
    shutdown: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct CpalDevice {
    selection: OutputSelection,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<StreamThread>,
    output_rate: Option<u32>,
}

impl CpalDevice {
    pub fn new(selection: OutputSelection) -> Self {
        Self {
            selection,
            mixer: Arc::new(Mutex::new(Mixer::default())),
            stream: None,
            output_rate: None,
        }
    }

    /// Rate of the running output stream, once opened.
    pub fn output_rate(&self) -> Option<u32> {
        self.output_rate
    }

    fn mixer(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Device for CpalDevice {
    fn open(&mut self) -> anyhow::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32, String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let selection = self.selection.clone();
        let mixer = Arc::clone(&self.mixer);

        let join = thread::Builder::new()
            .name("pcm-output".to_string())
            .spawn(move || run_output_thread(selection, mixer, ready_tx, shutdown_rx))
            .context("spawn output thread")?;
        let stream = StreamThread {
            shutdown: shutdown_tx,
            join: Some(join),
        };

        let rate = ready_rx
            .recv()
            .context("output thread exited before reporting")?
            .map_err(|e| anyhow!(e))?;
        self.output_rate = Some(rate);
        self.stream = Some(stream);
        Ok(())
    }

    fn gen_source(&mut self) -> SourceId {
        self.mixer().gen_source()
    }

    fn gen_buffers(&mut self, n: usize) -> Vec<BufferId> {
        self.mixer().gen_buffers(n)
    }

    fn queue_buffers(&mut self, source: SourceId, buffers: &[BufferId]) {
        self.mixer().queue(source, buffers);
    }

    fn unqueue_buffers(&mut self, source: SourceId, n: usize) -> Vec<BufferId> {
        self.mixer().unqueue(source, n)
    }

    fn buffers_queued(&mut self, source: SourceId) -> usize {
        self.mixer().queued(source)
    }

    fn buffers_processed(&mut self, source: SourceId) -> usize {
        self.mixer().processed(source)
    }

    fn buffer_data(&mut self, buffer: BufferId, pcm: &[u8], sample_rate: u32) {
        self.mixer().buffer_data(buffer, pcm, sample_rate);
    }

    fn play(&mut self, source: SourceId) {
        self.mixer().play(source);
    }

    fn stop(&mut self, source: SourceId) {
        self.mixer().stop(source);
    }

    fn rewind(&mut self, source: SourceId) {
        self.mixer().rewind(source);
    }

    fn state(&mut self, source: SourceId) -> SourceState {
        self.mixer().state(source)
    }

    fn last_error(&mut self) -> ErrorCode {
        self.mixer().take_error()
    }
}

/// Build and run the output stream until `shutdown` fires or its sender drops.
fn run_output_thread(
    selection: OutputSelection,
    mixer: Arc<Mutex<Mixer>>,
    ready: Sender<Result<u32, String>>,
    shutdown: Receiver<()>,
) {
    let stream = match start_stream(&selection, &mixer) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(format!("{e:#}")));
            return;
        }
    };
    let _ = shutdown.recv();
    drop(stream);
    tracing::info!("output stream stopped");
}

fn start_stream(selection: &OutputSelection, mixer: &Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = select::pick_device(&host, selection.device.as_deref())?;
    let config = select::pick_output_config(&device, selection.sample_rate)?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = select::pick_buffer_size(&config, selection.max_callback_frames) {
        stream_config.buffer_size = buf;
    }
    let rate = stream_config.sample_rate;
    mixer
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .set_output_rate(rate);

    let stream = build_output_stream(&device, &stream_config, config.sample_format(), mixer)?;
    stream.play().context("start output stream")?;
    tracing::info!(
        device = %device.description()?,
        rate_hz = rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        "output stream running"
    );
    Ok((stream, rate))
}

/// Build a CPAL output stream rendering from `mixer` in the device sample format.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: &Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, mixer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, mixer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, mixer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, mixer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// The callback renders into a reusable `f32` scratch buffer, then converts. A
/// poisoned mixer renders silence.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: &Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mixer_cb = Arc::clone(mixer);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len(), 0.0);
            match mixer_cb.lock() {
                Ok(mut m) => m.render(&mut scratch, channels),
                Err(_) => scratch.fill(0.0),
            }
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = <T as cpal::Sample>::from_sample::<f32>(*sample);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
