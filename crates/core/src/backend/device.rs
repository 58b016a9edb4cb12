//! Audio device plumbing for the software backend.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread
//! that parks until the device is closed. Open failures are reported back
//! synchronously through a channel, which lets sonifier construction fail
//! with [`SonifierError::DeviceUnavailable`] before any audio is expected.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{Result, SonifierError};

use super::graph::GraphEngine;

/// Logical name that selects the host's default output device.
pub const DEFAULT_DEVICE: &str = "default";

pub(crate) struct OutputDevice {
    shutdown: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl OutputDevice {
    pub(crate) fn open(name: &str, engine: Arc<Mutex<GraphEngine>>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<u32, String>>();
        let name = name.to_string();

        let thread = thread::Builder::new()
            .name("sonifier-output".into())
            .spawn(move || {
                let stream = match build_stream(&name, engine) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(message) => {
                        let _ = ready_tx.send(Err(message));
                        return;
                    }
                };
                // Parks until close() or the owning backend is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Self {
                shutdown: shutdown_tx,
                thread: Some(thread),
                sample_rate,
            }),
            Ok(Err(message)) => {
                let _ = thread.join();
                Err(SonifierError::DeviceUnavailable(message))
            }
            Err(_) => Err(SonifierError::DeviceUnavailable(
                "output thread exited before reporting readiness".into(),
            )),
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn build_stream(
    name: &str,
    engine: Arc<Mutex<GraphEngine>>,
) -> std::result::Result<(cpal::Stream, u32), String> {
    let host = cpal::default_host();
    let device = if name == DEFAULT_DEVICE {
        host.default_output_device()
            .ok_or_else(|| "no default output device".to_string())?
    } else {
        host.output_devices()
            .map_err(|err| format!("cannot enumerate output devices: {err}"))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("no output device named `{name}`"))?
    };

    let config = device
        .default_output_config()
        .map_err(|err| format!("cannot query output config: {err}"))?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    engine
        .lock()
        .map_err(|_| "synthesis graph has been poisoned".to_string())?
        .set_sample_rate(sample_rate);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => run::<f32>(&device, &config.into(), engine, channels),
        cpal::SampleFormat::I16 => run::<i16>(&device, &config.into(), engine, channels),
        cpal::SampleFormat::U16 => run::<u16>(&device, &config.into(), engine, channels),
        other => Err(format!("unsupported sample format {other:?}")),
    }?;

    Ok((stream, sample_rate))
}

fn run<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    engine: Arc<Mutex<GraphEngine>>,
    channels: usize,
) -> std::result::Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                scratch.resize(frames * 2, 0.0);
                match engine.lock() {
                    Ok(mut engine) => engine.render(&mut scratch),
                    Err(_) => scratch.fill(0.0),
                }
                for frame in 0..frames {
                    let left = scratch[frame * 2];
                    let right = scratch[frame * 2 + 1];
                    for channel in 0..channels {
                        let value = match channel {
                            0 if channels == 1 => (left + right) * 0.5,
                            0 => left,
                            1 => right,
                            _ => 0.0,
                        };
                        data[frame * channels + channel] = T::from_sample(value);
                    }
                }
            },
            |err| tracing::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|err| format!("cannot build output stream: {err}"))?;

    stream
        .play()
        .map_err(|err| format!("cannot start output stream: {err}"))?;

    Ok(stream)
}
