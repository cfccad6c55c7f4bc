//! Audio output device using cpal.
//!
//! The cpal stream lives on its own thread for its whole life, because a
//! stream handle cannot move between threads on every host. The stream
//! callback pulls frames from the shared [`Mixer`].

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, Result};

use super::graph::Mixer;

/// Mixer shared between control code and the audio callback.
pub type SharedMixer = Arc<Mutex<Mixer>>;

/// Locks a mixer, recovering from a poisoned lock.
pub fn lock_mixer(mixer: &SharedMixer) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens output devices on demand.
pub trait DeviceOpener: Send + Sync {
    /// Opens a device, preferring `sample_rate` when the hardware allows it.
    fn open(&self, sample_rate: u32) -> Result<OutputDevice>;
}

/// An open output: a mixer plus whatever is pulling frames from it.
pub struct OutputDevice {
    mixer: SharedMixer,
    sample_rate: u32,
    channels: u16,
    backend: Backend,
}

enum Backend {
    Stream(StreamThread),
    Offline,
    Closed,
}

struct StreamThread {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl OutputDevice {
    /// A device with no hardware behind it; frames are pulled with [`render`](Self::render).
    pub fn offline(sample_rate: u32, channels: u16) -> Self {
        Self {
            mixer: Arc::new(Mutex::new(Mixer::new())),
            sample_rate,
            channels,
            backend: Backend::Offline,
        }
    }

    pub fn mixer(&self) -> &SharedMixer {
        &self.mixer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Renders `frames` interleaved frames from the mixer.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        let mut out = vec![0.0; frames * channels];
        lock_mixer(&self.mixer).render(&mut out, channels);
        out
    }

    /// Stops the stream and drops every voice. Safe to call more than once.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.backend, Backend::Closed) {
            Backend::Stream(stream) => {
                let _ = stream.shutdown.send(());
                if stream.thread.join().is_err() {
                    warn!("audio output thread panicked");
                }
                info!("audio output closed");
            }
            Backend::Offline => debug!("offline output closed"),
            Backend::Closed => return,
        }
        *lock_mixer(&self.mixer) = Mixer::new();
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the host's output device through cpal.
#[derive(Debug, Clone, Default)]
pub struct CpalOpener {
    device_name: Option<String>,
}

impl CpalOpener {
    /// `device_name` of None selects the default output device.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl DeviceOpener for CpalOpener {
    fn open(&self, sample_rate: u32) -> Result<OutputDevice> {
        let mixer: SharedMixer = Arc::new(Mutex::new(Mixer::new()));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_mixer = Arc::clone(&mixer);
        let device_name = self.device_name.clone();
        let thread = std::thread::Builder::new()
            .name("lofi-audio-out".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), sample_rate, thread_mixer) {
                    Ok((stream, config)) => {
                        let _ = ready_tx.send(Ok((config.sample_rate.0, config.channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until close() or the device is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| DaemonError::Playback(format!("Failed to spawn audio thread: {}", e)))?;

        let (actual_rate, channels) = ready_rx
            .recv()
            .map_err(|_| DaemonError::Playback("audio thread exited during setup".to_string()))??;

        if actual_rate != sample_rate {
            info!(requested = sample_rate, actual = actual_rate, "device rate differs; buffers will be resampled");
        }

        Ok(OutputDevice {
            mixer,
            sample_rate: actual_rate,
            channels,
            backend: Backend::Stream(StreamThread {
                shutdown: shutdown_tx,
                thread,
            }),
        })
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| DaemonError::Playback(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!(device = name, "using requested audio device");
            return Ok(device);
        }
        warn!(device = name, "requested device not found, falling back to default");
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| DaemonError::Playback("No default output device found".to_string()))?;
    info!(
        device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
        "using default audio device"
    );
    Ok(device)
}

/// Picks a config at `sample_rate` if the device supports it, else the default.
fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| DaemonError::Playback(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported.find(|c| {
        c.min_sample_rate().0 <= sample_rate
            && c.max_sample_rate().0 >= sample_rate
            && c.sample_format() == SampleFormat::F32
    });
    if let Some(config) = preferred {
        let format = config.sample_format();
        return Ok((config.with_sample_rate(cpal::SampleRate(sample_rate)).config(), format));
    }

    let config = device
        .default_output_config()
        .map_err(|e| DaemonError::Playback(format!("Failed to get default config: {}", e)))?;
    let format = config.sample_format();
    Ok((config.config(), format))
}

fn open_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    mixer: SharedMixer,
) -> Result<(cpal::Stream, StreamConfig)> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let (config, format) = pick_config(&device, sample_rate)?;
    debug!(
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        ?format,
        "audio config"
    );

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer)?,
        other => {
            return Err(DaemonError::Playback(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| DaemonError::Playback(format!("Failed to start stream: {}", e)))?;
    info!("audio stream started");
    Ok((stream, config))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: SharedMixer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                lock_mixer(&mixer).render(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = <T as Sample>::from_sample(*sample);
                }
            },
            |err| error!("audio stream error: {}", err),
            None,
        )
        .map_err(|e| DaemonError::Playback(format!("Failed to build stream: {}", e)))
}

/// Hands out offline devices and remembers their mixers for inspection.
#[derive(Default)]
pub struct OfflineOpener {
    /// Fixed device rate; None opens at whatever rate is requested.
    rate: Option<u32>,
    opened: Mutex<Vec<(SharedMixer, u32)>>,
}

impl OfflineOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices always open at `rate`, regardless of the request.
    pub fn with_rate(rate: u32) -> Self {
        Self {
            rate: Some(rate),
            ..Self::default()
        }
    }

    /// Number of devices opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Mixer and rate of the most recently opened device.
    pub fn last(&self) -> Option<(SharedMixer, u32)> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(mixer, rate)| (Arc::clone(mixer), *rate))
    }
}

impl DeviceOpener for OfflineOpener {
    fn open(&self, sample_rate: u32) -> Result<OutputDevice> {
        let device = OutputDevice::offline(self.rate.unwrap_or(sample_rate), 1);
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Arc::clone(device.mixer()), device.sample_rate()));
        Ok(device)
    }
}
