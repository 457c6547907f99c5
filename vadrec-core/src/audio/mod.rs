//! Audio capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate beyond a single copy, block on a lock, or do I/O.
//! This module satisfies that contract by pushing each
//! incoming block onto an unbounded `crossbeam_channel` — cloning the block
//! once into an owned `Vec<f32>` and sending it is the only allocation in
//! the callback's steady-state path.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioSource` must therefore be created and dropped on the same
//! OS thread — in practice, the orchestrator's capture-loop thread.

pub mod device;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use tracing::{error, info, warn};

use crate::error::{Result, VadrecError};
use device::{DeviceInfo, DeviceSelector};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — bound to its creation thread on Windows/macOS. Create
/// and drop this value on the same OS thread that opened it.
pub struct AudioSource {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
}

impl AudioSource {
    /// Open an input stream for `selector` at the given sample rate, channel
    /// count, and chunk size, pushing mono f32 blocks onto `tx`.
    ///
    /// Returns the resolved [`DeviceInfo`] alongside the handle so the
    /// caller can fingerprint it for the device supervisor.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        selector: &DeviceSelector,
        sample_rate: u32,
        channels: u16,
        chunk_samples: usize,
        tx: Sender<Vec<f32>>,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, DeviceInfo)> {
        let (cpal_device, info) = resolve_device(selector)?;

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Fixed(chunk_samples as u32),
        };

        let sample_format = cpal_device
            .default_input_config()
            .map(|c| c.sample_format())
            .unwrap_or(SampleFormat::F32);

        info!(device = info.label().as_str(), sample_rate, channels, "opening input device");

        let stream = build_stream(&cpal_device, &config, sample_format, channels, tx)
            .map_err(|e| VadrecError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VadrecError::AudioStream(e.to_string()))?;

        Ok((
            Self {
                _stream: stream,
                running,
            },
            info,
        ))
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _selector: &DeviceSelector,
        _sample_rate: u32,
        _channels: u16,
        _chunk_samples: usize,
        _tx: Sender<Vec<f32>>,
        _running: Arc<AtomicBool>,
    ) -> Result<(Self, DeviceInfo)> {
        Err(VadrecError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to stop enqueuing blocks. The stream itself is
    /// closed when this value is dropped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream(
    cpal_device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: u16,
    tx: Sender<Vec<f32>>,
) -> std::result::Result<Stream, cpal::BuildStreamError> {
    let ch = channels as usize;

    match sample_format {
        SampleFormat::F32 => cpal_device.build_input_stream(
            config,
            move |data: &[f32], _info| push_mixed_down(data, ch, &tx, |s| s),
            |err| error!("audio stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => cpal_device.build_input_stream(
            config,
            move |data: &[i16], _info| {
                push_mixed_down(data, ch, &tx, |s| s as f32 / 32768.0)
            },
            |err| error!("audio stream error: {err}"),
            None,
        ),
        SampleFormat::U8 => cpal_device.build_input_stream(
            config,
            move |data: &[u8], _info| {
                push_mixed_down(data, ch, &tx, |s| (s as f32 - 128.0) / 128.0)
            },
            |err| error!("audio stream error: {err}"),
            None,
        ),
        fmt => {
            error!("unsupported sample format: {fmt:?}");
            Err(cpal::BuildStreamError::StreamConfigNotSupported)
        }
    }
}

/// Downmix an interleaved multi-channel block to mono and push it onto `tx`.
/// The one allocation here (`Vec::with_capacity` sized to `frames`) is the
/// audio callback's entire heap footprint per block.
#[cfg(feature = "audio-cpal")]
fn push_mixed_down<S: Copy>(
    data: &[S],
    channels: usize,
    tx: &Sender<Vec<f32>>,
    to_f32: impl Fn(S) -> f32,
) {
    let frames = data.len() / channels.max(1);
    let mut mono = Vec::with_capacity(frames);
    if channels <= 1 {
        mono.extend(data.iter().map(|s| to_f32(*s)));
    } else {
        for f in 0..frames {
            let base = f * channels;
            let sum: f32 = (0..channels).map(|c| to_f32(data[base + c])).sum();
            mono.push(sum / channels as f32);
        }
    }
    if tx.send(mono).is_err() {
        warn!("audio queue receiver dropped; discarding block");
    }
}

/// Resolve a [`DeviceSelector`] to a concrete cpal device and its
/// [`DeviceInfo`], applying the same selection rules the orchestrator uses
/// for fallback.
#[cfg(feature = "audio-cpal")]
fn resolve_device(selector: &DeviceSelector) -> Result<(cpal::Device, DeviceInfo)> {
    let host = cpal::default_host();
    let host_api = format!("{:?}", host.id());

    match selector {
        DeviceSelector::Default => {
            let device = host
                .default_input_device()
                .ok_or(VadrecError::NoDefaultInputDevice)?;
            let name = device
                .name()
                .unwrap_or_else(|_| "Default Input Device".to_string());
            let max_input_channels = device.default_input_config().map(|c| c.channels()).unwrap_or(0);
            Ok((
                device,
                DeviceInfo {
                    index: 0,
                    name,
                    host_api,
                    is_default: true,
                    max_input_channels,
                },
            ))
        }
        DeviceSelector::Index(idx) => {
            let devices: Vec<cpal::Device> = host
                .input_devices()
                .map_err(|e| VadrecError::AudioDevice(e.to_string()))?
                .collect();
            let device = devices
                .into_iter()
                .nth(*idx)
                .ok_or_else(|| VadrecError::AudioDevice(format!("no input device at index {idx}")))?;
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {idx}"));
            let max_input_channels = device.default_input_config().map(|c| c.channels()).unwrap_or(0);
            Ok((
                device,
                DeviceInfo {
                    index: *idx,
                    name,
                    host_api,
                    is_default: false,
                    max_input_channels,
                },
            ))
        }
        DeviceSelector::Name(needle) => {
            let devices: Vec<cpal::Device> = host
                .input_devices()
                .map_err(|e| VadrecError::AudioDevice(e.to_string()))?
                .collect();
            let lowered_needle = needle.to_ascii_lowercase();
            let found = devices.into_iter().enumerate().find(|(_, d)| {
                d.name()
                    .map(|n| n.to_ascii_lowercase().contains(&lowered_needle))
                    .unwrap_or(false)
            });
            let (idx, device) = found
                .ok_or_else(|| VadrecError::AudioDevice(format!("no input device matching '{needle}'")))?;
            let name = device.name().unwrap_or_else(|_| needle.clone());
            let max_input_channels = device.default_input_config().map(|c| c.channels()).unwrap_or(0);
            Ok((
                device,
                DeviceInfo {
                    index: idx,
                    name,
                    host_api,
                    is_default: false,
                    max_input_channels,
                },
            ))
        }
    }
}

/// Open `info`'s device briefly, read `probe_duration`'s worth of frames,
/// and return the RMS level. Used by the device supervisor's auto-switch
/// scan. Blocks the calling thread for roughly `probe_duration`.
#[cfg(feature = "audio-cpal")]
pub fn probe_device_rms(
    info: &DeviceInfo,
    sample_rate: u32,
    channels: u16,
    probe_duration: std::time::Duration,
) -> Result<f32> {
    use std::sync::Mutex;

    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| VadrecError::AudioDevice(e.to_string()))?
        .collect();
    let cpal_device = devices
        .into_iter()
        .nth(info.index)
        .ok_or_else(|| VadrecError::AudioDevice(format!("probe candidate '{}' vanished", info.name)))?;

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    #[cfg(unix)]
    let _stderr_guard = crate::stderr_guard::StderrGuard::suppress();

    let samples: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let samples_cb = Arc::clone(&samples);
    let ch = channels as usize;

    let stream = cpal_device
        .build_input_stream(
            &config,
            move |data: &[f32], _info| {
                if let Ok(mut guard) = samples_cb.lock() {
                    push_mono_into(data, ch, &mut guard);
                }
            },
            |err| warn!("probe stream error: {err}"),
            None,
        )
        .map_err(|e| VadrecError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VadrecError::AudioStream(e.to_string()))?;
    std::thread::sleep(probe_duration);
    drop(stream);

    let collected = samples.lock().map(|g| g.clone()).unwrap_or_default();
    Ok(rms(&collected))
}

#[cfg(feature = "audio-cpal")]
fn push_mono_into(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    let frames = data.len() / channels;
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = (0..channels).map(|c| data[base + c]).sum();
        out.push(sum / channels as f32);
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn probe_device_rms(
    _info: &DeviceInfo,
    _sample_rate: u32,
    _channels: u16,
    _probe_duration: std::time::Duration,
) -> Result<f32> {
    Err(VadrecError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}

/// Root-mean-square of a sample slice. Shared by the probe path here and
/// the segmenter's smoothing filter.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
