//! Recorder configuration.
//!
//! `RecorderConfig` is immutable once handed to [`crate::orchestrator::Orchestrator`].
//! Every field here has the same default as the Python `VadConfig` dataclass
//! this recorder replaces, so that behavior is drop-in compatible.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::device::DeviceSelector;

/// Tunables for a single recording run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Input device selector (`default`, `:N`, or a name substring).
    #[serde(skip)]
    pub device: DeviceSelector,

    /// Root directory for date-partitioned archive segments.
    pub output_dir: std::path::PathBuf,

    /// Filename prefix, e.g. `eve` → `eve_live_20260101_120000.wav`.
    pub prefix: String,

    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count. Mono (1) unless configured otherwise.
    pub channels: u16,
    /// Chunk size delivered to the VAD gate, in milliseconds.
    pub chunk_ms: u32,

    /// Padding added before/after detected speech, in milliseconds.
    /// Informational — actual padding is the VAD gate's responsibility, since
    /// the segmenter never reaches inside the gate; kept here because the
    /// CLI surface and sidecar provenance both reference it.
    pub speech_padding_ms: u32,
    /// Minimum trailing silence before a speech segment is closed and
    /// dispatched to the ASR queue.
    pub min_silence_ms: u32,

    /// Maximum archive segment duration before rotation.
    pub max_segment_minutes: f64,
    /// Maximum continuous speech-run duration before a forced ASR flush.
    pub max_speech_segment_seconds: f64,

    /// Device health-check cadence. `<= 0` disables the check.
    pub device_check_seconds: f64,
    /// Wait time before retrying the same device after an error.
    pub device_retry_seconds: f64,

    /// Whether the auto-switch subsystem is enabled.
    pub auto_switch_enabled: bool,
    /// Cadence between auto-switch candidate scans.
    pub auto_switch_scan_seconds: f64,
    /// Per-candidate probe duration.
    pub auto_switch_probe_seconds: f64,
    /// Max candidate devices probed per scan.
    pub auto_switch_max_candidates_per_scan: usize,
    /// Case-insensitive substrings excluding devices from selection/probing.
    pub excluded_input_keywords: Vec<String>,
    /// Minimum RMS for a candidate to count as active.
    pub auto_switch_min_rms: f32,
    /// Required loudness ratio over the current microphone.
    pub auto_switch_min_ratio: f32,
    /// Minimum seconds between switches.
    pub auto_switch_cooldown_seconds: f64,
    /// Consecutive winning scans required before switching.
    pub auto_switch_confirmations: u32,

    /// Whether the TTY status meter is enabled.
    pub console_feedback_enabled: bool,
    /// Console refresh rate in Hz.
    pub console_feedback_hz: f64,

    /// Whether ASR is enabled at all (`--disable-asr` sets this false).
    pub asr_enabled: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Default,
            output_dir: std::path::PathBuf::from("recordings"),
            prefix: "eve".to_string(),
            sample_rate: 16_000,
            channels: 1,
            chunk_ms: 32,
            speech_padding_ms: 300,
            min_silence_ms: 1_200,
            max_segment_minutes: 60.0,
            max_speech_segment_seconds: 20.0,
            device_check_seconds: 2.0,
            device_retry_seconds: 2.0,
            auto_switch_enabled: true,
            auto_switch_scan_seconds: 3.0,
            auto_switch_probe_seconds: 0.25,
            auto_switch_max_candidates_per_scan: 2,
            excluded_input_keywords: vec!["iphone".to_string(), "continuity".to_string()],
            auto_switch_min_rms: 0.006,
            auto_switch_min_ratio: 1.8,
            auto_switch_cooldown_seconds: 8.0,
            auto_switch_confirmations: 2,
            console_feedback_enabled: true,
            console_feedback_hz: 12.0,
            asr_enabled: true,
        }
    }
}

impl RecorderConfig {
    /// Number of samples in one chunk at the configured rate.
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_ms as u64 / 1000) as usize
    }

    pub fn device_check_interval(&self) -> Option<Duration> {
        duration_or_none(self.device_check_seconds)
    }

    pub fn device_retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.device_retry_seconds.max(0.0))
    }

    pub fn auto_switch_scan_interval(&self) -> Option<Duration> {
        if !self.auto_switch_enabled {
            return None;
        }
        duration_or_none(self.auto_switch_scan_seconds)
    }

    pub fn max_segment_duration(&self) -> Duration {
        Duration::from_secs_f64((self.max_segment_minutes * 60.0).max(0.0))
    }

    pub fn max_speech_segment_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_speech_segment_seconds.max(0.0))
    }
}

fn duration_or_none(seconds: f64) -> Option<Duration> {
    if seconds <= 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(seconds))
    }
}
