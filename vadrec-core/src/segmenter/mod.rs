//! Segmenter / Writer — owns the current archive, its paired sidecar, and
//! the speech-buffering state machine.
//!
//! This is the densest module in the crate: every incoming audio block is
//! split into VAD-gate-sized sub-chunks and walked sample-by-sample against
//! the gate's event stream, so that the PCM writer receives exactly the
//! intervals the gate marked as speech.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::asr::{AsrJob, AsrWorker};
use crate::config::RecorderConfig;
use crate::error::{Result, VadrecError};
use crate::sidecar::{SidecarDoc, SidecarStore};
use crate::vad::{VadEvent, VadGate};

type Writer = WavWriter<BufWriter<File>>;

/// A just-rotated archive, handed back to the orchestrator for logging /
/// console updates.
pub struct RotatedSegment {
    pub sidecar_path: PathBuf,
}

/// Owns the mutable recording state for a single archive segment and the
/// logic to rotate into the next one.
pub struct Segmenter {
    config: RecorderConfig,
    vad: Box<dyn VadGate>,
    sidecar_store: Arc<SidecarStore>,
    asr: Option<Arc<AsrWorker>>,

    writer: Option<Writer>,
    sidecar_path: PathBuf,
    segment_started_at: Instant,
    stream_start_time: DateTime<Local>,
    total_samples: u64,
    had_speech: bool,

    in_speech: bool,
    speech_start_sample: u64,
    speech_buffer: Vec<f32>,
    speech_run_started_at: Option<Instant>,
    pending_end_sample: Option<u64>,
    pending_end_time: Option<Instant>,

    /// Smoothed RMS for the console renderer's level meter.
    pub smoothed_rms: f32,
    /// Whether a speech run is currently open — read by the console
    /// renderer and the device supervisor (which skips auto-switch scans
    /// while speech is in progress).
    pub currently_in_speech: bool,

    device_label: String,
    auto_switch_enabled: bool,
}

impl Segmenter {
    pub fn new(
        config: RecorderConfig,
        vad: Box<dyn VadGate>,
        sidecar_store: Arc<SidecarStore>,
        asr: Option<Arc<AsrWorker>>,
    ) -> Self {
        let auto_switch_enabled = config.auto_switch_enabled;
        Self {
            config,
            vad,
            sidecar_store,
            asr,
            writer: None,
            sidecar_path: PathBuf::new(),
            segment_started_at: Instant::now(),
            stream_start_time: Local::now(),
            total_samples: 0,
            had_speech: false,
            in_speech: false,
            speech_start_sample: 0,
            speech_buffer: Vec::new(),
            speech_run_started_at: None,
            pending_end_sample: None,
            pending_end_time: None,
            smoothed_rms: 0.0,
            currently_in_speech: false,
            device_label: "default".to_string(),
            auto_switch_enabled,
        }
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar_path
    }

    /// Open a new archive + sidecar and reset per-segment state. Call once
    /// at startup and again after every rotation/recovery.
    pub fn open_segment(&mut self, device_label: &str) -> Result<()> {
        self.device_label = device_label.to_string();
        let now = Local::now();
        let (wav_path, json_path) = archive_paths(&self.config.output_dir, &self.config.prefix, now);

        if let Some(parent) = wav_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&wav_path, spec)
            .map_err(|e| VadrecError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let doc = SidecarDoc {
            audio_file: wav_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            audio_path: wav_path.to_string_lossy().to_string(),
            segment_start: Some(now.format("%Y%m%d_%H%M%S").to_string()),
            segment_start_time: Some(now.to_rfc3339()),
            created_at: Some(now.to_rfc3339()),
            input_device: Some(self.device_label.clone()),
            auto_switch_device: Some(self.auto_switch_enabled),
            asr_enabled: self.asr.is_some() && self.config.asr_enabled,
            asr_mode: Some(if self.asr.is_some() && self.config.asr_enabled {
                "live".to_string()
            } else {
                "disabled".to_string()
            }),
            status: "recording".to_string(),
            ..Default::default()
        };
        self.sidecar_store.init(&json_path, &doc)?;

        self.writer = Some(writer);
        self.sidecar_path = json_path;
        self.segment_started_at = Instant::now();
        self.stream_start_time = now;
        self.total_samples = 0;
        self.had_speech = false;
        self.in_speech = false;
        self.currently_in_speech = false;
        self.speech_buffer.clear();
        self.pending_end_sample = None;
        self.pending_end_time = None;
        self.vad.reset();

        info!(sidecar = %self.sidecar_path.display(), "opened archive segment");
        Ok(())
    }

    /// Whether wall-clock elapsed since this segment opened exceeds the
    /// configured rotation interval.
    pub fn should_rotate(&self) -> bool {
        self.segment_started_at.elapsed() >= self.config.max_segment_duration()
    }

    /// Close the current archive: finalize any in-flight speech buffer,
    /// flush the PCM writer, and compute the sidecar's terminal status.
    pub fn close_segment(&mut self) -> Result<RotatedSegment> {
        if self.in_speech {
            let end_sample = self.total_samples;
            self.finalize_speech_run(end_sample);
        } else if self.pending_end_sample.is_some() {
            self.flush_pending_speech_buffer();
        }

        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| VadrecError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        }

        let transcriber_configured = self.asr.is_some() && self.config.asr_enabled;
        self.sidecar_store
            .finalize(&self.sidecar_path, transcriber_configured, self.had_speech)?;

        info!(sidecar = %self.sidecar_path.display(), had_speech = self.had_speech, "closed archive segment");

        Ok(RotatedSegment {
            sidecar_path: self.sidecar_path.clone(),
        })
    }

    /// Process one block of mono f32 samples delivered by the audio source,
    /// repeated per `chunk_samples`-aligned sub-chunk.
    pub fn process_block(&mut self, block: &[f32]) -> Result<()> {
        let chunk_samples = self.config.chunk_samples().max(1);
        for sub in block.chunks(chunk_samples) {
            self.process_chunk(sub)?;
        }
        Ok(())
    }

    fn process_chunk(&mut self, chunk: &[f32]) -> Result<()> {
        // Step 1: RMS + asymmetric smoothing (instantaneous attack, slow release).
        let chunk_rms = crate::audio::rms(chunk);
        self.smoothed_rms = (self.smoothed_rms * 0.85 + chunk_rms * 0.15).max(chunk_rms);

        // Step 2: ask the gate for events, already sorted by contract.
        let mut events = self.vad.detect_chunk(chunk);
        events.sort_by_key(|e| e.position());

        // Step 3: walk the cursor through the chunk, writing speech spans.
        let mut cursor = 0usize;
        for event in events {
            match event {
                VadEvent::Start(pos) => {
                    self.in_speech = true;
                    self.currently_in_speech = true;
                    self.speech_start_sample = self.total_samples + pos as u64;
                    self.pending_end_sample = None;
                    self.pending_end_time = None;
                    self.speech_run_started_at = Some(Instant::now());
                }
                VadEvent::End(pos) if self.in_speech => {
                    self.write_speech_span(&chunk[cursor..pos])?;
                    self.in_speech = false;
                    self.currently_in_speech = false;
                    self.pending_end_sample = Some(self.total_samples + pos as u64);
                    self.pending_end_time = Some(Instant::now());
                }
                VadEvent::End(_) => {
                    // End with no open speech run — nothing to close.
                }
            }
            cursor = event.position();
        }

        // Step 4: trailing speech in this chunk.
        if self.in_speech {
            self.write_speech_span(&chunk[cursor..])?;

            if let Some(started) = self.speech_run_started_at {
                if started.elapsed() >= self.config.max_speech_segment_duration() {
                    let end_sample = self.total_samples + chunk.len() as u64;
                    self.finalize_speech_run(end_sample);
                }
            }
        }

        // Step 5: close out a pending silence gap past the minimum threshold.
        if !self.in_speech {
            if let Some(pending_at) = self.pending_end_time {
                let elapsed_ms = pending_at.elapsed().as_millis() as u64;
                if elapsed_ms >= self.config.min_silence_ms as u64 {
                    self.flush_pending_speech_buffer();
                }
            }
        }

        // Step 6.
        self.total_samples += chunk.len() as u64;
        Ok(())
    }

    fn write_speech_span(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.had_speech = true;
        if let Some(writer) = self.writer.as_mut() {
            for &s in samples {
                let clamped = s.clamp(-1.0, 1.0);
                writer
                    .write_sample((clamped * i16::MAX as f32) as i16)
                    .map_err(|e| {
                        VadrecError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                    })?;
            }
        }
        self.speech_buffer.extend_from_slice(samples);
        Ok(())
    }

    /// Finalize the speech buffer because a continuous run exceeded the
    /// forced-flush cap, without closing the archive.
    fn finalize_speech_run(&mut self, end_sample: u64) {
        self.dispatch_speech_buffer(self.speech_start_sample, end_sample);
        self.speech_start_sample = end_sample;
        self.speech_run_started_at = Some(Instant::now());
        self.pending_end_sample = None;
        self.pending_end_time = None;
    }

    /// Finalize the speech buffer because trailing silence exceeded
    /// `min_silence_ms`.
    fn flush_pending_speech_buffer(&mut self) {
        let end_sample = self.pending_end_sample.unwrap_or(self.total_samples);
        self.dispatch_speech_buffer(self.speech_start_sample, end_sample);
        self.pending_end_sample = None;
        self.pending_end_time = None;
    }

    fn dispatch_speech_buffer(&mut self, start_sample: u64, end_sample: u64) {
        if self.speech_buffer.is_empty() {
            return;
        }
        let audio = std::mem::take(&mut self.speech_buffer);

        let Some(asr) = self.asr.as_ref() else {
            return;
        };
        if !self.config.asr_enabled {
            return;
        }

        let rate = self.config.sample_rate;
        let start_iso = self.sample_to_iso(start_sample, rate);
        let end_iso = self.sample_to_iso(end_sample, rate);

        self.sidecar_store.enqueue_job(&self.sidecar_path);
        asr.submit(AsrJob {
            audio,
            sample_rate: rate,
            start_iso,
            end_iso,
            sidecar_path: self.sidecar_path.clone(),
        });
    }

    fn sample_to_iso(&self, sample: u64, rate: u32) -> String {
        let offset_secs = sample as f64 / rate as f64;
        let when = self.stream_start_time + chrono::Duration::milliseconds((offset_secs * 1000.0) as i64);
        when.to_rfc3339()
    }
}

/// Compute `(wav_path, json_path)` for an archive opened at `now`,
/// following the recorder's on-disk layout.
fn archive_paths(output_dir: &Path, prefix: &str, now: DateTime<Local>) -> (PathBuf, PathBuf) {
    let date_dir = output_dir.join(now.format("%Y%m%d").to_string());
    let stem = format!("{prefix}_live_{}", now.format("%Y%m%d_%H%M%S"));
    let wav_path = date_dir.join(format!("{stem}.wav"));
    let json_path = date_dir.join(format!("{stem}.json"));
    (wav_path, json_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::energy::EnergyGate;
    use tempfile::tempdir;

    fn config(output_dir: &Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: output_dir.to_path_buf(),
            sample_rate: 16_000,
            chunk_ms: 20,
            min_silence_ms: 100,
            max_speech_segment_seconds: 2.0,
            max_segment_minutes: 60.0,
            ..Default::default()
        }
    }

    fn silence(len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    fn loud(len: usize) -> Vec<f32> {
        vec![0.5; len]
    }

    #[test]
    fn pure_silence_writes_no_samples_and_status_no_speech() {
        let dir = tempdir().unwrap();
        let sidecar_store = Arc::new(SidecarStore::new());
        let vad: Box<dyn VadGate> = Box::new(EnergyGate::new(0.02, 0, 320));
        let mut seg = Segmenter::new(config(dir.path()), vad, sidecar_store, None);
        seg.open_segment("default").unwrap();

        seg.process_block(&silence(32_000)).unwrap();
        let rotated = seg.close_segment().unwrap();

        let reread: SidecarDoc =
            serde_json::from_slice(&std::fs::read(&rotated.sidecar_path).unwrap()).unwrap();
        assert_eq!(reread.status, "no_speech");
        assert_eq!(reread.text, "");
        assert!(reread.speech_segments.is_empty());

        let wav_path = rotated.sidecar_path.with_extension("wav");
        let reader = hound::WavReader::open(&wav_path).unwrap();
        assert_eq!(reader.duration(), 0);
    }

    #[test]
    fn speech_then_silence_produces_pending_asr_without_transcriber() {
        let dir = tempdir().unwrap();
        let sidecar_store = Arc::new(SidecarStore::new());
        let vad: Box<dyn VadGate> = Box::new(EnergyGate::new(0.02, 0, 320));
        let mut seg = Segmenter::new(config(dir.path()), vad, sidecar_store, None);
        seg.open_segment("default").unwrap();

        let mut block = loud(16_000);
        block.extend(silence(16_000));
        seg.process_block(&block).unwrap();

        let rotated = seg.close_segment().unwrap();
        let reread: SidecarDoc =
            serde_json::from_slice(&std::fs::read(&rotated.sidecar_path).unwrap()).unwrap();
        // No transcriber configured but speech was observed => pending_asr.
        assert_eq!(reread.status, "pending_asr");

        let wav_path = rotated.sidecar_path.with_extension("wav");
        let reader = hound::WavReader::open(&wav_path).unwrap();
        assert_eq!(reader.duration(), 16_000);
    }

    #[test]
    fn rotation_after_elapsed_window() {
        let dir = tempdir().unwrap();
        let sidecar_store = Arc::new(SidecarStore::new());
        let vad: Box<dyn VadGate> = Box::new(EnergyGate::new(0.02, 0, 320));
        let mut cfg = config(dir.path());
        cfg.max_segment_minutes = 0.0; // rotate immediately
        let mut seg = Segmenter::new(cfg, vad, sidecar_store, None);
        seg.open_segment("default").unwrap();
        seg.process_block(&silence(320)).unwrap();
        assert!(seg.should_rotate());
    }
}
