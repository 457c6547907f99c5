//! End-to-end tests driving the segmenter + ASR worker + sidecar store
//! together, the way the orchestrator wires them in production.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use vadrec_core::asr::{AsrWorker, Transcriber, TranscriptionResult};
use vadrec_core::config::RecorderConfig;
use vadrec_core::error::Result;
use vadrec_core::segmenter::Segmenter;
use vadrec_core::sidecar::{SidecarDoc, SidecarStore, TranscriberProvenance};
use vadrec_core::vad::energy::EnergyGate;
use vadrec_core::vad::VadGate;

struct DelayTranscriber {
    delay: Duration,
    text: String,
}

impl Transcriber for DelayTranscriber {
    fn verify_dependencies(&mut self) -> Result<()> {
        Ok(())
    }

    fn transcribe_audio(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<TranscriptionResult> {
        thread::sleep(self.delay);
        Ok(TranscriptionResult {
            text: self.text.clone(),
            language: Some("en".to_string()),
            time_stamps: None,
        })
    }

    fn transcribe_file(&mut self, _path: &Path) -> Result<TranscriptionResult> {
        unimplemented!("not exercised by this test")
    }

    fn provenance(&self) -> TranscriberProvenance {
        TranscriberProvenance {
            model: "test-model".to_string(),
            backend: "test".to_string(),
            device: "cpu".to_string(),
            dtype: "f32".to_string(),
        }
    }
}

fn config(output_dir: &Path) -> RecorderConfig {
    RecorderConfig {
        output_dir: output_dir.to_path_buf(),
        sample_rate: 16_000,
        chunk_ms: 20,
        // Large enough that the silence tail in these tests never
        // auto-flushes on its own; every dispatch below is driven
        // explicitly by close_segment.
        min_silence_ms: 60_000,
        max_speech_segment_seconds: 30.0,
        max_segment_minutes: 60.0,
        asr_enabled: true,
        ..Default::default()
    }
}

fn silence(len: usize) -> Vec<f32> {
    vec![0.0; len]
}

fn loud(len: usize) -> Vec<f32> {
    vec![0.5; len]
}

fn vad_gate() -> Box<dyn VadGate> {
    Box::new(EnergyGate::new(0.02, 0, 320))
}

fn read_sidecar(path: &Path) -> SidecarDoc {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// S4 — stop is requested while the ASR worker is still transcribing.
/// The sidecar must close as `pending_asr` and later pick up the transcript
/// once the worker catches up, without the caller ever blocking on it.
#[test]
fn slow_transcriber_leaves_pending_asr_then_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let sidecar_store = Arc::new(SidecarStore::new());
    let asr = Arc::new(AsrWorker::spawn(
        Box::new(DelayTranscriber {
            delay: Duration::from_millis(80),
            text: "hello world".to_string(),
        }),
        Arc::clone(&sidecar_store),
        None,
    ));

    let mut seg = Segmenter::new(config(dir.path()), vad_gate(), Arc::clone(&sidecar_store), Some(asr));
    seg.open_segment("default").unwrap();

    let mut block = loud(16_000);
    block.extend(silence(16_000));
    seg.process_block(&block).unwrap();

    let rotated = seg.close_segment().unwrap();
    let immediately_after_close = read_sidecar(&rotated.sidecar_path);
    assert_eq!(immediately_after_close.status, "pending_asr");
    assert!(immediately_after_close.speech_segments.is_empty());

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if sidecar_store.pending_count(&rotated.sidecar_path) == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "ASR job never completed");
        thread::sleep(Duration::from_millis(5));
    }

    let resolved = read_sidecar(&rotated.sidecar_path);
    assert_eq!(resolved.status, "ok");
    assert_eq!(resolved.text, "hello world");
    assert_eq!(resolved.language.as_deref(), Some("en"));
    assert_eq!(resolved.speech_segments.len(), 1);
    assert_eq!(resolved.speech_segments[0].text, "hello world");
}

/// S3 — two utterances across a rotation end up in two distinct sidecars
/// with monotonically increasing timestamps, each containing only its own
/// utterance.
#[test]
fn rotation_splits_utterances_across_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let sidecar_store = Arc::new(SidecarStore::new());

    let mut seg = Segmenter::new(config(dir.path()), vad_gate(), Arc::clone(&sidecar_store), None);
    seg.open_segment("default").unwrap();

    let mut first_block = loud(4_800);
    first_block.extend(silence(4_800));
    seg.process_block(&first_block).unwrap();
    let first = seg.close_segment().unwrap();

    // Archive filenames carry second-resolution timestamps; wait out a
    // full second so the rotated segment gets a distinct, later name.
    thread::sleep(Duration::from_millis(1_100));

    // Rotation: open a fresh archive and feed it the second utterance.
    seg.open_segment("default").unwrap();
    let mut second_block = loud(4_800);
    second_block.extend(silence(4_800));
    seg.process_block(&second_block).unwrap();
    let second = seg.close_segment().unwrap();

    assert_ne!(first.sidecar_path, second.sidecar_path);
    assert!(second.sidecar_path.file_name() > first.sidecar_path.file_name());

    let first_wav = first.sidecar_path.with_extension("wav");
    let second_wav = second.sidecar_path.with_extension("wav");
    assert_eq!(hound::WavReader::open(&first_wav).unwrap().duration(), 4_800);
    assert_eq!(hound::WavReader::open(&second_wav).unwrap().duration(), 4_800);

    let first_doc = read_sidecar(&first.sidecar_path);
    let second_doc = read_sidecar(&second.sidecar_path);
    assert_eq!(first_doc.status, "pending_asr");
    assert_eq!(second_doc.status, "pending_asr");
}
