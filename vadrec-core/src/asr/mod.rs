//! ASR worker — drains finalized speech buffers and merges transcripts into
//! their sidecars.
//!
//! The transcriber itself is an injected, out-of-scope collaborator: this
//! module owns only the queue-draining thread and the contract
//! ([`Transcriber`]) it expects the collaborator to satisfy.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::console::ConsoleState;
use crate::error::Result;
use crate::sidecar::{SidecarStore, SpeechSegment, TranscriberProvenance};

/// Result of transcribing one audio buffer.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    pub time_stamps: Option<serde_json::Value>,
}

/// Contract for ASR backends.
///
/// `&mut self` expresses that decoders are commonly stateful (batching,
/// warm caches); the worker thread is the only caller, so no internal
/// synchronization is required here.
pub trait Transcriber: Send + 'static {
    /// Fail fast if the backend cannot run at all (missing weights, no
    /// usable device). Called once before recording starts.
    fn verify_dependencies(&mut self) -> Result<()>;

    /// Optional warm-up (load weights, run a dummy inference). No-op by
    /// default.
    fn preload(&mut self) -> Result<()> {
        Ok(())
    }

    /// Transcribe an in-memory mono buffer at `sample_rate`.
    fn transcribe_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult>;

    /// Transcribe an existing audio file (used by the offline rescan tool).
    fn transcribe_file(&mut self, path: &Path) -> Result<TranscriptionResult>;

    /// Provenance recorded into every sidecar this transcriber touches.
    fn provenance(&self) -> TranscriberProvenance;
}

/// A finalized speech buffer awaiting transcription; queued by the
/// segmenter, drained by [`AsrWorker`].
pub struct AsrJob {
    pub audio: Vec<f32>,
    pub sample_rate: u32,
    pub start_iso: String,
    pub end_iso: String,
    pub sidecar_path: PathBuf,
}

enum Message {
    Job(AsrJob),
    Stop,
}

/// Handle to the single background ASR worker thread.
///
/// The queue is unbounded: jobs are self-limiting in size
/// (bounded by `max_speech_segment_seconds * sample_rate`), so unbounded
/// growth under backlog is a tolerable operational signal, not a bug.
pub struct AsrWorker {
    tx: Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

impl AsrWorker {
    /// Spawn the worker thread. `transcriber` is moved onto the worker
    /// thread and never touched from anywhere else. `console` is optional —
    /// passed only when the console renderer is enabled.
    pub fn spawn(
        mut transcriber: Box<dyn Transcriber>,
        sidecar: Arc<SidecarStore>,
        console: Option<Arc<ConsoleState>>,
    ) -> Self {
        let (tx, rx): (Sender<Message>, Receiver<Message>) = crossbeam_channel::unbounded();

        let handle = std::thread::Builder::new()
            .name("vadrec-asr".into())
            .spawn(move || {
                for message in rx.iter() {
                    match message {
                        Message::Stop => break,
                        Message::Job(job) => {
                            run_job(transcriber.as_mut(), &sidecar, console.as_deref(), job);
                        }
                    }
                }
            })
            .expect("failed to spawn ASR worker thread");

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Enqueue a speech buffer for transcription. Never blocks.
    pub fn submit(&self, job: AsrJob) {
        // An error here means the worker thread has already exited (e.g.
        // panicked); dropping the job is preferable to panicking the
        // caller, since the sidecar's `pending_asr` status already records
        // the discrepancy for a later scan tool to notice.
        if self.tx.send(Message::Job(job)).is_err() {
            warn!("ASR worker channel closed; dropping job");
        }
    }

    /// Send the sentinel and join. The worker finishes any in-flight job
    /// before terminating — it exits on the sentinel, never on the stop
    /// flag mid-job.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Message::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsrWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_job(transcriber: &mut dyn Transcriber, sidecar: &SidecarStore, console: Option<&ConsoleState>, job: AsrJob) {
    let provenance = transcriber.provenance();

    let result = match transcriber.transcribe_audio(&job.audio, job.sample_rate) {
        Ok(r) => r,
        Err(e) => {
            warn!(sidecar = %job.sidecar_path.display(), "transcription failed: {e}");
            sidecar.decrement_pending(&job.sidecar_path);
            return;
        }
    };

    let text = result.text.trim();
    if text.is_empty() {
        sidecar.decrement_pending(&job.sidecar_path);
        return;
    }

    if let Some(console) = console {
        console.record_asr_output(text);
    }

    let segment = SpeechSegment {
        start_time_iso: Some(job.start_iso),
        end_time_iso: Some(job.end_iso),
        language: result.language,
        text: text.to_string(),
        time_stamps: result.time_stamps,
        ..Default::default()
    };

    if let Err(e) = sidecar.append_segment(&job.sidecar_path, segment, Some(&provenance)) {
        warn!(sidecar = %job.sidecar_path.display(), "failed to append transcript: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct EchoTranscriber {
        calls: Arc<AtomicUsize>,
    }

    impl Transcriber for EchoTranscriber {
        fn verify_dependencies(&mut self) -> Result<()> {
            Ok(())
        }

        fn transcribe_audio(&mut self, samples: &[f32], _sample_rate: u32) -> Result<TranscriptionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TranscriptionResult {
                text: format!("heard {} samples", samples.len()),
                language: Some("en".into()),
                time_stamps: None,
            })
        }

        fn transcribe_file(&mut self, _path: &Path) -> Result<TranscriptionResult> {
            unimplemented!("not exercised by this test")
        }

        fn provenance(&self) -> TranscriberProvenance {
            TranscriberProvenance {
                model: "echo".into(),
                backend: "test".into(),
                device: "cpu".into(),
                dtype: "f32".into(),
            }
        }
    }

    #[test]
    fn worker_transcribes_job_and_marks_sidecar_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.json");
        let sidecar = Arc::new(SidecarStore::new());
        sidecar
            .init(
                &path,
                &crate::sidecar::SidecarDoc {
                    audio_file: "seg.wav".into(),
                    status: "recording".into(),
                    asr_enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();
        sidecar.enqueue_job(&path);

        let calls = Arc::new(AtomicUsize::new(0));
        let transcriber = Box::new(EchoTranscriber { calls: calls.clone() });
        let mut worker = AsrWorker::spawn(transcriber, sidecar.clone(), None);

        worker.submit(AsrJob {
            audio: vec![0.1; 16_000],
            sample_rate: 16_000,
            start_iso: "2026-01-01T00:00:00+00:00".into(),
            end_iso: "2026-01-01T00:00:01+00:00".into(),
            sidecar_path: path.clone(),
        });
        worker.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sidecar.pending_count(&path), 0);
        let reread: crate::sidecar::SidecarDoc =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread.status, "ok");
        assert!(reread.text.contains("16000 samples"));
        // Ensure the worker actually drained before process exit in tests
        // that don't call stop() explicitly.
        let _ = Duration::from_millis(0);
    }
}
