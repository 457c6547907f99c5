//! Concrete `Transcriber` wiring for the CLI binary.
//!
//! The ASR model itself (Qwen3-ASR or equivalent) is an injected,
//! out-of-scope collaborator: `vadrec-core::asr::Transcriber` only defines
//! the contract. Until a real backend is wired in, the CLI ships a stub
//! that echoes buffer metadata as a placeholder for a real inference
//! backend.

use std::path::Path;

use vadrec_core::error::Result;
use vadrec_core::sidecar::TranscriberProvenance;
use vadrec_core::asr::{Transcriber, TranscriptionResult};

use crate::flags::AsrFlags;

pub struct StubTranscriber {
    model: String,
    device: String,
    dtype: String,
    utterance_count: u64,
}

impl StubTranscriber {
    pub fn new(flags: &AsrFlags) -> Self {
        Self {
            model: flags.model.clone(),
            device: flags.device.clone(),
            dtype: flags.dtype.clone(),
            utterance_count: 0,
        }
    }
}

impl Transcriber for StubTranscriber {
    fn verify_dependencies(&mut self) -> Result<()> {
        tracing::warn!(
            model = %self.model,
            "no real ASR backend wired in; using stub transcriber"
        );
        Ok(())
    }

    fn transcribe_audio(&mut self, samples: &[f32], sample_rate: u32) -> Result<TranscriptionResult> {
        self.utterance_count += 1;
        Ok(TranscriptionResult {
            text: format!(
                "[stub transcript {}: {} samples @ {sample_rate} Hz]",
                self.utterance_count,
                samples.len()
            ),
            language: Some("und".to_string()),
            time_stamps: None,
        })
    }

    fn transcribe_file(&mut self, path: &Path) -> Result<TranscriptionResult> {
        Ok(TranscriptionResult {
            text: format!("[stub transcript for {}]", path.display()),
            language: Some("und".to_string()),
            time_stamps: None,
        })
    }

    fn provenance(&self) -> TranscriberProvenance {
        TranscriberProvenance {
            model: self.model.clone(),
            backend: "stub".to_string(),
            device: self.device.clone(),
            dtype: self.dtype.clone(),
        }
    }
}

pub fn build(flags: &AsrFlags) -> Box<dyn Transcriber> {
    Box::new(StubTranscriber::new(flags))
}
