//! Sidecar transcript store — the JSON document paired 1:1 with each PCM
//! archive.
//!
//! All mutations go through a single process-wide lock guarding both the
//! read-modify-write-rename cycle on disk and the in-memory pending-job
//! table, so that a worker's decrement and the segmenter's close-time status
//! computation are strictly ordered. The pending-job map is the single
//! source of truth for in-flight work.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VadrecError};

/// One ASR result merged into a sidecar's `speech_segments` array.
///
/// Live-mode callers populate `start_time_iso`/`end_time_iso`; the offline
/// rescan tool populates `start_seconds`/`end_seconds` instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechSegment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_stamps: Option<serde_json::Value>,
}

/// The sidecar transcript document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarDoc {
    pub audio_file: String,
    pub audio_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_switch_device: Option<bool>,
    pub asr_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_mode: Option<String>,
    pub speech_segments: Vec<SpeechSegment>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribed_at: Option<String>,
}

impl SidecarDoc {
    /// Recompute `text` (non-empty segment texts joined by `\n`) and
    /// `language` (sorted-unique comma-separated union, or `None`) from
    /// `speech_segments`.
    pub fn recompute_aggregates(&mut self) {
        self.text = self
            .speech_segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut languages: Vec<String> = self
            .speech_segments
            .iter()
            .filter_map(|s| s.language.clone())
            .filter(|l| !l.is_empty())
            .collect();
        languages.sort();
        languages.dedup();
        self.language = if languages.is_empty() {
            None
        } else {
            Some(languages.join(","))
        };
    }

    fn has_non_empty_transcript(&self) -> bool {
        self.speech_segments.iter().any(|s| !s.text.trim().is_empty())
    }
}

/// ASR provenance written into a sidecar the first time a transcript is
/// appended.
#[derive(Debug, Clone, Default)]
pub struct TranscriberProvenance {
    pub model: String,
    pub backend: String,
    pub device: String,
    pub dtype: String,
}

/// Compute the terminal `status` for a closing archive.
fn compute_status(transcriber_configured: bool, had_speech: bool, pending: u32, has_transcripts: bool) -> &'static str {
    if !transcriber_configured {
        if !had_speech {
            "no_speech"
        } else {
            "pending_asr"
        }
    } else if has_transcripts {
        "ok"
    } else if pending > 0 {
        "pending_asr"
    } else if !had_speech {
        "no_speech"
    } else {
        "no_text"
    }
}

/// Process-wide sidecar store: atomic JSON writes plus the pending-job
/// count table, both behind one lock.
#[derive(Default)]
pub struct SidecarStore {
    inner: Mutex<HashMap<PathBuf, u32>>,
}

impl SidecarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the initial sidecar document when an archive opens.
    pub fn init(&self, path: &Path, doc: &SidecarDoc) -> Result<()> {
        let _guard = self.inner.lock();
        write_json_atomic(path, doc)
    }

    /// Record that a job has been enqueued for `path`'s sidecar.
    pub fn enqueue_job(&self, path: &Path) {
        let mut pending = self.inner.lock();
        *pending.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    /// Current pending-job count for `path` (0 if none outstanding).
    pub fn pending_count(&self, path: &Path) -> u32 {
        self.inner.lock().get(path).copied().unwrap_or(0)
    }

    /// Decrement `path`'s pending count without touching the document on
    /// disk. Used when a job completes with no text to append (empty
    /// result or transcriber failure) — the pending-job count is always
    /// decremented after processing, regardless of outcome.
    pub fn decrement_pending(&self, path: &Path) {
        let mut pending = self.inner.lock();
        if let Some(count) = pending.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(path);
            }
        }
    }

    /// Merge a completed ASR segment into `path`'s sidecar and decrement its
    /// pending count. Always writes `status = "ok"` on a non-empty segment —
    /// the worker writes `ok` every time it appends a transcript.
    pub fn append_segment(
        &self,
        path: &Path,
        segment: SpeechSegment,
        provenance: Option<&TranscriberProvenance>,
    ) -> Result<()> {
        let mut pending = self.inner.lock();

        let mut doc = read_or_empty(path)?;
        let text_is_empty = segment.text.trim().is_empty();
        doc.speech_segments.push(segment);
        doc.recompute_aggregates();
        if !text_is_empty {
            doc.status = "ok".to_string();
        }
        if let Some(p) = provenance {
            doc.model = Some(p.model.clone());
            doc.backend = Some(p.backend.clone());
            doc.device = Some(p.device.clone());
            doc.dtype = Some(p.dtype.clone());
        }
        write_json_atomic(path, &doc)?;

        if let Some(count) = pending.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(path);
            }
        }
        Ok(())
    }

    /// Compute and write the final `status` when an archive closes.
    /// `transcriber_configured` mirrors whether ASR is enabled at
    /// all for this run; `had_speech` is the segmenter's `had_speech` flag.
    pub fn finalize(&self, path: &Path, transcriber_configured: bool, had_speech: bool) -> Result<()> {
        let pending = self.inner.lock();
        let pending_count = pending.get(path).copied().unwrap_or(0);

        let mut doc = read_or_empty(path)?;
        let has_transcripts = doc.has_non_empty_transcript();
        doc.status =
            compute_status(transcriber_configured, had_speech, pending_count, has_transcripts)
                .to_string();
        write_json_atomic(path, &doc)
    }
}

/// Read a sidecar JSON document, treating a missing file or a parse
/// failure as an empty document — read failures are swallowed rather than
/// propagated.
fn read_or_empty(path: &Path) -> Result<SidecarDoc> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SidecarDoc::default()),
        Err(_) => Ok(SidecarDoc::default()),
    }
}

/// Write `doc` to `path` via write-to-temp-file + durable rename, so a
/// concurrent reader never observes a truncated file.
pub fn write_json_atomic<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("sidecar")
    ));

    let body = serde_json::to_vec_pretty(doc)
        .map_err(|e| VadrecError::SidecarIo(format!("serialize {}: {e}", path.display())))?;

    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(&body)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .map_err(|e| VadrecError::SidecarIo(format!("rename into {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_table_covers_all_combinations() {
        assert_eq!(compute_status(false, false, 0, false), "no_speech");
        assert_eq!(compute_status(false, true, 0, false), "pending_asr");
        assert_eq!(compute_status(true, true, 0, true), "ok");
        assert_eq!(compute_status(true, true, 3, false), "pending_asr");
        assert_eq!(compute_status(true, false, 0, false), "no_speech");
        assert_eq!(compute_status(true, true, 0, false), "no_text");
    }

    #[test]
    fn recompute_aggregates_joins_nonempty_text_and_unions_language() {
        let mut doc = SidecarDoc::default();
        doc.speech_segments = vec![
            SpeechSegment {
                text: "hello".into(),
                language: Some("en".into()),
                ..Default::default()
            },
            SpeechSegment {
                text: String::new(),
                language: Some("en".into()),
                ..Default::default()
            },
            SpeechSegment {
                text: "world".into(),
                language: Some("fr".into()),
                ..Default::default()
            },
        ];
        doc.recompute_aggregates();
        assert_eq!(doc.text, "hello\nworld");
        assert_eq!(doc.language.as_deref(), Some("en,fr"));
    }

    #[test]
    fn round_trip_preserves_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.json");
        let mut doc = SidecarDoc {
            audio_file: "eve_live_20260101_000000.wav".into(),
            audio_path: "/tmp/eve_live_20260101_000000.wav".into(),
            asr_enabled: true,
            asr_mode: Some("live".into()),
            status: "recording".into(),
            ..Default::default()
        };
        write_json_atomic(&path, &doc).unwrap();
        let reread: SidecarDoc = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread.audio_file, doc.audio_file);
        assert_eq!(reread.status, doc.status);

        doc.status = "ok".into();
        write_json_atomic(&path, &doc).unwrap();
        let reread2: SidecarDoc = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread2.status, "ok");
    }

    #[test]
    fn append_segment_decrements_pending_and_sets_ok() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.json");
        let store = SidecarStore::new();
        let doc = SidecarDoc {
            audio_file: "seg.wav".into(),
            status: "recording".into(),
            ..Default::default()
        };
        store.init(&path, &doc).unwrap();
        store.enqueue_job(&path);
        store.enqueue_job(&path);
        assert_eq!(store.pending_count(&path), 2);

        store
            .append_segment(
                &path,
                SpeechSegment {
                    text: "hello".into(),
                    language: Some("en".into()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(store.pending_count(&path), 1);

        let reread: SidecarDoc = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread.status, "ok");
        assert_eq!(reread.text, "hello");
    }

    #[test]
    fn finalize_no_transcriber_no_speech_is_no_speech() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.json");
        let store = SidecarStore::new();
        store
            .init(
                &path,
                &SidecarDoc {
                    audio_file: "seg.wav".into(),
                    status: "recording".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        store.finalize(&path, false, false).unwrap();
        let reread: SidecarDoc = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(reread.status, "no_speech");
    }
}
