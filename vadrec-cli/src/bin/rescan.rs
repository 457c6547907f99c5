//! Offline sidecar reconciliation tool.
//!
//! The live recorder's pending-job count lives only in the orchestrator's
//! in-memory `SidecarStore`; a crash or kill -9 leaves some sidecars stuck
//! at `status = "recording"` (the segment was never closed) or
//! `status = "pending_asr"` (a transcript job was in flight when the
//! process died). This binary walks an output directory and reconciles the
//! former using the same atomic-write path the live recorder uses; it does
//! not run a transcriber itself — that remains the injected, out-of-scope
//! ASR collaborator.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};
use vadrec_core::sidecar::{SidecarDoc, SidecarStore};

struct Opts {
    input_dir: PathBuf,
    dry_run: bool,
}

fn parse_args(args: &[String]) -> Opts {
    let mut input_dir = PathBuf::from("recordings");
    let mut dry_run = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input-dir" => {
                i += 1;
                if let Some(v) = args.get(i) {
                    input_dir = PathBuf::from(v);
                }
            }
            "--dry-run" => dry_run = true,
            _ => {}
        }
        i += 1;
    }
    Opts { input_dir, dry_run }
}

fn find_sidecars(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            out.extend(find_sidecars(&path));
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    out
}

/// The archive PCM file only ever contains speech-gated samples, so a
/// non-empty WAV is equivalent to the segmenter's `had_speech` flag.
fn wav_had_speech(json_path: &Path) -> bool {
    let wav_path = json_path.with_extension("wav");
    hound::WavReader::open(&wav_path)
        .map(|r| r.duration() > 0)
        .unwrap_or(false)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vadrec=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args);

    let sidecars = find_sidecars(&opts.input_dir);
    info!(count = sidecars.len(), dir = %opts.input_dir.display(), "scanning sidecars");

    let store = SidecarStore::new();
    let mut reconciled = 0usize;
    let mut still_pending = 0usize;

    for path in &sidecars {
        let doc: SidecarDoc = match std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        {
            Some(doc) => doc,
            None => {
                warn!(sidecar = %path.display(), "unreadable sidecar, skipping");
                continue;
            }
        };

        match doc.status.as_str() {
            "recording" => {
                let had_speech = wav_had_speech(path);
                info!(
                    sidecar = %path.display(),
                    had_speech,
                    asr_enabled = doc.asr_enabled,
                    "reconciling orphaned in-progress sidecar"
                );
                if !opts.dry_run {
                    store.finalize(path, doc.asr_enabled, had_speech)?;
                }
                reconciled += 1;
            }
            "pending_asr" => {
                warn!(sidecar = %path.display(), "pending_asr has no live worker left to resolve it");
                still_pending += 1;
            }
            _ => {}
        }
    }

    info!(reconciled, still_pending, "rescan complete");
    Ok(())
}
