//! vadrec — long-running microphone recorder.
//!
//! Argument parsing is a deliberately small hand-rolled `env::args()` walk
//! rather than a dependency: the recorder engine itself has no opinion on
//! how its `RecorderConfig` gets built, and this flag list is short and flat
//! enough not to need a parser generator.

mod flags;
mod transcriber;
mod vad;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use vadrec_core::asr::Transcriber;
use vadrec_core::audio::device;
use vadrec_core::Orchestrator;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vadrec=info".parse().unwrap()),
        )
        .init();
}

fn list_devices() {
    let devices = device::enumerate_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return;
    }
    for d in &devices {
        let marker = if d.is_default { " (default)" } else { "" };
        println!("{}: {}{}", d.index, d.name, marker);
    }
}

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--list-devices") {
        list_devices();
        return ExitCode::SUCCESS;
    }

    let parsed = match flags::parse(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("vadrec: {e}");
            return ExitCode::from(1);
        }
    };

    info!(
        device = ?parsed.config.device,
        output_dir = %parsed.config.output_dir.display(),
        sample_rate = parsed.config.sample_rate,
        asr_enabled = parsed.config.asr_enabled,
        auto_switch_enabled = parsed.config.auto_switch_enabled,
        "starting vadrec"
    );

    let vad_gate = vad::build(&parsed);
    let transcriber = if parsed.config.asr_enabled {
        let mut t = transcriber::build(&parsed.asr);
        if let Err(e) = t.verify_dependencies() {
            error!("ASR backend unusable: {e}");
            return ExitCode::from(1);
        }
        if parsed.asr.preload {
            if let Err(e) = t.preload() {
                error!("ASR preload failed: {e}");
                return ExitCode::from(1);
            }
        }
        Some(t)
    } else {
        None
    };
    let total_duration = parsed.total_duration;

    let mut orchestrator = match Orchestrator::start(parsed.config, vad_gate, transcriber) {
        Ok(o) => o,
        Err(e) => {
            error!("failed to start recorder: {e}");
            return ExitCode::from(1);
        }
    };

    // Operator interrupt finalizes cleanly and returns success.
    let stop_requested = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_requested);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        error!("failed to install interrupt handler: {e}");
    }

    let deadline = total_duration.map(|d| std::time::Instant::now() + d);
    while !stop_requested.load(Ordering::SeqCst) {
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                info!("configured recording duration elapsed");
                break;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    info!("stopping");
    orchestrator.stop();
    ExitCode::SUCCESS
}
