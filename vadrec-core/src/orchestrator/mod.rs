//! Orchestrator — owns the capture thread, the stop signal, and the
//! recovery loop around device loss and auto-switching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};

use crate::asr::{AsrWorker, Transcriber};
use crate::audio::device::{self, DeviceFingerprint, DeviceInfo, DeviceSelector};
use crate::audio::AudioSource;
use crate::config::RecorderConfig;
use crate::console::{ConsoleRenderer, ConsoleState};
use crate::error::{ControlSignal, Result, VadrecError};
use crate::segmenter::Segmenter;
use crate::sidecar::SidecarStore;
use crate::supervisor::DeviceSupervisor;
use crate::vad::VadGate;

const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Owns the background capture/recovery thread. Dropping (or calling
/// [`Orchestrator::stop`]) finalizes any in-flight speech buffer, closes the
/// current sidecar, and joins the ASR worker.
pub struct Orchestrator {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sidecar_store: Arc<SidecarStore>,
    console_state: Arc<ConsoleState>,
    asr_worker: Option<Arc<AsrWorker>>,
}

impl Orchestrator {
    /// Start recording. `transcriber` is `None` when ASR is disabled
    /// (`--disable-asr`); `vad` is the injected speech gate.
    pub fn start(
        config: RecorderConfig,
        vad: Box<dyn VadGate>,
        transcriber: Option<Box<dyn Transcriber>>,
    ) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let sidecar_store = Arc::new(SidecarStore::new());
        let console_state = Arc::new(ConsoleState::new());

        let asr_worker = transcriber.map(|t| {
            Arc::new(AsrWorker::spawn(
                t,
                Arc::clone(&sidecar_store),
                Some(Arc::clone(&console_state)),
            ))
        });

        let thread_config = config.clone();
        let thread_stop = Arc::clone(&stop_flag);
        let thread_sidecar = Arc::clone(&sidecar_store);
        let thread_console = Arc::clone(&console_state);
        let thread_asr = asr_worker.clone();

        let handle = thread::Builder::new()
            .name("vadrec-orchestrator".into())
            .spawn(move || {
                run(
                    thread_config,
                    thread_stop,
                    vad,
                    thread_sidecar,
                    thread_console,
                    thread_asr,
                );
            })
            .map_err(|e| VadrecError::Other(anyhow::anyhow!("failed to spawn orchestrator thread: {e}")))?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
            sidecar_store,
            console_state,
            asr_worker,
        })
    }

    pub fn sidecar_store(&self) -> &Arc<SidecarStore> {
        &self.sidecar_store
    }

    pub fn console_state(&self) -> &Arc<ConsoleState> {
        &self.console_state
    }

    /// Signal the capture loop to stop and wait for it to finish tearing
    /// down. The capture thread's own
    /// reference to the ASR worker is dropped when it exits; dropping ours
    /// here is what lets `AsrWorker`'s `Drop` send the sentinel and join.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.asr_worker.take();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OpenDevice {
    source: AudioSource,
    rx: Receiver<Vec<f32>>,
    info: DeviceInfo,
    fingerprint: DeviceFingerprint,
}

fn open_device(selector: &DeviceSelector, config: &RecorderConfig) -> Result<OpenDevice> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let running = Arc::new(AtomicBool::new(true));
    let (source, info) = AudioSource::open(
        selector,
        config.sample_rate,
        config.channels,
        config.chunk_samples(),
        tx,
        running,
    )?;
    Ok(OpenDevice {
        fingerprint: info.fingerprint(),
        source,
        info,
        rx,
    })
}

/// Retry opening `selector` until it succeeds or `stop_flag` is set,
/// sleeping `device_retry_seconds` between attempts.
fn open_device_with_retry(
    selector: &DeviceSelector,
    config: &RecorderConfig,
    stop_flag: &AtomicBool,
) -> Option<OpenDevice> {
    loop {
        match open_device(selector, config) {
            Ok(opened) => return Some(opened),
            Err(e) => error!(?selector, "failed to open input device: {e}"),
        }
        if stop_flag.load(Ordering::Acquire) {
            return None;
        }
        thread::sleep(config.device_retry_interval());
        if stop_flag.load(Ordering::Acquire) {
            return None;
        }
    }
}

/// Resolve the initially requested device, falling back to another input
/// device if it can't be opened at all.
fn open_initial(config: &RecorderConfig, stop_flag: &AtomicBool) -> Option<OpenDevice> {
    match open_device(&config.device, config) {
        Ok(opened) => Some(opened),
        Err(e) => {
            warn!("requested device unavailable at startup ({e}); selecting fallback");
            let devices = device::enumerate_input_devices();
            let selector = match device::select_fallback_device(&devices, &config.excluded_input_keywords) {
                Some(picked) => DeviceSelector::Name(picked.name),
                None => config.device.clone(),
            };
            open_device_with_retry(&selector, config, stop_flag)
        }
    }
}

/// Choose the selector to reopen on after `failed` becomes unavailable:
/// fall back only in default-device or auto-switch mode, otherwise retry
/// the same device.
fn recovery_selector(config: &RecorderConfig, failed: &DeviceFingerprint) -> DeviceSelector {
    let prefers_fallback = matches!(config.device, DeviceSelector::Default) || config.auto_switch_enabled;
    if !prefers_fallback {
        return config.device.clone();
    }
    let candidates: Vec<DeviceInfo> = device::enumerate_input_devices()
        .into_iter()
        .filter(|d| &d.fingerprint() != failed)
        .collect();
    match device::select_fallback_device(&candidates, &config.excluded_input_keywords) {
        Some(picked) => DeviceSelector::Name(picked.name),
        None => config.device.clone(),
    }
}

fn run(
    config: RecorderConfig,
    stop_flag: Arc<AtomicBool>,
    vad: Box<dyn VadGate>,
    sidecar_store: Arc<SidecarStore>,
    console_state: Arc<ConsoleState>,
    asr_worker: Option<Arc<AsrWorker>>,
) {
    let mut console = ConsoleRenderer::new(
        config.console_feedback_enabled,
        config.console_feedback_hz,
        Arc::clone(&console_state),
    );
    let mut supervisor = DeviceSupervisor::new(config.clone());
    let mut segmenter = Segmenter::new(config.clone(), vad, Arc::clone(&sidecar_store), asr_worker);

    let mut current = match open_initial(&config, &stop_flag) {
        Some(opened) => opened,
        None => return,
    };
    if let Err(e) = segmenter.open_segment(&current.info.label()) {
        error!("failed to open initial archive segment: {e}");
        return;
    }

    let mut recovering = false;

    loop {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }

        let mut signal: Option<ControlSignal> = None;

        match current.rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(block) => {
                if let Err(e) = segmenter.process_block(&block) {
                    error!("failed to process audio block: {e}");
                }
                console.render(
                    segmenter.smoothed_rms,
                    segmenter.currently_in_speech,
                    &current.info.label(),
                    config.auto_switch_enabled,
                );
                if segmenter.should_rotate() {
                    if let Err(e) = segmenter.close_segment() {
                        error!("failed to close rotating segment: {e}");
                    }
                    if let Err(e) = segmenter.open_segment(&current.info.label()) {
                        error!("failed to open rotated segment: {e}");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                signal = Some(ControlSignal::DeviceUnavailable {
                    reason: "audio callback channel closed".into(),
                });
            }
        }

        if signal.is_none() && supervisor.health_check_due() {
            signal = supervisor.check_health(&current.fingerprint);
        }
        if signal.is_none() && supervisor.scan_due() {
            signal = supervisor.scan_for_better_device(
                &current.fingerprint,
                segmenter.smoothed_rms,
                segmenter.currently_in_speech,
            );
        }

        let Some(signal) = signal else {
            continue;
        };

        match signal {
            ControlSignal::DeviceSwitchRequest { to, reason } => {
                info!(from = %current.info.label(), %reason, "auto-switch: reopening on a new device");
                current.source.stop();
                if let Err(e) = segmenter.close_segment() {
                    error!("failed to close segment before switch: {e}");
                }
                match open_device_with_retry(&to, &config, &stop_flag) {
                    Some(opened) => {
                        current = opened;
                        if let Err(e) = segmenter.open_segment(&current.info.label()) {
                            error!("failed to open segment after switch: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
            ControlSignal::DeviceUnavailable { reason } => {
                warn!(device = %current.info.label(), %reason, "input device unavailable");
                current.source.stop();
                if let Err(e) = segmenter.close_segment() {
                    error!("failed to close segment after device loss: {e}");
                }
                recovering = true;
                let selector = recovery_selector(&config, &current.fingerprint);
                match open_device_with_retry(&selector, &config, &stop_flag) {
                    Some(opened) => {
                        current = opened;
                        if let Err(e) = segmenter.open_segment(&current.info.label()) {
                            error!("failed to reopen archive after recovery: {e}");
                            break;
                        }
                        if recovering {
                            info!("Microphone restored. Resuming recording.");
                            recovering = false;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    current.source.stop();
    console.clear();
    if let Err(e) = segmenter.close_segment() {
        error!("failed to close final segment on shutdown: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_selector_retries_same_device_when_fallback_disabled() {
        let config = RecorderConfig {
            device: DeviceSelector::Name("USB Mic".into()),
            auto_switch_enabled: false,
            ..Default::default()
        };
        let failed = DeviceFingerprint {
            name: "USB Mic".into(),
            host_api: "TestHost".into(),
        };
        assert_eq!(recovery_selector(&config, &failed), DeviceSelector::Name("USB Mic".into()));
    }

    #[test]
    fn recovery_selector_falls_back_when_default_mode() {
        let config = RecorderConfig {
            device: DeviceSelector::Default,
            ..Default::default()
        };
        let failed = DeviceFingerprint {
            name: "gone".into(),
            host_api: "TestHost".into(),
        };
        // No real devices in a test environment, so the fallback search
        // comes up empty and we fall back to retrying the original selector.
        assert_eq!(recovery_selector(&config, &failed), DeviceSelector::Default);
    }
}
