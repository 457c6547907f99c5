//! Device supervisor — periodic health checks on the active input device and
//! the auto-switch candidate scan.
//!
//! Both protocols are pure decision logic: they never touch a live stream
//! directly, only [`crate::audio::device::enumerate_input_devices`] and
//! [`crate::audio::probe_device_rms`]. Effecting a switch is the
//! orchestrator's job, driven by the [`ControlSignal`] this module returns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

use crate::audio::device::{self, DeviceFingerprint, DeviceSelector};
use crate::audio::probe_device_rms;
use crate::config::RecorderConfig;
use crate::error::ControlSignal;

/// How long a candidate that just failed a probe is skipped for.
const PROBE_BACKOFF: Duration = Duration::from_secs(30);

/// Whether `best_rms` is loud enough to switch away from `current_rms`.
///
/// The ratio requirement only applies once the current device itself
/// clears `min_rms` — if the current mic is already below the floor, any
/// candidate that clears the floor qualifies regardless of ratio.
fn clears_switch_floor(current_rms: f32, best_rms: f32, min_rms: f32, min_ratio: f32) -> bool {
    if best_rms < min_rms {
        return false;
    }
    if current_rms >= min_rms && best_rms < current_rms * min_ratio {
        return false;
    }
    true
}

/// Tracks health-check and auto-switch timing/state across orchestrator
/// loop iterations.
pub struct DeviceSupervisor {
    config: RecorderConfig,
    last_health_check: Instant,
    last_scan: Instant,
    last_switch: Option<Instant>,
    scan_index: usize,
    /// The single best candidate from the most recent scan(s) and how many
    /// consecutive scans it's won, reset whenever a different candidate
    /// becomes best.
    switch_candidate: Option<DeviceFingerprint>,
    switch_candidate_hits: u32,
    /// Devices that failed a probe recently enough to still be skipped.
    probe_backoff: HashMap<DeviceFingerprint, Instant>,
}

impl DeviceSupervisor {
    pub fn new(config: RecorderConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_health_check: now,
            last_scan: now,
            last_switch: None,
            scan_index: 0,
            switch_candidate: None,
            switch_candidate_hits: 0,
            probe_backoff: HashMap::new(),
        }
    }

    fn clear_switch_candidate(&mut self) {
        self.switch_candidate = None;
        self.switch_candidate_hits = 0;
    }

    /// Update the tracked best candidate, resetting the hit count to 1
    /// whenever a different candidate becomes best. Returns the hit count
    /// after this update.
    fn mark_switch_candidate(&mut self, candidate: &DeviceFingerprint) -> u32 {
        if self.switch_candidate.as_ref() == Some(candidate) {
            self.switch_candidate_hits += 1;
        } else {
            self.switch_candidate = Some(candidate.clone());
            self.switch_candidate_hits = 1;
        }
        self.switch_candidate_hits
    }

    /// Whether enough time has passed to run another health check.
    pub fn health_check_due(&self) -> bool {
        match self.config.device_check_interval() {
            Some(interval) => self.last_health_check.elapsed() >= interval,
            None => false,
        }
    }

    /// Verify `current` still appears in the live device enumeration. A
    /// device can vanish or get reassigned a new index without the stream
    /// itself erroring.
    pub fn check_health(&mut self, current: &DeviceFingerprint) -> Option<ControlSignal> {
        self.last_health_check = Instant::now();
        let devices = device::enumerate_input_devices();
        let still_present = devices.iter().any(|d| &d.fingerprint() == current);
        if still_present {
            None
        } else {
            Some(ControlSignal::DeviceUnavailable {
                reason: format!("device '{}' no longer present in enumeration", current.name),
            })
        }
    }

    /// Whether enough time has passed to run another auto-switch scan.
    pub fn scan_due(&self) -> bool {
        match self.config.auto_switch_scan_interval() {
            Some(interval) => self.last_scan.elapsed() >= interval,
            None => false,
        }
    }

    /// Probe candidate devices and decide whether to request a switch.
    /// `current_rms` is the active device's
    /// recently smoothed RMS level, supplied by the segmenter so the scan
    /// doesn't need to reopen the current stream to get a baseline.
    pub fn scan_for_better_device(
        &mut self,
        current: &DeviceFingerprint,
        current_rms: f32,
        currently_in_speech: bool,
    ) -> Option<ControlSignal> {
        self.last_scan = Instant::now();

        if currently_in_speech {
            return None;
        }
        if let Some(last_switch) = self.last_switch {
            let cooldown = Duration::from_secs_f64(self.config.auto_switch_cooldown_seconds.max(0.0));
            if last_switch.elapsed() < cooldown {
                return None;
            }
        }

        let devices = device::enumerate_input_devices();
        let candidates = device::auto_switch_candidates(
            &devices,
            &self.config.excluded_input_keywords,
            Some(current),
            self.config.channels,
            self.config.auto_switch_max_candidates_per_scan,
            self.scan_index,
        );
        self.scan_index = self.scan_index.wrapping_add(1);

        let probe_duration = Duration::from_secs_f64(self.config.auto_switch_probe_seconds.max(0.0));
        let min_rms = self.config.auto_switch_min_rms;
        let min_ratio = self.config.auto_switch_min_ratio;
        let required_confirmations = self.config.auto_switch_confirmations.max(1);
        let now = Instant::now();

        // Reduce the scan to a single best (max-probed-RMS) candidate,
        // skipping any still in post-failure backoff.
        let mut best: Option<(device::DeviceInfo, f32)> = None;
        for candidate in &candidates {
            let fingerprint = candidate.fingerprint();
            if let Some(&until) = self.probe_backoff.get(&fingerprint) {
                if now < until {
                    continue;
                }
            }

            match probe_device_rms(
                candidate,
                self.config.sample_rate,
                self.config.channels,
                probe_duration,
            ) {
                Ok(probed) => {
                    if best.as_ref().map(|(_, rms)| probed > *rms).unwrap_or(true) {
                        best = Some((candidate.clone(), probed));
                    }
                }
                Err(_) => {
                    self.probe_backoff.insert(fingerprint, now + PROBE_BACKOFF);
                }
            }
        }

        let Some((best_candidate, best_rms)) = best else {
            self.clear_switch_candidate();
            return None;
        };

        if !clears_switch_floor(current_rms, best_rms, min_rms, min_ratio) {
            self.clear_switch_candidate();
            return None;
        }

        let hits = self.mark_switch_candidate(&best_candidate.fingerprint());
        if hits < required_confirmations {
            return None;
        }

        self.clear_switch_candidate();
        self.last_switch = Some(Instant::now());
        info!(candidate = %best_candidate.label(), "auto-switch requesting device change");
        Some(ControlSignal::DeviceSwitchRequest {
            to: DeviceSelector::Name(best_candidate.name.clone()),
            reason: format!(
                "'{}' sustained {:.1}x current input level",
                best_candidate.name, min_ratio
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RecorderConfig {
        RecorderConfig {
            auto_switch_confirmations: 1,
            auto_switch_cooldown_seconds: 0.0,
            ..Default::default()
        }
    }

    fn fp(name: &str) -> DeviceFingerprint {
        DeviceFingerprint {
            name: name.to_string(),
            host_api: "TestHost".to_string(),
        }
    }

    #[test]
    fn scan_skips_while_in_speech() {
        let mut sup = DeviceSupervisor::new(cfg());
        let current = fp("Built-in Microphone");
        assert!(sup.scan_for_better_device(&current, 0.01, true).is_none());
    }

    #[test]
    fn scan_respects_cooldown() {
        let mut cfg = cfg();
        cfg.auto_switch_cooldown_seconds = 60.0;
        let mut sup = DeviceSupervisor::new(cfg);
        sup.last_switch = Some(Instant::now());
        let current = fp("Built-in Microphone");
        assert!(sup.scan_for_better_device(&current, 0.01, false).is_none());
    }

    #[test]
    fn health_check_due_respects_configured_interval() {
        let mut cfg = cfg();
        cfg.device_check_seconds = 0.0;
        let sup = DeviceSupervisor::new(cfg);
        assert!(!sup.health_check_due(), "check-seconds <= 0 disables health checks");
    }

    #[test]
    fn check_health_flags_vanished_device() {
        // No real cpal devices in a test environment, so enumeration is
        // empty — any fingerprint should be reported unavailable.
        let mut sup = DeviceSupervisor::new(cfg());
        let current = fp("Nonexistent Device");
        let signal = sup.check_health(&current);
        assert!(matches!(signal, Some(ControlSignal::DeviceUnavailable { .. })));
    }

    #[test]
    fn ratio_gate_only_applies_once_current_clears_floor() {
        // current_rms (0.005) is below min_rms (0.006): any candidate that
        // itself clears the floor qualifies regardless of ratio.
        assert!(clears_switch_floor(0.005, 0.007, 0.006, 1.8));
        // current_rms clears the floor: the ratio now gates the decision.
        assert!(!clears_switch_floor(0.01, 0.011, 0.006, 1.8));
        assert!(clears_switch_floor(0.01, 0.02, 0.006, 1.8));
    }

    #[test]
    fn mark_switch_candidate_resets_hits_on_new_best() {
        let mut sup = DeviceSupervisor::new(cfg());
        let a = fp("USB Microphone");
        let b = fp("Webcam Mic");
        assert_eq!(sup.mark_switch_candidate(&a), 1);
        assert_eq!(sup.mark_switch_candidate(&a), 2);
        assert_eq!(sup.mark_switch_candidate(&b), 1, "new best candidate resets hit count");
        assert_eq!(sup.mark_switch_candidate(&b), 2);
    }
}
