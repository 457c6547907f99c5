//! Audio device enumeration, fingerprinting, and selection.

use serde::{Deserialize, Serialize};

/// How the operator asked for an input device, as parsed from the `--device`
/// flag: literal `default`/`auto`/empty → system default; numeric or `:N` →
/// index N; otherwise a name substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    Default,
    Index(usize),
    Name(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Default
    }
}

impl DeviceSelector {
    /// Parse a CLI `--device` value into a selector.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("default")
            || trimmed.eq_ignore_ascii_case("auto")
        {
            return DeviceSelector::Default;
        }
        if let Some(rest) = trimmed.strip_prefix(':') {
            if let Ok(idx) = rest.parse::<usize>() {
                return DeviceSelector::Index(idx);
            }
        }
        if let Ok(idx) = trimmed.parse::<usize>() {
            return DeviceSelector::Index(idx);
        }
        DeviceSelector::Name(trimmed.to_string())
    }
}

/// Metadata about an audio input device, captured at enumeration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Index into the current enumeration order (not stable across host
    /// reconnects — use [`DeviceFingerprint`] for identity tracking).
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Identifier of the audio host backend (CoreAudio/WASAPI/ALSA/...).
    pub host_api: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Maximum input channel count the device's default config reports.
    /// `0` when unknown (enumeration failure, or built from a context with
    /// no cpal handle).
    pub max_input_channels: u16,
}

impl DeviceInfo {
    /// Label used in sidecar `input_device` field and console renderer:
    /// `<index>:<name>` or `default`.
    pub fn label(&self) -> String {
        if self.is_default {
            "default".to_string()
        } else {
            format!("{}:{}", self.index, self.name)
        }
    }

    pub fn fingerprint(&self) -> DeviceFingerprint {
        DeviceFingerprint {
            name: self.name.clone(),
            host_api: self.host_api.clone(),
        }
    }
}

/// `(name, host_api)` pair used to track a microphone across index
/// reassignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    pub name: String,
    pub host_api: String,
}

const MACBOOK_BUILTIN_KEYWORDS: &[&str] = &["macbook", "built-in", "internal"];

/// List all available audio input devices on the current host.
///
/// Returns an empty `Vec` if cpal is not available or no input devices exist.
#[cfg(feature = "audio-cpal")]
pub fn enumerate_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let host_api = format!("{:?}", host.id());
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                let max_input_channels = device
                    .default_input_config()
                    .map(|c| c.channels())
                    .unwrap_or(0);
                DeviceInfo {
                    index: idx,
                    name,
                    host_api: host_api.clone(),
                    is_default,
                    max_input_channels,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn enumerate_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// Whether a device name contains any excluded keyword (case-insensitive
/// substring match, as configured by `--exclude-device-keywords`).
pub fn is_excluded(name: &str, excluded_keywords: &[String]) -> bool {
    let lowered = name.to_ascii_lowercase();
    excluded_keywords
        .iter()
        .any(|kw| !kw.is_empty() && lowered.contains(kw.as_str()))
}

/// Fallback device selection: list input
/// devices excluding excluded-keyword matches; prefer one whose name
/// contains a macbook/built-in/internal keyword; otherwise the first
/// available. If nothing remains after exclusion, retry including excluded
/// devices.
pub fn select_fallback_device(
    devices: &[DeviceInfo],
    excluded_keywords: &[String],
) -> Option<DeviceInfo> {
    let filtered: Vec<&DeviceInfo> = devices
        .iter()
        .filter(|d| !is_excluded(&d.name, excluded_keywords))
        .collect();

    let candidates = if filtered.is_empty() {
        devices.iter().collect::<Vec<_>>()
    } else {
        filtered
    };

    if candidates.is_empty() {
        return None;
    }

    let preferred = candidates.iter().find(|d| {
        let lowered = d.name.to_ascii_lowercase();
        MACBOOK_BUILTIN_KEYWORDS.iter().any(|kw| lowered.contains(kw))
    });

    preferred.or(candidates.first()).map(|d| (*d).clone())
}

/// Round-robin candidate selection for an auto-switch scan: input devices
/// excluding excluded-keyword matches, the currently active device, and
/// devices that can't supply `required_channels`, capped at
/// `max_candidates`. `scan_index` rotates the starting offset so repeated
/// scans sample different candidates when there are more than
/// `max_candidates` eligible devices.
pub fn auto_switch_candidates(
    devices: &[DeviceInfo],
    excluded_keywords: &[String],
    current: Option<&DeviceFingerprint>,
    required_channels: u16,
    max_candidates: usize,
    scan_index: usize,
) -> Vec<DeviceInfo> {
    let eligible: Vec<DeviceInfo> = devices
        .iter()
        .filter(|d| !is_excluded(&d.name, excluded_keywords))
        .filter(|d| current.map(|fp| fp != &d.fingerprint()).unwrap_or(true))
        .filter(|d| d.max_input_channels >= required_channels)
        .cloned()
        .collect();

    if eligible.is_empty() || max_candidates == 0 {
        return Vec::new();
    }

    let n = eligible.len();
    let offset = scan_index % n;
    (0..n.min(max_candidates))
        .map(|i| eligible[(offset + i) % n].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(index: usize, name: &str) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.to_string(),
            host_api: "TestHost".to_string(),
            is_default: false,
            max_input_channels: 1,
        }
    }

    #[test]
    fn parses_default_aliases() {
        assert_eq!(DeviceSelector::parse(""), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse("default"), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse("AUTO"), DeviceSelector::Default);
    }

    #[test]
    fn parses_index_forms() {
        assert_eq!(DeviceSelector::parse("3"), DeviceSelector::Index(3));
        assert_eq!(DeviceSelector::parse(":3"), DeviceSelector::Index(3));
    }

    #[test]
    fn parses_name() {
        assert_eq!(
            DeviceSelector::parse("USB Microphone"),
            DeviceSelector::Name("USB Microphone".to_string())
        );
    }

    #[test]
    fn excludes_iphone_and_continuity() {
        let excluded = vec!["iphone".to_string(), "continuity".to_string()];
        assert!(is_excluded("John's iPhone Microphone", &excluded));
        assert!(is_excluded("Continuity Camera", &excluded));
        assert!(!is_excluded("USB Microphone", &excluded));
    }

    #[test]
    fn fallback_prefers_builtin() {
        let devices = vec![dev(0, "USB Microphone"), dev(1, "MacBook Pro Microphone")];
        let chosen = select_fallback_device(&devices, &[]).unwrap();
        assert_eq!(chosen.name, "MacBook Pro Microphone");
    }

    #[test]
    fn fallback_falls_back_to_first_when_no_builtin() {
        let devices = vec![dev(0, "USB Microphone"), dev(1, "Line In")];
        let chosen = select_fallback_device(&devices, &[]).unwrap();
        assert_eq!(chosen.name, "USB Microphone");
    }

    #[test]
    fn fallback_retries_with_excluded_when_nothing_remains() {
        let devices = vec![dev(0, "John's iPhone Microphone")];
        let excluded = vec!["iphone".to_string()];
        let chosen = select_fallback_device(&devices, &excluded).unwrap();
        assert_eq!(chosen.name, "John's iPhone Microphone");
    }

    #[test]
    fn auto_switch_candidates_exclude_current_device() {
        let devices = vec![dev(0, "USB Microphone"), dev(1, "Webcam Mic")];
        let current = devices[0].fingerprint();
        let candidates =
            auto_switch_candidates(&devices, &[], Some(&current), 1, 2, 0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Webcam Mic");
    }

    #[test]
    fn auto_switch_candidates_cap_at_max_per_scan() {
        let devices = vec![dev(0, "A"), dev(1, "B"), dev(2, "C")];
        let candidates = auto_switch_candidates(&devices, &[], None, 1, 2, 0);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn auto_switch_candidates_exclude_devices_with_too_few_channels() {
        let mut devices = vec![dev(0, "Mono USB Mic"), dev(1, "Stereo Interface")];
        devices[0].max_input_channels = 1;
        devices[1].max_input_channels = 2;
        let candidates = auto_switch_candidates(&devices, &[], None, 2, 4, 0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Stereo Interface");
    }
}
