//! Hand-rolled `--flag value` / `--flag` / `--no-flag` parser for the
//! recorder CLI; names and defaults taken from the Python reference's
//! `build_parser`.

use std::path::PathBuf;
use std::time::Duration;

use vadrec_core::audio::device::DeviceSelector;
use vadrec_core::RecorderConfig;

/// Transcriber-facing flags, not part of `RecorderConfig` since ASR backend
/// selection is an injected out-of-scope collaborator.
pub struct AsrFlags {
    pub model: String,
    pub language: String,
    pub device: String,
    pub dtype: String,
    pub max_new_tokens: u32,
    pub max_batch_size: u32,
    pub preload: bool,
}

impl Default for AsrFlags {
    fn default() -> Self {
        Self {
            model: "Qwen/Qwen3-ASR-0.6B".to_string(),
            language: "auto".to_string(),
            device: "auto".to_string(),
            dtype: "auto".to_string(),
            max_new_tokens: 256,
            max_batch_size: 1,
            preload: false,
        }
    }
}

pub struct ParsedArgs {
    pub config: RecorderConfig,
    pub asr: AsrFlags,
    /// Total recording duration (`--total-hours`); `None` means unbounded.
    pub total_duration: Option<Duration>,
}

/// Parse `args` into a [`RecorderConfig`] and the ASR/duration flags that
/// sit outside it. Unknown flags are a fatal error.
pub fn parse(args: &[String]) -> Result<ParsedArgs, String> {
    let mut config = RecorderConfig::default();
    let mut asr = AsrFlags::default();
    let mut total_hours = 24.0_f64;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        macro_rules! value {
            () => {{
                i += 1;
                args.get(i).ok_or_else(|| format!("{flag} requires a value"))?
            }};
        }
        macro_rules! parse_value {
            ($ty:ty) => {{
                let raw = value!();
                raw.parse::<$ty>()
                    .map_err(|_| format!("{flag}: invalid value '{raw}'"))?
            }};
        }

        match flag {
            "--device" => config.device = DeviceSelector::parse(value!()),
            "--output-dir" => config.output_dir = PathBuf::from(value!()),
            "--prefix" => config.prefix = value!().to_string(),

            "--total-hours" => total_hours = parse_value!(f64),
            "--segment-minutes" => config.max_segment_minutes = parse_value!(f64),

            "--device-check-seconds" => config.device_check_seconds = parse_value!(f64),
            "--device-retry-seconds" => config.device_retry_seconds = parse_value!(f64),

            "--auto-switch-device" => config.auto_switch_enabled = true,
            "--no-auto-switch-device" => config.auto_switch_enabled = false,
            "--auto-switch-scan-seconds" => config.auto_switch_scan_seconds = parse_value!(f64),
            "--auto-switch-probe-seconds" => config.auto_switch_probe_seconds = parse_value!(f64),
            "--auto-switch-max-candidates-per-scan" => {
                config.auto_switch_max_candidates_per_scan = parse_value!(usize)
            }
            "--auto-switch-min-rms" => config.auto_switch_min_rms = parse_value!(f32),
            "--auto-switch-min-ratio" => config.auto_switch_min_ratio = parse_value!(f32),
            "--auto-switch-cooldown-seconds" => {
                config.auto_switch_cooldown_seconds = parse_value!(f64)
            }
            "--auto-switch-confirmations" => config.auto_switch_confirmations = parse_value!(u32),
            "--exclude-device-keywords" => {
                config.excluded_input_keywords = value!()
                    .split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            }

            "--console-feedback" => config.console_feedback_enabled = true,
            "--no-console-feedback" => config.console_feedback_enabled = false,
            "--console-feedback-hz" => config.console_feedback_hz = parse_value!(f64),

            "--disable-asr" => config.asr_enabled = false,
            "--asr-model" => asr.model = value!().to_string(),
            "--asr-language" => asr.language = value!().to_string(),
            "--asr-device" => asr.device = value!().to_string(),
            "--asr-dtype" => asr.dtype = value!().to_string(),
            "--asr-max-new-tokens" => asr.max_new_tokens = parse_value!(u32),
            "--asr-max-batch-size" => asr.max_batch_size = parse_value!(u32),
            "--asr-preload" => asr.preload = true,

            // Already handled before config construction in main().
            "--list-devices" => {}

            other => return Err(format!("unrecognized flag '{other}'")),
        }
        i += 1;
    }

    let total_duration = if total_hours > 0.0 {
        Some(Duration::from_secs_f64(total_hours * 3600.0))
    } else {
        None
    };

    Ok(ParsedArgs {
        config,
        asr,
        total_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_match_recorder_config_defaults() {
        let parsed = parse(&[]).unwrap();
        assert_eq!(parsed.config.sample_rate, RecorderConfig::default().sample_rate);
        assert!(parsed.config.asr_enabled);
        assert_eq!(parsed.total_duration, Some(Duration::from_secs_f64(24.0 * 3600.0)));
    }

    #[test]
    fn disable_asr_flag_disables_asr() {
        let parsed = parse(&args(&["--disable-asr"])).unwrap();
        assert!(!parsed.config.asr_enabled);
    }

    #[test]
    fn no_auto_switch_device_disables_it() {
        let parsed = parse(&args(&["--no-auto-switch-device"])).unwrap();
        assert!(!parsed.config.auto_switch_enabled);
    }

    #[test]
    fn device_flag_parses_index() {
        let parsed = parse(&args(&["--device", ":2"])).unwrap();
        assert_eq!(parsed.config.device, DeviceSelector::Index(2));
    }

    #[test]
    fn exclude_device_keywords_splits_and_lowercases() {
        let parsed = parse(&args(&["--exclude-device-keywords", "iPhone, Continuity"])).unwrap();
        assert_eq!(
            parsed.config.excluded_input_keywords,
            vec!["iphone".to_string(), "continuity".to_string()]
        );
    }

    #[test]
    fn zero_total_hours_means_unbounded() {
        let parsed = parse(&args(&["--total-hours", "0"])).unwrap();
        assert_eq!(parsed.total_duration, None);
    }

    #[test]
    fn unknown_flag_is_an_error() {
        assert!(parse(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(parse(&args(&["--device"])).is_err());
    }
}
