//! Console renderer — a rate-limited two-line TTY status meter.
//!
//! Never blocks the orchestrator loop: the shared ASR preview is read with
//! `try_lock`, and a render is skipped entirely on contention rather than
//! waiting.

pub mod width;

use std::collections::VecDeque;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const LEVEL_METER_WIDTH: usize = 28;
const FLOOR_DB: f32 = -72.0;
const CEILING_DB: f32 = -18.0;
const ASR_HISTORY_DEPTH: usize = 3;
const DEVICE_LABEL_MAX_WIDTH: usize = 28;

/// Rolling ASR preview, written by the ASR worker thread and read by the
/// renderer on the orchestrator thread.
#[derive(Default)]
pub struct ConsoleState {
    history: Mutex<VecDeque<String>>,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed, non-empty transcript for the rolling preview.
    pub fn record_asr_output(&self, text: &str) {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return;
        }
        let mut history = self.history.lock();
        history.push_back(normalized);
        while history.len() > ASR_HISTORY_DEPTH {
            history.pop_front();
        }
    }

    /// Up to the last three transcripts joined by ` | `. `None` on lock
    /// contention, in which case the caller should skip this frame.
    fn history_preview(&self) -> Option<String> {
        let history = self.history.try_lock()?;
        Some(history.iter().cloned().collect::<Vec<_>>().join(" | "))
    }
}

/// Which stream a renderer frame is written to, chosen once at construction.
enum FeedbackStream {
    Stdout,
    Stderr,
}

impl FeedbackStream {
    /// Prefer stdout when it's a TTY, falling back to stderr, matching the
    /// same stdout-first preference the PCM/log split assumes elsewhere:
    /// `vadrec 2> app.log` has an interactive stdout and should still show
    /// the meter there. `None` when neither is interactive.
    fn select() -> Option<Self> {
        if io::stdout().is_terminal() {
            Some(FeedbackStream::Stdout)
        } else if io::stderr().is_terminal() {
            Some(FeedbackStream::Stderr)
        } else {
            None
        }
    }

    fn write_frame(&self, frame: &str) {
        match self {
            FeedbackStream::Stdout => {
                let mut out = io::stdout();
                let _ = write!(out, "{frame}");
                let _ = out.flush();
            }
            FeedbackStream::Stderr => {
                let mut out = io::stderr();
                let _ = write!(out, "{frame}");
                let _ = out.flush();
            }
        }
    }
}

/// TTY status meter: elapsed time, RMS level bar, VAD state, active
/// microphone, auto-switch state, rolling ASR preview.
pub struct ConsoleRenderer {
    enabled: bool,
    stream: Option<FeedbackStream>,
    hz: f64,
    start_time: Instant,
    last_refresh: Instant,
    lines_active: bool,
    state: Arc<ConsoleState>,
}

impl ConsoleRenderer {
    /// `enabled` is the operator's `console-feedback` flag; the renderer
    /// additionally disables itself when neither stdout nor stderr is a
    /// TTY, and otherwise picks whichever of the two is interactive
    /// (stdout first) to write frames to.
    pub fn new(enabled: bool, hz: f64, state: Arc<ConsoleState>) -> Self {
        let now = Instant::now();
        let stream = if enabled { FeedbackStream::select() } else { None };
        Self {
            enabled: stream.is_some(),
            stream,
            hz: hz.max(0.5),
            start_time: now,
            last_refresh: now - Duration::from_secs(3600),
            lines_active: false,
            state,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render one frame if enabled and the rate limit allows it. Intended
    /// to be called once per processed audio block.
    pub fn render(&mut self, rms: f32, in_speech: bool, device_label: &str, auto_switch_enabled: bool) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_refresh) < Duration::from_secs_f64(1.0 / self.hz) {
            return;
        }

        let Some(asr_history) = self.state.history_preview() else {
            return;
        };
        self.last_refresh = now;

        let elapsed = self.start_time.elapsed().as_secs();
        let elapsed_str = format!(
            "{:02}:{:02}:{:02}",
            elapsed / 3600,
            (elapsed % 3600) / 60,
            elapsed % 60
        );
        let state = if in_speech { "SPEECH" } else { "IDLE" };
        let auto_state = if auto_switch_enabled { "ON" } else { "OFF" };
        let meter = level_meter(rms);
        let db = rms_to_db(rms);
        let device = width::shorten_by_display_width(device_label, DEVICE_LABEL_MAX_WIDTH);

        let line_base =
            format!("REC {elapsed_str} | {meter} {db:6.1}dB | {state} | MIC {device} | AUTO {auto_state}");
        let width_limit = terminal_columns().saturating_sub(1);
        let status_line = width::shorten_by_display_width(&line_base, width_limit);

        let asr_prefix = "ASR | ";
        let asr_remaining = width_limit
            .saturating_sub(width::display_width(asr_prefix))
            .max(8);
        let asr_line = format!(
            "{asr_prefix}{}",
            width::shorten_by_display_width(&asr_history, asr_remaining)
        );

        let mut frame = String::new();
        if self.lines_active {
            frame.push_str("\x1b[1A");
        }
        frame.push_str(&format!("\r\x1b[2K{status_line}\n\r\x1b[2K{asr_line}"));
        if let Some(stream) = &self.stream {
            stream.write_frame(&frame);
        }
        self.lines_active = true;
    }

    /// Clear the rendered lines before any log output and on shutdown.
    pub fn clear(&mut self) {
        if !self.enabled || !self.lines_active {
            return;
        }
        if let Some(stream) = &self.stream {
            stream.write_frame("\x1b[1A\r\x1b[2K\n\r\x1b[2K");
        }
        self.lines_active = false;
    }
}

fn rms_to_db(rms: f32) -> f32 {
    20.0 * rms.max(1e-8).log10()
}

fn level_meter(rms: f32) -> String {
    let db = rms_to_db(rms);
    let ratio = ((db - FLOOR_DB) / (CEILING_DB - FLOOR_DB)).clamp(0.0, 1.0);
    let mut filled = (LEVEL_METER_WIDTH as f32 * ratio).round() as usize;
    if rms > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(LEVEL_METER_WIDTH);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(LEVEL_METER_WIDTH - filled))
}

fn terminal_columns() -> usize {
    crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(80)
        .max(40)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_records_and_caps_at_three() {
        let state = ConsoleState::new();
        state.record_asr_output("one");
        state.record_asr_output("two");
        state.record_asr_output("three");
        state.record_asr_output("four");
        let preview = state.history_preview().unwrap();
        assert_eq!(preview, "two | three | four");
    }

    #[test]
    fn empty_text_is_not_recorded() {
        let state = ConsoleState::new();
        state.record_asr_output("   ");
        assert_eq!(state.history_preview().unwrap(), "");
    }

    #[test]
    fn level_meter_is_empty_at_floor() {
        let meter = level_meter(0.0);
        assert_eq!(meter, format!("[{}]", "-".repeat(LEVEL_METER_WIDTH)));
    }

    #[test]
    fn level_meter_shows_at_least_one_bar_for_nonzero_rms() {
        let meter = level_meter(1e-7);
        assert!(meter.contains('#'));
    }

    #[test]
    fn level_meter_is_full_at_ceiling() {
        let meter = level_meter(1.0);
        assert_eq!(meter, format!("[{}]", "#".repeat(LEVEL_METER_WIDTH)));
    }
}
