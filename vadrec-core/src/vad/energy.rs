//! Energy-based VAD gate — the crate's reference `VadGate` implementation.
//!
//! Used by tests and as a fallback when no real VAD backend is wired in.
//! Not the production voice-activity detector — that's an injected
//! collaborator — but it follows the same RMS + hangover hysteresis shape
//! a neural VAD wrapper would need to reproduce to satisfy the `VadGate`
//! contract.
//!
//! ## Algorithm
//!
//! The chunk is walked in fixed-size analysis frames. Per frame:
//! 1. Compute RMS.
//! 2. If RMS ≥ `threshold` and not already `in_speech`, emit `Start` at the
//!    frame's offset and reset the hangover counter.
//! 3. If RMS < `threshold` and `in_speech`: if hangover frames remain, keep
//!    reporting speech and decrement the counter; otherwise emit `End` at
//!    the frame's offset.

use super::{VadEvent, VadGate};
use crate::audio::rms;

/// A simple energy-based voice activity gate.
pub struct EnergyGate {
    /// RMS amplitude threshold. Frames above this are considered speech.
    threshold: f32,
    /// Consecutive below-threshold frames tolerated before closing a
    /// speech run (prevents clipping word endings).
    hangover_frames: u32,
    /// Analysis frame size in samples.
    frame_size: usize,
    in_speech: bool,
    hangover_counter: u32,
}

impl EnergyGate {
    /// # Parameters
    /// - `threshold`: RMS level above which a frame is considered speech.
    /// - `hangover_frames`: number of below-threshold frames to extend
    ///   speech detection.
    /// - `frame_size`: analysis window in samples (default 160 ≈ 10 ms at
    ///   16 kHz).
    pub fn new(threshold: f32, hangover_frames: u32, frame_size: usize) -> Self {
        Self {
            threshold,
            hangover_frames,
            frame_size: frame_size.max(1),
            in_speech: false,
            hangover_counter: 0,
        }
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(0.02, 8, 160)
    }
}

impl VadGate for EnergyGate {
    fn detect_chunk(&mut self, samples: &[f32]) -> Vec<VadEvent> {
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < samples.len() {
            let end = (offset + self.frame_size).min(samples.len());
            let frame_rms = rms(&samples[offset..end]);

            if frame_rms >= self.threshold {
                self.hangover_counter = self.hangover_frames;
                if !self.in_speech {
                    events.push(VadEvent::Start(offset));
                    self.in_speech = true;
                }
            } else if self.in_speech {
                if self.hangover_counter > 0 {
                    self.hangover_counter -= 1;
                } else {
                    events.push(VadEvent::End(offset));
                    self.in_speech = false;
                }
            }

            offset = end;
        }

        events
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.hangover_counter = 0;
    }
}
