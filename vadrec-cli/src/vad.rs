//! Concrete `VadGate` wiring for the CLI binary.
//!
//! The real VAD backend (Silero or equivalent) is an injected, out-of-scope
//! collaborator: `vadrec-core` only defines the `VadGate` contract. Until a
//! real backend is wired in, the CLI falls back to the crate's energy-based
//! reference gate.

use vadrec_core::vad::energy::EnergyGate;
use vadrec_core::vad::VadGate;

use crate::flags::ParsedArgs;

const DEFAULT_THRESHOLD: f32 = 0.02;
const DEFAULT_HANGOVER_FRAMES: u32 = 8;
const DEFAULT_FRAME_SIZE: usize = 160;

pub fn build(_parsed: &ParsedArgs) -> Box<dyn VadGate> {
    Box::new(EnergyGate::new(
        DEFAULT_THRESHOLD,
        DEFAULT_HANGOVER_FRAMES,
        DEFAULT_FRAME_SIZE,
    ))
}
