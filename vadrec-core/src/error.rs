use thiserror::Error;

/// All errors produced by vadrec-core.
///
/// These are genuine failures. Recoverable device conditions that the
/// orchestrator's recovery loop is expected to handle routinely are modeled
/// separately by [`ControlSignal`] — they are not propagated through this
/// enum.
#[derive(Debug, Error)]
pub enum VadrecError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("sidecar IO error: {0}")]
    SidecarIo(String),

    #[error("transcriber error: {0}")]
    Transcriber(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VadrecError>;

/// A recoverable control condition raised by the [`crate::supervisor::DeviceSupervisor`]
/// and consumed by the [`crate::orchestrator::Orchestrator`] recovery loop.
///
/// These are not failures: `DeviceSwitchRequest` is a deliberate, cooperative
/// signal, and `DeviceUnavailable` is an expected transient state whenever a
/// microphone disconnects. Treating them as a distinct type (rather than
/// `VadrecError` variants) keeps the recovery loop's control flow explicit:
/// auto-switch is a cooperative exception, not an error path.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// The current device vanished or an underlying audio-API call failed.
    DeviceUnavailable { reason: String },
    /// The device supervisor found a confirmed, louder candidate device.
    DeviceSwitchRequest {
        to: crate::audio::device::DeviceSelector,
        reason: String,
    },
}
