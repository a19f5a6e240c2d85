/// Typed errors raised at the seams between the daemon's components.
///
/// None of these is fatal on its own: the processor logs them and keeps going.
/// `main` wraps them in `anyhow` where a failure should end the process.
use thiserror::Error;

/// A configuration candidate that must not become the active settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("processMonitor.processName must not be empty")]
    EmptyProcessName,

    #[error("keyRepeat.{preset}.repeatSpeed must be within 0..={max}, got {value}")]
    SpeedOutOfRange {
        preset: &'static str,
        value: u32,
        max: u32,
    },

    #[error("keyRepeat.{preset}.repeatDelay must be within 0..={max} ms, got {value}")]
    DelayOutOfRange {
        preset: &'static str,
        value: u32,
        max: u32,
    },
}

/// The OS refused a keyboard repeat change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("settings commit failed: {setting} rejected value {value} (platform error {code:#010x})")]
    Rejected {
        setting: &'static str,
        value: u32,
        code: i32,
    },

    #[error("settings commit failed: {setting} value {value} is outside the range the OS accepts")]
    OutOfRange { setting: &'static str, value: u32 },

    #[error("settings commit refused: the daemon is shutting down")]
    ShutDown,
}

/// The event source could not be established.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source is not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("event subscription failed (platform error {code:#010x}): {message}")]
    Subscribe { code: i32, message: String },
}
