/// OS keyboard repeat settings port.
///
/// On Windows the two presets are committed through `SystemParametersInfoW`
/// (`SPI_SETKEYBOARDSPEED` and `SPI_SETKEYBOARDDELAY`), persisted to the user
/// profile and broadcast to running applications.
///
/// On non-Windows platforms the port validates and logs the change but touches
/// nothing.
use crate::config::{KeyRepeatState, DELAY_SCALE_MS, MAX_NATIVE_DELAY, MAX_REPEAT_SPEED};
use crate::error::CommitError;

/// Commits a keyboard repeat configuration. Implementations are blocking and
/// must be idempotent: committing the same state twice is not an error.
pub trait KeyRepeatPort: Send + Sync {
    fn commit(&self, state: &KeyRepeatState) -> Result<(), CommitError>;
}

/// Repeat values in the units `SystemParametersInfoW` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRepeat {
    pub speed: u32,
    /// Delay steps of [`DELAY_SCALE_MS`] each, truncated.
    pub delay: u32,
}

impl TryFrom<&KeyRepeatState> for NativeRepeat {
    type Error = CommitError;

    fn try_from(state: &KeyRepeatState) -> Result<Self, Self::Error> {
        if state.repeat_speed > MAX_REPEAT_SPEED {
            return Err(CommitError::OutOfRange {
                setting: "SPI_SETKEYBOARDSPEED",
                value: state.repeat_speed,
            });
        }
        let delay = state.repeat_delay / DELAY_SCALE_MS;
        if delay > MAX_NATIVE_DELAY {
            return Err(CommitError::OutOfRange {
                setting: "SPI_SETKEYBOARDDELAY",
                value: delay,
            });
        }
        Ok(Self {
            speed: state.repeat_speed,
            delay,
        })
    }
}

/// The real keyboard settings of the interactive session.
#[derive(Debug, Default)]
pub struct SystemKeyboard;

impl KeyRepeatPort for SystemKeyboard {
    fn commit(&self, state: &KeyRepeatState) -> Result<(), CommitError> {
        let native = NativeRepeat::try_from(state)?;
        imp::set_speed(native.speed)?;
        imp::set_delay(native.delay)?;
        Ok(())
    }
}

#[cfg(windows)]
mod imp {
    use windows::Win32::UI::WindowsAndMessaging::{
        SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETKEYBOARDDELAY,
        SPI_SETKEYBOARDSPEED, SYSTEM_PARAMETERS_INFO_ACTION,
    };

    use crate::error::CommitError;

    fn set(
        action: SYSTEM_PARAMETERS_INFO_ACTION,
        setting: &'static str,
        value: u32,
    ) -> Result<(), CommitError> {
        // Both actions take their value in uiParam; pvParam is unused.
        unsafe { SystemParametersInfoW(action, value, None, SPIF_UPDATEINIFILE | SPIF_SENDCHANGE) }
            .map_err(|e| CommitError::Rejected {
                setting,
                value,
                code: e.code().0,
            })
    }

    pub fn set_speed(speed: u32) -> Result<(), CommitError> {
        set(SPI_SETKEYBOARDSPEED, "SPI_SETKEYBOARDSPEED", speed)
    }

    pub fn set_delay(delay: u32) -> Result<(), CommitError> {
        set(SPI_SETKEYBOARDDELAY, "SPI_SETKEYBOARDDELAY", delay)
    }
}

#[cfg(not(windows))]
mod imp {
    use tracing::debug;

    use crate::error::CommitError;

    pub fn set_speed(speed: u32) -> Result<(), CommitError> {
        debug!(speed, "keyboard repeat speed is not configurable on this platform");
        Ok(())
    }

    pub fn set_delay(delay: u32) -> Result<(), CommitError> {
        debug!(delay, "keyboard repeat delay is not configurable on this platform");
        Ok(())
    }
}
