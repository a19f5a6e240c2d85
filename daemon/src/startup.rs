/// Windows login registration via the `HKCU\...\Run` registry key.
///
/// `--register-startup` records the daemon binary (plus its `--config` path, if
/// one was given) so Windows starts it at login; `--unregister-startup` removes
/// the entry.
///
/// On non-Windows platforms both functions compile and succeed as no-ops.
use anyhow::Result;
use std::path::Path;
use tracing::info;

const VALUE_NAME: &str = "RepeatSwitch";

/// Builds the command line stored in the Run key.
fn command_line(exe: &Path, config: Option<&Path>) -> String {
    match config {
        Some(config) => format!("\"{}\" --config \"{}\"", exe.display(), config.display()),
        None => format!("\"{}\"", exe.display()),
    }
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";

    /// Converts a Rust `&str` to a null-terminated UTF-16 `Vec<u16>`.
    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Writes `command` under `HKCU\...\Run\<value_name>`. Overwrites any
    /// existing value.
    pub fn register(value_name: &str, command: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(value_name);
        let data_w = to_wide(command);
        let data_bytes: &[u8] = unsafe {
            std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2)
        };

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {:?}", err);
        }

        let err = unsafe {
            RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes))
        };
        unsafe {
            let _ = RegCloseKey(hkey);
        };

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {:?}", err);
        }
        Ok(())
    }

    /// Removes `value_name` from `HKCU\...\Run`. Succeeds if it is not there.
    pub fn unregister(value_name: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(value_name);

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegOpenKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                KEY_SET_VALUE,
                &mut hkey,
            )
        };
        if err != ERROR_SUCCESS {
            return Ok(());
        }

        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        };

        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {:?}", err);
        }
        Ok(())
    }
}

// ── Public API ─────────────────────────────────────────────────────────────────

/// Registers the running daemon binary to launch at user login.
pub fn register_startup(config: Option<&Path>) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| anyhow::anyhow!("Failed to locate daemon executable: {e}"))?;
    let command = command_line(&exe, config);
    #[cfg(windows)]
    imp::register(VALUE_NAME, &command)?;
    info!(entry = VALUE_NAME, %command, "registered to start at login");
    Ok(())
}

/// Removes the daemon from the login startup entries.
pub fn unregister_startup() -> Result<()> {
    #[cfg(windows)]
    imp::unregister(VALUE_NAME)?;
    info!(entry = VALUE_NAME, "removed from login startup");
    Ok(())
}
