/// Canonical file paths for RepeatSwitch data files.
///
/// Both files live under %APPDATA%\RepeatSwitch\:
///   - appsettings.json  Process name and repeat presets, hot-reloaded.
///   - status.toml       Written by the daemon for anyone who wants to look.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "RepeatSwitch";
pub const CONFIG_FILE_NAME: &str = "appsettings.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application data directory: %APPDATA%\RepeatSwitch\.
/// Falls back to the working directory when APPDATA is not set.
pub fn app_data_dir() -> PathBuf {
    std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Returns the full path to the config file: %APPDATA%\RepeatSwitch\appsettings.json
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: %APPDATA%\RepeatSwitch\status.toml
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
