//! Cross-platform paths.

use std::path::PathBuf;

/// Get the application data directory.
///
/// - Linux: `~/.local/share/pairchat`
/// - Windows: `%LOCALAPPDATA%\pairchat`
/// - macOS: `~/Library/Application Support/pairchat`
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pairchat")
}

/// Get the configuration directory.
///
/// - Linux: `~/.config/pairchat`
/// - Windows: `%APPDATA%\pairchat`
/// - macOS: `~/Library/Application Support/pairchat`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pairchat")
}

/// Get the path to the main config file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Get the path of the chat database under a data directory.
pub fn chat_db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("chat.db")
}
