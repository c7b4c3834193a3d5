//! XDG Base Directory paths for itpd.
//!
//! The supervisor keeps the daemon binary, its data directory and its log
//! under XDG paths so a desktop host and the `itpd` CLI agree on where the
//! installation lives.

use std::path::PathBuf;

const APP_DIR: &str = "itpd";

/// Get the itpd config directory.
///
/// Returns `$XDG_CONFIG_HOME/itpd` if set, otherwise `~/.config/itpd`.
/// The supervisor's `config.toml` lives here.
///
/// # Examples
///
/// ```
/// use itpd_paths::config_dir;
///
/// let config = config_dir();
/// let file = config.join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the itpd data directory.
///
/// Returns `$XDG_DATA_HOME/itpd` if set, otherwise `~/.local/share/itpd`.
/// Installed daemon binaries and the daemon's own data directory go here.
///
/// # Examples
///
/// ```
/// use itpd_paths::data_dir;
///
/// let data = data_dir();
/// let bin = data.join("bin");
/// ```
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Get the itpd state directory.
///
/// Returns `$XDG_STATE_HOME/itpd` if set, otherwise `~/.local/state/itpd`.
/// Daemon log files are written here.
pub fn state_dir() -> PathBuf {
    xdg_dir("XDG_STATE_HOME", ".local/state")
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    if let Ok(base) = std::env::var(var)
        && !base.is_empty()
    {
        PathBuf::from(base).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join(APP_DIR)
    } else {
        PathBuf::from(home_relative).join(APP_DIR)
    }
}
