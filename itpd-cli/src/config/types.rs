use std::path::PathBuf;
use std::time::Duration;

use itpd_core::DaemonConfig;
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawItpdConfig {
    #[serde(default)]
    pub daemon: RawDaemonSection,

    #[serde(default)]
    pub install: InstallSection,
}

/// Daemon section as stored in TOML (optional fields for proper merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDaemonSection {
    pub binary_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub args: Option<Vec<String>>,

    #[serde(default, with = "humantime_serde")]
    pub grace_period: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub stop_timeout: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub tail_interval: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub lost_after: Option<Duration>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ItpdConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub install: InstallSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstallSection {
    /// Bundle directory or binary used by `itpd install`
    pub bundle: Option<PathBuf>,
}
