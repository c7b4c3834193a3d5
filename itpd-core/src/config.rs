//! Configuration for the supervised daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the daemon process, its files and the supervisor timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the i2pd binary. A bare name is looked up on `PATH`.
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,

    /// Directory passed to the daemon as `--datadir`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional daemon config file passed as `--conf`.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Log file the daemon writes and the tailer follows.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Extra command-line arguments appended after the managed ones.
    #[serde(default)]
    pub args: Vec<String>,

    /// How long to wait after SIGTERM before escalating to SIGKILL.
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,

    /// Hard ceiling for a stop, including the grace period.
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Interval between exit-status polls of the running daemon.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Interval between log file checks when no file event arrives.
    #[serde(default = "default_tail_interval", with = "humantime_serde")]
    pub tail_interval: Duration,

    /// How long the log file may be missing before a subscription ends.
    #[serde(default = "default_lost_after", with = "humantime_serde")]
    pub lost_after: Duration,
}

fn default_binary_path() -> PathBuf {
    itpd_paths::data_dir().join("bin").join("i2pd")
}

fn default_data_dir() -> PathBuf {
    itpd_paths::data_dir().join("i2pd")
}

fn default_log_path() -> PathBuf {
    itpd_paths::state_dir().join("i2pd.log")
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_tail_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_lost_after() -> Duration {
    Duration::from_secs(1)
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            data_dir: default_data_dir(),
            config_file: None,
            log_path: default_log_path(),
            args: Vec::new(),
            grace_period: default_grace_period(),
            stop_timeout: default_stop_timeout(),
            poll_interval: default_poll_interval(),
            tail_interval: default_tail_interval(),
            lost_after: default_lost_after(),
        }
    }
}

impl DaemonConfig {
    #[must_use]
    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the SIGTERM grace period and the hard stop ceiling.
    #[must_use]
    pub fn with_stop_timing(mut self, grace_period: Duration, stop_timeout: Duration) -> Self {
        self.grace_period = grace_period;
        self.stop_timeout = stop_timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_tail_interval(mut self, interval: Duration) -> Self {
        self.tail_interval = interval;
        self
    }

    #[must_use]
    pub fn with_lost_after(mut self, after: Duration) -> Self {
        self.lost_after = after;
        self
    }

    /// Check timing and path invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBinaryPath);
        }

        for (field, value) in [
            ("stop_timeout", self.stop_timeout),
            ("poll_interval", self.poll_interval),
            ("tail_interval", self.tail_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if self.grace_period >= self.stop_timeout {
            return Err(ConfigError::GraceExceedsTimeout {
                grace: self.grace_period,
                timeout: self.stop_timeout,
            });
        }

        Ok(())
    }

    /// Resolve the configured binary to an existing file.
    ///
    /// Paths with a directory component are checked as-is; a bare name is
    /// searched on `PATH`.
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        let path: &Path = &self.binary_path;
        if path.components().count() > 1 || path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        which::which(path).ok()
    }

    /// Arguments passed to the daemon: managed flags first, then `args`.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--datadir={}", self.data_dir.display()),
            "--log=file".to_string(),
            format!("--logfile={}", self.log_path.display()),
        ];
        if let Some(conf) = &self.config_file {
            args.push(format!("--conf={}", conf.display()));
        }
        args.extend(self.args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = DaemonConfig::default();

        assert!(config.binary_path.ends_with("bin/i2pd"));
        assert!(config.log_path.ends_with("i2pd.log"));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.stop_timeout, Duration::from_secs(15));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder_pattern() {
        let config = DaemonConfig::default()
            .with_binary_path("/usr/sbin/i2pd")
            .with_data_dir("/var/lib/i2pd")
            .with_log_path("/var/log/i2pd.log")
            .with_args(["--ipv6"]);

        assert_eq!(config.binary_path, PathBuf::from("/usr/sbin/i2pd"));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/i2pd"));
        assert_eq!(config.args, vec!["--ipv6".to_string()]);
    }

    #[test]
    fn command_args_put_managed_flags_first() {
        let config = DaemonConfig::default()
            .with_data_dir("/d")
            .with_log_path("/l/i2pd.log")
            .with_config_file("/c/i2pd.conf")
            .with_args(["--notransit"]);

        assert_eq!(
            config.command_args(),
            vec![
                "--datadir=/d",
                "--log=file",
                "--logfile=/l/i2pd.log",
                "--conf=/c/i2pd.conf",
                "--notransit",
            ]
        );
    }

    #[test]
    fn validate_rejects_grace_longer_than_timeout() {
        let config = DaemonConfig::default()
            .with_stop_timing(Duration::from_secs(10), Duration::from_secs(2));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GraceExceedsTimeout { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = DaemonConfig::default().with_poll_interval(Duration::ZERO);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "poll_interval"
            })
        );
    }

    #[test]
    fn resolve_binary_checks_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("i2pd");
        let config = DaemonConfig::default().with_binary_path(&binary);
        assert!(config.resolve_binary().is_none());

        std::fs::write(&binary, "#!/bin/sh\n").unwrap();
        assert_eq!(config.resolve_binary(), Some(binary));
    }

    #[test]
    fn config_toml_uses_humantime_durations() {
        let config: DaemonConfig = toml::from_str(
            r#"
            binary_path = "/opt/i2pd/i2pd"
            grace_period = "2s"
            poll_interval = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.binary_path, PathBuf::from("/opt/i2pd/i2pd"));
        assert_eq!(config.grace_period, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.stop_timeout, Duration::from_secs(15));
    }
}
