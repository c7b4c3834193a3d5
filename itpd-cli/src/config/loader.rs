use super::types::{InstallSection, ItpdConfig, RawDaemonSection, RawItpdConfig};
use anyhow::{Context, Result};
use itpd_core::DaemonConfig;
use std::path::{Path, PathBuf};

/// One file taking part in the merge, lowest precedence first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayer {
    pub name: &'static str,
    pub path: PathBuf,
    /// A required layer that is missing fails the load
    pub required: bool,
}

impl ConfigLayer {
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user, then project, then `explicit`)
    pub fn load(explicit: Option<&Path>) -> Result<ItpdConfig> {
        let mut raw = RawItpdConfig::default();

        for layer in Self::layers(explicit) {
            if layer.exists() {
                raw = Self::merge_raw(raw, Self::read_layer(&layer.path)?);
            } else if layer.required {
                anyhow::bail!("Config file not found: {}", layer.path.display());
            }
        }

        let config = Self::finalize(raw);
        config
            .daemon
            .validate()
            .context("Invalid [daemon] configuration")?;
        Ok(config)
    }

    /// The files `load` consults, in merge order
    pub fn layers(explicit: Option<&Path>) -> Vec<ConfigLayer> {
        let mut layers = vec![
            ConfigLayer {
                name: "user",
                path: Self::user_config_path(),
                required: false,
            },
            ConfigLayer {
                name: "project",
                path: Self::project_config_path(),
                required: false,
            },
        ];
        if let Some(path) = explicit {
            layers.push(ConfigLayer {
                name: "--config",
                path: path.to_path_buf(),
                required: true,
            });
        }
        layers
    }

    /// `config.toml` under the XDG config directory
    pub fn user_config_path() -> PathBuf {
        itpd_paths::config_dir().join("config.toml")
    }

    /// Get project config path
    /// Can be overridden with ITPD_PROJECT_CONFIG_DIR env var (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("ITPD_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".itpd/config.toml")
        }
    }

    fn read_layer(path: &Path) -> Result<RawItpdConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawItpdConfig, overlay: RawItpdConfig) -> RawItpdConfig {
        RawItpdConfig {
            daemon: RawDaemonSection {
                binary_path: overlay.daemon.binary_path.or(base.daemon.binary_path),
                data_dir: overlay.daemon.data_dir.or(base.daemon.data_dir),
                config_file: overlay.daemon.config_file.or(base.daemon.config_file),
                log_path: overlay.daemon.log_path.or(base.daemon.log_path),
                args: overlay.daemon.args.or(base.daemon.args),
                grace_period: overlay.daemon.grace_period.or(base.daemon.grace_period),
                stop_timeout: overlay.daemon.stop_timeout.or(base.daemon.stop_timeout),
                poll_interval: overlay.daemon.poll_interval.or(base.daemon.poll_interval),
                tail_interval: overlay.daemon.tail_interval.or(base.daemon.tail_interval),
                lost_after: overlay.daemon.lost_after.or(base.daemon.lost_after),
            },
            install: InstallSection {
                bundle: overlay.install.bundle.or(base.install.bundle),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawItpdConfig) -> ItpdConfig {
        let defaults = DaemonConfig::default();
        let daemon = raw.daemon;

        ItpdConfig {
            daemon: DaemonConfig {
                binary_path: daemon.binary_path.unwrap_or(defaults.binary_path),
                data_dir: daemon.data_dir.unwrap_or(defaults.data_dir),
                config_file: daemon.config_file.or(defaults.config_file),
                log_path: daemon.log_path.unwrap_or(defaults.log_path),
                args: daemon.args.unwrap_or(defaults.args),
                grace_period: daemon.grace_period.unwrap_or(defaults.grace_period),
                stop_timeout: daemon.stop_timeout.unwrap_or(defaults.stop_timeout),
                poll_interval: daemon.poll_interval.unwrap_or(defaults.poll_interval),
                tail_interval: daemon.tail_interval.unwrap_or(defaults.tail_interval),
                lost_after: daemon.lost_after.unwrap_or(defaults.lost_after),
            },
            install: raw.install,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", contents).unwrap();
        path
    }

    /// Point the project layer at an empty directory
    fn isolate_project_layer(dir: &TempDir) {
        // SAFETY: tests touching the environment run under #[serial]
        unsafe { std::env::set_var("ITPD_PROJECT_CONFIG_DIR", dir.path()) };
    }

    fn clear_project_layer() {
        // SAFETY: tests touching the environment run under #[serial]
        unsafe { std::env::remove_var("ITPD_PROJECT_CONFIG_DIR") };
    }

    #[test]
    #[serial]
    fn test_project_config_path_env_override() {
        let temp_dir = TempDir::new().unwrap();
        isolate_project_layer(&temp_dir);

        assert_eq!(
            ConfigLoader::project_config_path(),
            temp_dir.path().join("config.toml")
        );

        clear_project_layer();
        assert_eq!(
            ConfigLoader::project_config_path(),
            PathBuf::from(".itpd/config.toml")
        );
    }

    #[test]
    #[serial]
    fn test_project_layer_is_applied() {
        let temp_dir = TempDir::new().unwrap();
        write_config(
            temp_dir.path(),
            r#"
[daemon]
binary_path = "/opt/i2pd/i2pd"
args = ["--notransit"]
"#,
        );
        isolate_project_layer(&temp_dir);

        let config = ConfigLoader::load(None).unwrap();
        assert_eq!(config.daemon.binary_path, PathBuf::from("/opt/i2pd/i2pd"));
        assert_eq!(config.daemon.args, vec!["--notransit".to_string()]);

        clear_project_layer();
    }

    #[test]
    #[serial]
    fn test_explicit_config_overrides_project() {
        let project_dir = TempDir::new().unwrap();
        write_config(
            project_dir.path(),
            r#"
[daemon]
binary_path = "/opt/i2pd/i2pd"
poll_interval = "1s"
"#,
        );
        isolate_project_layer(&project_dir);

        let explicit_dir = TempDir::new().unwrap();
        let explicit = write_config(
            explicit_dir.path(),
            r#"
[daemon]
poll_interval = "200ms"
"#,
        );

        let config = ConfigLoader::load(Some(&explicit)).unwrap();
        // Set only in the project layer
        assert_eq!(config.daemon.binary_path, PathBuf::from("/opt/i2pd/i2pd"));
        assert_eq!(config.daemon.poll_interval, Duration::from_millis(200));

        clear_project_layer();
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_is_error() {
        let temp_dir = TempDir::new().unwrap();
        isolate_project_layer(&temp_dir);

        let result = ConfigLoader::load(Some(&temp_dir.path().join("nope.toml")));
        assert!(result.is_err());

        clear_project_layer();
    }

    #[test]
    #[serial]
    fn test_invalid_timing_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        write_config(
            temp_dir.path(),
            r#"
[daemon]
grace_period = "30s"
stop_timeout = "10s"
"#,
        );
        isolate_project_layer(&temp_dir);

        let error = ConfigLoader::load(None).unwrap_err();
        assert!(format!("{:#}", error).contains("grace_period"));

        clear_project_layer();
    }

    #[test]
    #[serial]
    fn test_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        write_config(temp_dir.path(), "this is not valid toml {{{{");
        isolate_project_layer(&temp_dir);

        assert!(ConfigLoader::load(None).is_err());

        clear_project_layer();
    }

    #[test]
    #[serial]
    fn test_user_config_path_follows_xdg_config_home() {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: tests touching the environment run under #[serial]
        unsafe { std::env::set_var("XDG_CONFIG_HOME", temp_dir.path()) };

        assert_eq!(
            ConfigLoader::user_config_path(),
            temp_dir.path().join("itpd").join("config.toml")
        );

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    #[serial]
    fn test_layers_in_merge_order() {
        let temp_dir = TempDir::new().unwrap();
        isolate_project_layer(&temp_dir);
        let explicit = temp_dir.path().join("explicit.toml");

        let layers = ConfigLoader::layers(Some(&explicit));
        let names: Vec<_> = layers.iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["user", "project", "--config"]);
        assert_eq!(layers[1].path, temp_dir.path().join("config.toml"));
        assert_eq!(layers[2].path, explicit);
        assert!(!layers[1].required);
        assert!(layers[2].required);
        assert!(!layers[2].exists());

        assert_eq!(ConfigLoader::layers(None).len(), 2);

        clear_project_layer();
    }

    #[test]
    fn test_merge_raw_overlay_overrides_base() {
        let base = RawItpdConfig {
            daemon: RawDaemonSection {
                binary_path: Some(PathBuf::from("/base/i2pd")),
                log_path: Some(PathBuf::from("/base/i2pd.log")),
                grace_period: Some(Duration::from_secs(3)),
                ..Default::default()
            },
            install: InstallSection {
                bundle: Some(PathBuf::from("/base/bundle")),
            },
        };

        let overlay = RawItpdConfig {
            daemon: RawDaemonSection {
                binary_path: Some(PathBuf::from("/overlay/i2pd")),
                log_path: None, // Should preserve base value
                ..Default::default()
            },
            install: InstallSection::default(),
        };

        let merged = ConfigLoader::merge_raw(base, overlay);

        assert_eq!(merged.daemon.binary_path, Some(PathBuf::from("/overlay/i2pd")));
        assert_eq!(merged.daemon.log_path, Some(PathBuf::from("/base/i2pd.log")));
        assert_eq!(merged.daemon.grace_period, Some(Duration::from_secs(3)));
        assert_eq!(merged.install.bundle, Some(PathBuf::from("/base/bundle")));
    }

    #[test]
    fn test_finalize_applies_defaults() {
        let config = ConfigLoader::finalize(RawItpdConfig::default());
        let defaults = DaemonConfig::default();

        assert_eq!(config.daemon, defaults);
        assert!(config.install.bundle.is_none());
    }
}
