//! Daemon installation
//!
//! The supervisor only sequences installs; placing files is delegated to an
//! [`Installer`]. [`BundleInstaller`] copies a bundled i2pd build into the
//! locations named by a [`DaemonConfig`]:
//! - the binary to `binary_path`, made executable
//! - default `i2pd.conf` / `tunnels.conf` into `data_dir`, never replacing
//!   files the user already has
//! - the log directory

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::error::InstallError;

/// Name of the daemon binary inside a bundle directory
pub const BUNDLE_BINARY: &str = "i2pd";

/// Default config files copied from a bundle directory when present
pub const BUNDLE_CONFIGS: &[&str] = &["i2pd.conf", "tunnels.conf"];

/// Performs the file placement for an install request
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, config: &DaemonConfig) -> Result<(), InstallError>;
}

/// Installs from a bundle directory or a single binary file
#[derive(Debug, Clone)]
pub struct BundleInstaller {
    bundle: PathBuf,
}

impl BundleInstaller {
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        Self {
            bundle: bundle.into(),
        }
    }

    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    async fn binary_source(&self) -> Result<PathBuf, InstallError> {
        let meta = fs::metadata(&self.bundle)
            .await
            .map_err(|_| InstallError::BundleMissing(self.bundle.clone()))?;

        if !meta.is_dir() {
            return Ok(self.bundle.clone());
        }

        let binary = self.bundle.join(BUNDLE_BINARY);
        if fs::metadata(&binary).await.is_ok_and(|m| m.is_file()) {
            Ok(binary)
        } else {
            Err(InstallError::BundleMissing(binary))
        }
    }

    async fn install_binary(&self, source: &Path, target: &Path) -> Result<(), InstallError> {
        if let Some(parent) = target.parent() {
            create_dir(parent).await?;
        }

        // Copy beside the target and rename so a half-written binary is
        // never visible at binary_path
        let partial = target.with_extension("partial");
        fs::copy(source, &partial)
            .await
            .map_err(|source_err| InstallError::Copy {
                from: source.to_path_buf(),
                to: partial.clone(),
                source: source_err,
            })?;

        #[cfg(unix)]
        fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| InstallError::SetPermissions {
                path: partial.clone(),
                source: e,
            })?;

        fs::rename(&partial, target)
            .await
            .map_err(|e| InstallError::Copy {
                from: partial.clone(),
                to: target.to_path_buf(),
                source: e,
            })?;

        debug!(target = %target.display(), "Installed daemon binary");
        Ok(())
    }

    async fn install_configs(&self, data_dir: &Path) -> Result<usize, InstallError> {
        if !fs::metadata(&self.bundle).await.is_ok_and(|m| m.is_dir()) {
            return Ok(0);
        }

        let mut copied = 0;
        for name in BUNDLE_CONFIGS {
            let from = self.bundle.join(name);
            let to = data_dir.join(name);

            if !fs::try_exists(&from).await.unwrap_or(false) {
                continue;
            }
            if fs::try_exists(&to).await.unwrap_or(false) {
                debug!(path = %to.display(), "Keeping existing config");
                continue;
            }

            fs::copy(&from, &to)
                .await
                .map_err(|e| InstallError::Copy {
                    from: from.clone(),
                    to: to.clone(),
                    source: e,
                })?;
            copied += 1;
        }
        Ok(copied)
    }
}

#[async_trait]
impl Installer for BundleInstaller {
    async fn install(&self, config: &DaemonConfig) -> Result<(), InstallError> {
        info!(bundle = %self.bundle.display(), "Installing i2pd");

        let source = self.binary_source().await?;
        self.install_binary(&source, &config.binary_path).await?;

        create_dir(&config.data_dir).await?;
        let configs = self.install_configs(&config.data_dir).await?;

        if let Some(log_dir) = config.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir(log_dir).await?;
        }

        if config.resolve_binary().is_none() {
            return Err(InstallError::Verification(config.binary_path.clone()));
        }

        info!(
            binary = %config.binary_path.display(),
            configs,
            "i2pd installed"
        );
        Ok(())
    }
}

async fn create_dir(path: &Path) -> Result<(), InstallError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| InstallError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target_config(root: &Path) -> DaemonConfig {
        DaemonConfig::default()
            .with_binary_path(root.join("bin").join("i2pd"))
            .with_data_dir(root.join("data"))
            .with_log_path(root.join("log").join("i2pd.log"))
    }

    #[tokio::test]
    async fn install_from_bundle_directory() {
        let bundle = TempDir::new().unwrap();
        std::fs::write(bundle.path().join("i2pd"), "#!/bin/sh\n").unwrap();
        std::fs::write(bundle.path().join("i2pd.conf"), "ipv6 = true\n").unwrap();

        let root = TempDir::new().unwrap();
        let config = target_config(root.path());

        BundleInstaller::new(bundle.path())
            .install(&config)
            .await
            .unwrap();

        assert!(config.binary_path.is_file());
        assert!(!config.binary_path.with_extension("partial").exists());
        assert_eq!(
            std::fs::read_to_string(root.path().join("data/i2pd.conf")).unwrap(),
            "ipv6 = true\n"
        );
        assert!(!root.path().join("data/tunnels.conf").exists());
        assert!(root.path().join("log").is_dir());

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&config.binary_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn install_from_single_binary() {
        let bundle = TempDir::new().unwrap();
        let binary = bundle.path().join("i2pd-2.50");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        let root = TempDir::new().unwrap();
        let config = target_config(root.path());

        BundleInstaller::new(&binary).install(&config).await.unwrap();
        assert!(config.binary_path.is_file());
    }

    #[tokio::test]
    async fn install_keeps_existing_config() {
        let bundle = TempDir::new().unwrap();
        std::fs::write(bundle.path().join("i2pd"), "#!/bin/sh\n").unwrap();
        std::fs::write(bundle.path().join("tunnels.conf"), "bundled\n").unwrap();

        let root = TempDir::new().unwrap();
        let config = target_config(root.path());
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.data_dir.join("tunnels.conf"), "mine\n").unwrap();

        BundleInstaller::new(bundle.path())
            .install(&config)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(config.data_dir.join("tunnels.conf")).unwrap(),
            "mine\n"
        );
    }

    #[tokio::test]
    async fn install_missing_bundle_fails() {
        let root = TempDir::new().unwrap();
        let config = target_config(root.path());

        let result = BundleInstaller::new(root.path().join("nope"))
            .install(&config)
            .await;
        assert!(matches!(result, Err(InstallError::BundleMissing(_))));
        assert!(!config.binary_path.exists());
    }

    #[tokio::test]
    async fn install_bundle_without_binary_fails() {
        let bundle = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();

        let result = BundleInstaller::new(bundle.path())
            .install(&target_config(root.path()))
            .await;
        match result {
            Err(InstallError::BundleMissing(path)) => assert!(path.ends_with("i2pd")),
            other => panic!("expected BundleMissing, got {:?}", other),
        }
    }
}
