//! On-disk layout for provisioning artifacts.

use std::path::{Path, PathBuf};

const AUTH_DIRNAME: &str = "auth";
const CCD_DIRNAME: &str = "ccd";
const LINKS_DIRNAME: &str = "links";
const SERVER_CONFIG_FILENAME: &str = "server.conf";
const STATUS_LOG_FILENAME: &str = "openvpn-status.log";

/// Paths for provisioning artifacts under a single root directory.
///
/// Layout:
///
/// ```text
/// <root>/auth/users          credential file (name:hash lines)
/// <root>/ccd/<name>          one network identity descriptor per account
/// <root>/links/              materialized download artifacts + link records
/// <root>/registry.json       account record set
/// <root>/server.conf         managed server configuration
/// <root>/openvpn-status.log  daemon status artifact (written by the daemon)
/// ```
#[derive(Debug, Clone)]
pub struct ProvisionPaths {
    root: PathBuf,
}

impl ProvisionPaths {
    /// Builds the path layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding the credential file.
    #[must_use]
    pub fn auth_dir(&self) -> PathBuf {
        self.root.join(AUTH_DIRNAME)
    }

    /// Returns the per-client config directory (one descriptor per account).
    #[must_use]
    pub fn ccd_dir(&self) -> PathBuf {
        self.root.join(CCD_DIRNAME)
    }

    /// Returns the directory holding materialized download artifacts.
    #[must_use]
    pub fn links_dir(&self) -> PathBuf {
        self.root.join(LINKS_DIRNAME)
    }

    /// Returns the path to the managed server configuration file.
    #[must_use]
    pub fn server_config_path(&self) -> PathBuf {
        self.root.join(SERVER_CONFIG_FILENAME)
    }

    /// Returns the path to the daemon's status artifact.
    #[must_use]
    pub fn status_log_path(&self) -> PathBuf {
        self.root.join(STATUS_LOG_FILENAME)
    }
}
