//! Managed server configuration file.
//!
//! The daemon's config is a line-oriented document: the first token of a
//! line is the directive, the remainder its value, and `#` starts a comment.
//! Directive order matters to the daemon, so the document preserves it.
//! Writes go through the atomic blob path and prepend a managed-file banner.

use std::path::Path;

use ovpnkit_store::{AtomicBlobStore, FsBlobStore, StoreError};

use crate::error::{ProvisionError, ProvisionResult};

const MANAGED_BANNER: &str = "# This file is managed; hand edits are overwritten on the next write.\n";

/// Baseline configuration for a fresh deployment.
pub const DEFAULT_TEMPLATE: &str = "\
port 1194
proto udp
dev tun
topology subnet
server 10.8.0.0 255.255.255.0
client-config-dir ccd
keepalive 10 120
persist-key
persist-tun
status openvpn-status.log
verb 3
";

/// An ordered directive document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    entries: Vec<(String, String)>,
}

impl ServerConfig {
    /// Parses a document, skipping blank lines and comments.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((key, value)) => entries.push((key.to_string(), value.trim().to_string())),
                None => entries.push((line.to_string(), String::new())),
            }
        }
        Self { entries }
    }

    /// Returns the baseline document for a fresh deployment.
    #[must_use]
    pub fn default_template() -> Self {
        Self::parse(DEFAULT_TEMPLATE)
    }

    /// Returns the value of the first occurrence of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key` to `value`, replacing the first occurrence in place or
    /// appending when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Removes every occurrence of `key`. Returns whether anything changed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    /// Returns the directives in document order.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Renders the document body, banner included.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from(MANAGED_BANNER);
        for (key, value) in &self.entries {
            out.push_str(key);
            if !value.is_empty() {
                out.push(' ');
                out.push_str(value);
            }
            out.push('\n');
        }
        out
    }
}

/// Handle on the config file's location with atomic persistence.
pub struct ServerConfigFile {
    blobs: FsBlobStore,
    filename: String,
}

impl ServerConfigFile {
    /// Opens a handle for the config at `path`, creating the parent
    /// directory if needed. The file itself is created on first save.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a path without a usable parent and
    /// file name, or a storage error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> ProvisionResult<Self> {
        let path = path.as_ref();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                ProvisionError::validation("config path", "must have a parent directory")
            })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProvisionError::validation("config path", "must end in a UTF-8 file name")
            })?
            .to_string();
        Ok(Self {
            blobs: FsBlobStore::open(parent)?,
            filename,
        })
    }

    /// Loads the document; a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read or is not UTF-8.
    pub fn load(&self) -> ProvisionResult<ServerConfig> {
        let Some(bytes) = self.blobs.read(&self.filename)? else {
            return Ok(ServerConfig::default());
        };
        let text = String::from_utf8(bytes).map_err(|_| {
            ProvisionError::Store(StoreError::corrupted("server config is not UTF-8"))
        })?;
        Ok(ServerConfig::parse(&text))
    }

    /// Persists the document atomically.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails; the previous content is
    /// left intact in that case.
    pub fn save(&self, config: &ServerConfig) -> ProvisionResult<()> {
        self.blobs
            .write_atomic(&self.filename, config.render().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_splits_on_first_whitespace() {
        let config = ServerConfig::parse(
            "# comment\n\nport 1194\nserver 10.8.0.0 255.255.255.0\npersist-key\n",
        );
        assert_eq!(config.get("port"), Some("1194"));
        assert_eq!(config.get("server"), Some("10.8.0.0 255.255.255.0"));
        assert_eq!(config.get("persist-key"), Some(""));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn test_set_replaces_in_place_preserving_order() {
        let mut config = ServerConfig::parse("port 1194\nproto udp\nverb 3\n");
        config.set("proto", "tcp");
        config.set("duplicate-cn", "");

        let keys: Vec<&str> = config.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["port", "proto", "verb", "duplicate-cn"]);
        assert_eq!(config.get("proto"), Some("tcp"));
    }

    #[test]
    fn test_remove() {
        let mut config = ServerConfig::parse("port 1194\nverb 3\n");
        assert!(config.remove("verb"));
        assert!(!config.remove("verb"));
        assert_eq!(config.get("verb"), None);
    }

    #[test]
    fn test_render_round_trips_and_carries_banner() {
        let config = ServerConfig::parse("port 1194\nserver 10.8.0.0 255.255.255.0\npersist-key\n");
        let rendered = config.render();
        assert!(rendered.starts_with("# This file is managed"));
        assert!(rendered.contains("persist-key\n"));
        assert_eq!(ServerConfig::parse(&rendered), config);
    }

    #[test]
    fn test_default_template_has_client_config_dir() {
        let config = ServerConfig::default_template();
        assert_eq!(config.get("client-config-dir"), Some("ccd"));
        assert_eq!(config.get("status"), Some("openvpn-status.log"));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = ServerConfigFile::open(dir.path().join("server.conf")).expect("open");
        assert!(file.load().expect("load").entries().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = ServerConfigFile::open(dir.path().join("server.conf")).expect("open");

        let mut config = ServerConfig::default_template();
        config.set("verb", "4");
        file.save(&config).expect("save");

        let reloaded = file.load().expect("reload");
        assert_eq!(reloaded.get("verb"), Some("4"));
        assert_eq!(reloaded, config);
    }
}
