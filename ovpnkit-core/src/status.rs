//! Service status probe and restart.
//!
//! Deployments name the VPN unit differently, so the probe walks a list of
//! candidate unit names and reports the first one the process manager calls
//! active. Probing is read-only and best-effort: a missing manager or unit
//! degrades to "inactive", a missing status log to zero clients. Restarting
//! is a mutation, so its failures are surfaced.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::tool::ToolRunner;

const DEFAULT_MANAGER: &str = "systemctl";
const CLIENT_LIST_PREFIX: &str = "CLIENT_LIST";

/// Unit names tried in order, covering common packaging variants.
pub const DEFAULT_UNITS: [&str; 3] = ["openvpn-server@server", "openvpn@server", "openvpn"];

/// A point-in-time view of the VPN service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// True if some candidate unit reports active.
    pub active: bool,
    /// The unit that reported active, if any.
    pub unit: Option<String>,
    /// Clients listed in the daemon's status log.
    pub connected_clients: usize,
}

/// Probes and restarts the VPN service through the process manager.
pub struct StatusProbe {
    runner: ToolRunner,
    manager: String,
    units: Vec<String>,
    status_log: PathBuf,
}

impl StatusProbe {
    /// Creates a probe reading client counts from `status_log`, using the
    /// default process manager and unit candidates.
    #[must_use]
    pub fn new(status_log: impl AsRef<Path>) -> Self {
        Self {
            runner: ToolRunner::new(),
            manager: DEFAULT_MANAGER.to_string(),
            units: DEFAULT_UNITS.iter().map(ToString::to_string).collect(),
            status_log: status_log.as_ref().to_path_buf(),
        }
    }

    /// Overrides the process manager binary.
    #[must_use]
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    /// Overrides the candidate unit names.
    #[must_use]
    pub fn with_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.units = units.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the tool runner (timeout policy).
    #[must_use]
    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Reports the current service state. Never fails: probe errors degrade
    /// to an inactive result.
    #[must_use]
    pub fn probe(&self) -> ServiceStatus {
        let mut active_unit = None;
        for unit in &self.units {
            match self.runner.run_raw(&self.manager, &["is-active", unit]) {
                Ok(output) if output.success && output.stdout.trim() == "active" => {
                    active_unit = Some(unit.clone());
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(unit, %err, "service probe failed");
                }
            }
        }

        ServiceStatus {
            active: active_unit.is_some(),
            unit: active_unit,
            connected_clients: self.count_clients(),
        }
    }

    /// Restarts the service, trying each candidate unit until one succeeds.
    /// Returns the unit that was restarted.
    ///
    /// # Errors
    ///
    /// Returns the last unit's [`ProvisionError::ExternalTool`] failure when
    /// none of the candidates could be restarted.
    pub fn restart(&self) -> ProvisionResult<String> {
        let mut last_error = None;
        for unit in &self.units {
            match self.runner.run(&self.manager, &["restart", unit]) {
                Ok(_) => {
                    info!(unit, "service restarted");
                    return Ok(unit.clone());
                }
                Err(err) => {
                    warn!(unit, %err, "restart attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ProvisionError::external_tool(&self.manager, "no restart units configured")
        }))
    }

    fn count_clients(&self) -> usize {
        match std::fs::read_to_string(&self.status_log) {
            Ok(text) => text
                .lines()
                .filter(|l| l.starts_with(CLIENT_LIST_PREFIX))
                .count(),
            // Absent until the daemon first writes it.
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Writes an executable stand-in for the process manager.
    fn fake_manager(dir: &Path, script_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fakectl");
        std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).expect("write script");
        let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[test]
    fn test_probe_reports_first_active_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = fake_manager(
            dir.path(),
            "if [ \"$1\" = is-active ] && [ \"$2\" = vpn-main ]; then echo active; exit 0; fi\nexit 3",
        );

        let probe = StatusProbe::new(dir.path().join("status.log"))
            .with_manager(manager.to_string_lossy())
            .with_units(["vpn-alt", "vpn-main"]);

        let status = probe.probe();
        assert!(status.active);
        assert_eq!(status.unit.as_deref(), Some("vpn-main"));
        assert_eq!(status.connected_clients, 0);
    }

    #[test]
    fn test_probe_degrades_when_manager_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = StatusProbe::new(dir.path().join("status.log"))
            .with_manager("definitely-not-a-real-binary-9f2c")
            .with_runner(ToolRunner::new().with_timeout(Duration::from_secs(2)));

        let status = probe.probe();
        assert!(!status.active);
        assert!(status.unit.is_none());
    }

    #[test]
    fn test_client_count_from_status_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("status.log");
        std::fs::write(
            &log,
            "TITLE OpenVPN\nCLIENT_LIST alice,10.8.0.50\nCLIENT_LIST bob,10.8.0.51\nROUTING_TABLE x\n",
        )
        .expect("write log");

        let manager = fake_manager(dir.path(), "exit 3");
        let probe = StatusProbe::new(&log)
            .with_manager(manager.to_string_lossy())
            .with_units(["vpn-main"]);

        let status = probe.probe();
        assert!(!status.active);
        assert_eq!(status.connected_clients, 2);
    }

    #[test]
    fn test_restart_falls_through_to_working_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = fake_manager(
            dir.path(),
            "if [ \"$1\" = restart ] && [ \"$2\" = vpn-b ]; then exit 0; fi\necho \"unit not found\" >&2\nexit 5",
        );

        let probe = StatusProbe::new(dir.path().join("status.log"))
            .with_manager(manager.to_string_lossy())
            .with_units(["vpn-a", "vpn-b"]);

        assert_eq!(probe.restart().expect("restart"), "vpn-b");
    }

    #[test]
    fn test_restart_failure_is_surfaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = fake_manager(dir.path(), "echo \"no such unit\" >&2\nexit 5");

        let probe = StatusProbe::new(dir.path().join("status.log"))
            .with_manager(manager.to_string_lossy())
            .with_units(["vpn-a"]);

        let err = probe.restart().expect_err("restart failure");
        assert!(format!("{err}").contains("no such unit"));
    }
}
