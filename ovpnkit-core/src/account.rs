//! Account records and the enrollment state machine.
//!
//! An [`Account`] moves through the lifecycle below. Transitions happen only
//! through the methods on this type; calling code never assigns `status`
//! directly.
//!
//! ```text
//! pending ──approve──▶ approved ◀─reactivate─┐
//!    │                     │                 │
//!  reject               suspend ──────▶ suspended
//!    ▼
//! rejected (dead end)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, ProvisionResult};

/// Lifecycle status of an enrollment record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccountStatus {
    /// Registered, awaiting administrator review.
    Pending,
    /// Cleared for VPN credential self-service.
    Approved,
    /// Denied by an administrator; dead end under current policy.
    Rejected,
    /// Self-service privileges withdrawn, record retained.
    Suspended,
}

/// Role tag distinguishing administrators from normal accounts.
///
/// A single entity with a role tag replaces separate admin/user record kinds;
/// operation boundaries check the tag instead of branching on type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccountRole {
    /// May approve, reject, suspend, and decommission accounts.
    Admin,
    /// May manage only its own VPN credential and downloads.
    User,
}

/// Default per-account device limit.
pub const DEFAULT_DEVICE_LIMIT: u32 = 2;

/// A user's enrollment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account name, immutable once created.
    pub name: String,
    /// Unique contact address.
    pub email: String,
    /// Role tag.
    pub role: AccountRole,
    /// Salted hash of the portal (self-service login) password.
    pub portal_password_hash: String,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// Name under which VPN credentials are filed. Set on approval.
    pub vpn_name: Option<String>,
    /// True once a VPN password has been established for this account.
    pub credential_set: bool,
    /// Maximum simultaneous devices.
    pub device_limit: u32,
    /// Administrator who approved this account.
    pub approved_by: Option<String>,
    /// Unix timestamp of approval.
    pub approved_at: Option<u64>,
    /// Unix timestamp of registration.
    pub created_at: u64,
}

impl Account {
    /// Creates a fresh record in `Pending` status.
    #[must_use]
    pub fn new(
        name: String,
        email: String,
        role: AccountRole,
        portal_password_hash: String,
        device_limit: u32,
        now: u64,
    ) -> Self {
        Self {
            name,
            email,
            role,
            portal_password_hash,
            status: AccountStatus::Pending,
            vpn_name: None,
            credential_set: false,
            device_limit,
            approved_by: None,
            approved_at: None,
            created_at: now,
        }
    }

    /// Approves a pending account, recording the approver and assigning the
    /// name under which VPN credentials will be filed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// `Pending`.
    pub fn approve(&mut self, admin: &str, vpn_name: String, now: u64) -> ProvisionResult<()> {
        self.guard("approve", AccountStatus::Pending)?;
        self.status = AccountStatus::Approved;
        self.vpn_name = Some(vpn_name);
        self.approved_by = Some(admin.to_string());
        self.approved_at = Some(now);
        Ok(())
    }

    /// Rejects a pending account.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// `Pending`.
    pub fn reject(&mut self) -> ProvisionResult<()> {
        self.guard("reject", AccountStatus::Pending)?;
        self.status = AccountStatus::Rejected;
        Ok(())
    }

    /// Suspends an approved account. The record is retained but self-service
    /// VPN credential privileges are withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// `Approved`.
    pub fn suspend(&mut self) -> ProvisionResult<()> {
        self.guard("suspend", AccountStatus::Approved)?;
        self.status = AccountStatus::Suspended;
        Ok(())
    }

    /// Reactivates a suspended account.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// `Suspended`.
    pub fn reactivate(&mut self) -> ProvisionResult<()> {
        self.guard("reactivate", AccountStatus::Suspended)?;
        self.status = AccountStatus::Approved;
        Ok(())
    }

    /// Parks the account in `Suspended` after a partially failed
    /// decommission, flagging it for administrative retry.
    ///
    /// This is the one transition reachable from any status: the record must
    /// not remain `Approved` once its credential cascade has started.
    pub fn park_suspended(&mut self) {
        self.status = AccountStatus::Suspended;
    }

    /// Checks that the account may establish or rotate its VPN credential.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// `Approved`.
    pub fn ensure_credential_allowed(&self, operation: &str) -> ProvisionResult<()> {
        if self.status == AccountStatus::Approved {
            Ok(())
        } else {
            Err(ProvisionError::invalid_state(operation, self.status))
        }
    }

    /// Returns the name under which VPN credentials are filed, defaulting to
    /// the account name when approval has not assigned one.
    #[must_use]
    pub fn vpn_name(&self) -> &str {
        self.vpn_name.as_deref().unwrap_or(&self.name)
    }

    fn guard(&self, operation: &str, expected: AccountStatus) -> ProvisionResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(ProvisionError::invalid_state(operation, self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(
            "alice".to_string(),
            "alice@x.test".to_string(),
            AccountRole::User,
            "sha256$00$00".to_string(),
            DEFAULT_DEVICE_LIMIT,
            1_000,
        )
    }

    #[test]
    fn test_registration_starts_pending() {
        let acct = account();
        assert_eq!(acct.status, AccountStatus::Pending);
        assert!(!acct.credential_set);
        assert!(acct.vpn_name.is_none());
        assert_eq!(acct.device_limit, 2);
    }

    #[test]
    fn test_approve_records_approver_and_vpn_name() {
        let mut acct = account();
        acct.approve("admin", "alice".to_string(), 2_000).expect("approve");
        assert_eq!(acct.status, AccountStatus::Approved);
        assert_eq!(acct.vpn_name(), "alice");
        assert_eq!(acct.approved_by.as_deref(), Some("admin"));
        assert_eq!(acct.approved_at, Some(2_000));
    }

    #[test]
    fn test_approve_twice_fails() {
        let mut acct = account();
        acct.approve("admin", "alice".to_string(), 2_000).expect("approve");
        let err = acct
            .approve("admin", "alice".to_string(), 3_000)
            .expect_err("second approve");
        assert!(matches!(err, ProvisionError::InvalidState { .. }));
    }

    #[test]
    fn test_suspend_reactivate_cycle() {
        let mut acct = account();
        acct.approve("admin", "alice".to_string(), 2_000).expect("approve");
        acct.suspend().expect("suspend");
        assert_eq!(acct.status, AccountStatus::Suspended);
        acct.reactivate().expect("reactivate");
        assert_eq!(acct.status, AccountStatus::Approved);
    }

    #[test]
    fn test_rejected_is_dead_end() {
        let mut acct = account();
        acct.reject().expect("reject");
        assert!(acct.approve("admin", "a".to_string(), 0).is_err());
        assert!(acct.suspend().is_err());
        assert!(acct.reactivate().is_err());
    }

    #[test]
    fn test_credential_guard_requires_approved() {
        let mut acct = account();
        assert!(acct.ensure_credential_allowed("establish credential").is_err());
        acct.approve("admin", "alice".to_string(), 2_000).expect("approve");
        assert!(acct.ensure_credential_allowed("establish credential").is_ok());
        acct.suspend().expect("suspend");
        let err = acct
            .ensure_credential_allowed("rotate credential")
            .expect_err("suspended");
        assert!(format!("{err}").contains("suspended"));
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(AccountStatus::Pending.to_string(), "pending");
        assert_eq!(AccountStatus::Approved.to_string(), "approved");
        assert_eq!(
            serde_json::to_string(&AccountStatus::Suspended).expect("json"),
            "\"suspended\""
        );
    }
}
