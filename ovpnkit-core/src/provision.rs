//! Provisioning façade.
//!
//! [`Provisioner`] owns the account registry, the credential store, the
//! network identity allocator, the link issuer, and the service probe, and
//! sequences the multi-store operations so the invariants hold: a credential
//! exists only for an approved account, a network identity only alongside a
//! credential, and a decommission that fails mid-cascade parks the record
//! instead of pretending it finished.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use ovpnkit_store::FsBlobStore;

use crate::account::{Account, AccountRole};
use crate::allocator::IdentityAllocator;
use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfigFile;
use crate::credstore::{self, CredentialStore};
use crate::error::{ProvisionError, ProvisionResult};
use crate::links::{IssuedLink, LinkIssuer, LinkStatus};
use crate::paths::ProvisionPaths;
use crate::registry::{AccountRegistry, RegistryStats};
use crate::status::{ServiceStatus, StatusProbe};

/// Hook invoked after credential changes so the daemon picks them up.
pub type ReloadHook = Box<dyn Fn() -> ProvisionResult<()> + Send + Sync>;

/// The lifecycle engine's single entry point.
pub struct Provisioner {
    paths: ProvisionPaths,
    registry: AccountRegistry,
    credentials: CredentialStore,
    allocator: IdentityAllocator,
    links: LinkIssuer,
    config: ServerConfigFile,
    probe: StatusProbe,
    reload: Option<ReloadHook>,
}

impl Provisioner {
    /// Opens the engine over `root` with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the backing directories or files cannot be
    /// created or loaded.
    pub fn open<P: AsRef<Path>>(root: P) -> ProvisionResult<Self> {
        Self::open_with_clock(root, Arc::new(SystemClock))
    }

    /// Opens the engine with an explicit time source.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the backing directories or files cannot be
    /// created or loaded.
    pub fn open_with_clock<P: AsRef<Path>>(
        root: P,
        clock: Arc<dyn Clock>,
    ) -> ProvisionResult<Self> {
        let paths = ProvisionPaths::new(root);
        let registry_store = Arc::new(FsBlobStore::open(paths.root())?);
        let registry = AccountRegistry::open(registry_store, Arc::clone(&clock))?;
        let credentials = CredentialStore::open(paths.auth_dir())?;
        let allocator = IdentityAllocator::open(paths.ccd_dir())?;
        let links = LinkIssuer::open(paths.links_dir(), clock)?;
        let config = ServerConfigFile::open(paths.server_config_path())?;
        let probe = StatusProbe::new(paths.status_log_path());
        Ok(Self {
            paths,
            registry,
            credentials,
            allocator,
            links,
            config,
            probe,
            reload: None,
        })
    }

    /// Installs a hook run after every credential mutation.
    #[must_use]
    pub fn with_reload(mut self, hook: ReloadHook) -> Self {
        self.reload = Some(hook);
        self
    }

    /// Replaces the allocator's inclusive address pool `[low, high]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty range.
    pub fn with_address_pool(mut self, pool: (u8, u8)) -> ProvisionResult<Self> {
        self.allocator = IdentityAllocator::with_pool(self.paths.ccd_dir(), pool)?;
        Ok(self)
    }

    /// Replaces the service probe (unit names, manager, timeouts).
    #[must_use]
    pub fn with_probe(mut self, probe: StatusProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Returns the on-disk layout in use.
    #[must_use]
    pub fn paths(&self) -> &ProvisionPaths {
        &self.paths
    }

    /// Seeds an administrator account if none exists. Returns whether one
    /// was created.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the record set fails.
    pub fn bootstrap_admin(
        &self,
        name: &str,
        email: &str,
        password: &SecretString,
    ) -> ProvisionResult<bool> {
        self.registry.bootstrap_admin(name, email, password)
    }

    /// Registers a new account; it starts in `Pending` status.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable name or contact address,
    /// or a conflict error if either is already taken.
    pub fn register_account(
        &self,
        name: &str,
        email: &str,
        portal_password: &SecretString,
        device_limit: Option<u32>,
    ) -> ProvisionResult<Account> {
        credstore::validate_name(name)?;
        if !email.contains('@') {
            return Err(ProvisionError::validation(
                "email",
                "must contain an '@' sign",
            ));
        }
        self.registry
            .register(name, email, portal_password, device_limit)
    }

    /// Approves a pending account. `vpn_name` defaults to the account name.
    ///
    /// Network identity allocation is deferred to the first credential
    /// establishment, so approving never consumes a pool slot.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown account or
    /// approver, a validation error if `admin` is not an administrator, or
    /// [`ProvisionError::InvalidState`] if the account is not pending.
    pub fn approve_account(
        &self,
        name: &str,
        admin: &str,
        vpn_name: Option<String>,
    ) -> ProvisionResult<Account> {
        let approver = self.registry.get(admin)?;
        if approver.role != AccountRole::Admin {
            return Err(ProvisionError::validation(
                "approver",
                "not an administrator",
            ));
        }
        let now = self.registry.now();
        let vpn_name = vpn_name.unwrap_or_else(|| name.to_string());
        credstore::validate_name(&vpn_name)?;
        let account = self
            .registry
            .update(name, |a| a.approve(admin, vpn_name, now))?;
        info!(name, admin, "account approved");
        Ok(account)
    }

    /// Rejects a pending account; the record is kept as a dead end.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown account or
    /// [`ProvisionError::InvalidState`] if it is not pending.
    pub fn reject_account(&self, name: &str) -> ProvisionResult<Account> {
        let account = self.registry.update(name, Account::reject)?;
        info!(name, "account rejected");
        Ok(account)
    }

    /// Suspends an approved account without touching its credential.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown account or
    /// [`ProvisionError::InvalidState`] if it is not approved.
    pub fn suspend_account(&self, name: &str) -> ProvisionResult<Account> {
        let account = self.registry.update(name, Account::suspend)?;
        info!(name, "account suspended");
        Ok(account)
    }

    /// Reactivates a suspended account.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown account or
    /// [`ProvisionError::InvalidState`] if it is not suspended.
    pub fn reactivate_account(&self, name: &str) -> ProvisionResult<Account> {
        let account = self.registry.update(name, Account::reactivate)?;
        info!(name, "account reactivated");
        Ok(account)
    }

    /// Establishes or rotates the VPN credential for an approved account and
    /// returns the assigned address suffix.
    ///
    /// The first establishment also allocates the network identity; a retry
    /// or rotation reuses the existing descriptor and never consumes a
    /// second pool slot. The reload hook, if installed, runs last.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// approved, [`ProvisionError::PoolExhausted`] if no address is free, or
    /// the credential-store, registry, or reload failure.
    pub fn establish_or_rotate_credential(
        &self,
        name: &str,
        password: &SecretString,
    ) -> ProvisionResult<u8> {
        let account = self.registry.get(name)?;
        account.ensure_credential_allowed("establish credential")?;

        // The identity is pinned before the credential line goes live: a
        // failed allocation must not leave a name the daemon authenticates.
        let vpn_name = account.vpn_name().to_string();
        let suffix = self.allocator.allocate(&vpn_name, account.device_limit)?;
        self.credentials.upsert(&vpn_name, password)?;

        if !account.credential_set {
            self.registry.update(name, |a| {
                a.credential_set = true;
                Ok(())
            })?;
        }

        self.run_reload()?;
        info!(name, suffix, "vpn credential established");
        Ok(suffix)
    }

    /// Checks a VPN login against the credential store (auth-hook path).
    ///
    /// Returns `false` for unknown names and wrong passwords alike.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the credential file cannot be read.
    pub fn verify_vpn_login(&self, name: &str, password: &SecretString) -> ProvisionResult<bool> {
        self.credentials.verify(name, password)
    }

    /// Removes an account and every artifact tied to it: credential line,
    /// network identity descriptor, then the record itself.
    ///
    /// On a partial failure the record is parked `Suspended` and the step's
    /// error is returned, so an administrator can retry; the retry re-runs
    /// the already-completed steps as no-ops. A second call after success
    /// reports `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown account, or the
    /// first cascade step's failure.
    pub fn decommission_account(&self, name: &str) -> ProvisionResult<Account> {
        let account = self.registry.get(name)?;
        let vpn_name = account.vpn_name().to_string();

        let cascade = self
            .credentials
            .remove(&vpn_name)
            .and_then(|()| self.allocator.release(&vpn_name));
        if let Err(err) = cascade {
            warn!(name, %err, "decommission cascade failed, parking account");
            if let Err(park_err) = self.registry.update(name, |a| {
                a.park_suspended();
                Ok(())
            }) {
                warn!(name, %park_err, "failed to park account after cascade failure");
            }
            return Err(err);
        }

        let removed = self.registry.remove(name)?;
        self.run_reload()?;
        info!(name, "account decommissioned");
        Ok(removed)
    }

    /// Issues a short-lived single-use download link for the account's
    /// configuration artifact at `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidState`] unless the account is
    /// approved, a validation error if it has no established credential, or
    /// a storage error if the artifact cannot be snapshotted.
    pub fn request_download(&self, name: &str, source: &Path) -> ProvisionResult<IssuedLink> {
        let account = self.registry.get(name)?;
        account.ensure_credential_allowed("request download")?;
        if !account.credential_set {
            return Err(ProvisionError::validation(
                "account",
                "no vpn credential established",
            ));
        }
        self.links.issue(account.vpn_name(), source)
    }

    /// Redeems a download token, consuming one use. Returns the artifact
    /// path and the filename to present.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown token and
    /// [`ProvisionError::Gone`] for an expired or exhausted one.
    pub fn fetch_download(&self, token: &str) -> ProvisionResult<(PathBuf, String)> {
        self.links.consume(token)
    }

    /// Looks up a download token without consuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the link state cannot be inspected.
    pub fn resolve_download(&self, token: &str) -> ProvisionResult<LinkStatus> {
        self.links.resolve(token)
    }

    /// Returns the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] if no such record exists.
    pub fn account(&self, name: &str) -> ProvisionResult<Account> {
        self.registry.get(name)
    }

    /// Returns all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn accounts(&self) -> ProvisionResult<Vec<Account>> {
        self.registry.list()
    }

    /// Returns the records awaiting review.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn pending_accounts(&self) -> ProvisionResult<Vec<Account>> {
        self.registry.pending()
    }

    /// Returns aggregate account counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn stats(&self) -> ProvisionResult<RegistryStats> {
        self.registry.stats()
    }

    /// Reports the VPN service state (best-effort, never fails).
    #[must_use]
    pub fn service_status(&self) -> ServiceStatus {
        self.probe.probe()
    }

    /// Restarts the VPN service; returns the unit that was restarted.
    ///
    /// # Errors
    ///
    /// Returns an [`ProvisionError::ExternalTool`] failure if no unit could
    /// be restarted.
    pub fn restart_service(&self) -> ProvisionResult<String> {
        self.probe.restart()
    }

    /// Returns the managed server configuration file handle.
    #[must_use]
    pub fn server_config(&self) -> &ServerConfigFile {
        &self.config
    }

    fn run_reload(&self) -> ProvisionResult<()> {
        if let Some(hook) = &self.reload {
            hook()?;
        }
        Ok(())
    }
}
