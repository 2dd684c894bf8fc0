//! Persistent account record set.
//!
//! The registry keeps every enrollment record in memory and mirrors the
//! whole set to one JSON document through an atomic blob write on every
//! mutation. It is an explicitly constructed, owned instance: two registries
//! over different blob stores never collide.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use ovpnkit_store::AtomicBlobStore;

use crate::account::{Account, AccountRole, AccountStatus, DEFAULT_DEVICE_LIMIT};
use crate::clock::Clock;
use crate::error::{ProvisionError, ProvisionResult};
use crate::hash::hash_password;

/// Blob name of the persisted record set.
pub const REGISTRY_FILENAME: &str = "registry.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    accounts: BTreeMap<String, Account>,
}

/// Aggregate counts over the record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// All live records.
    pub total_users: usize,
    /// Records awaiting review.
    pub pending_users: usize,
    /// Records cleared for self-service.
    pub approved_users: usize,
}

/// Persistent store of [`Account`] records with uniqueness enforcement.
pub struct AccountRegistry {
    store: Arc<dyn AtomicBlobStore>,
    accounts: Mutex<BTreeMap<String, Account>>,
    clock: Arc<dyn Clock>,
}

impl AccountRegistry {
    /// Opens the registry, loading any persisted record set.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted document cannot be read or decoded.
    pub fn open(
        store: Arc<dyn AtomicBlobStore>,
        clock: Arc<dyn Clock>,
    ) -> ProvisionResult<Self> {
        let accounts = match store.read(REGISTRY_FILENAME)? {
            Some(bytes) => {
                let document: RegistryDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| ProvisionError::serialization(e.to_string()))?;
                document.accounts
            }
            None => BTreeMap::new(),
        };
        Ok(Self {
            store,
            accounts: Mutex::new(accounts),
            clock,
        })
    }

    /// Seeds an administrator account if no admin exists yet.
    ///
    /// The seeded admin is created directly in `Approved` status so it can
    /// act immediately. Returns `true` if an account was created.
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
        let mut accounts = self.lock()?;
        if accounts
            .values()
            .any(|a| a.role == AccountRole::Admin)
        {
            return Ok(false);
        }

        let now = self.clock.now_unix();
        let mut admin = Account::new(
            name.to_string(),
            email.to_string(),
            AccountRole::Admin,
            hash_password(password),
            DEFAULT_DEVICE_LIMIT,
            now,
        );
        admin.status = AccountStatus::Approved;

        let mut next = accounts.clone();
        next.insert(name.to_string(), admin);
        self.persist(&next)?;
        *accounts = next;

        info!(name, "administrator account seeded");
        Ok(true)
    }

    /// Registers a new account in `Pending` status.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero device limit, or a conflict
    /// error if the name or contact address is already taken, leaving the
    /// record set unchanged.
    pub fn register(
        &self,
        name: &str,
        email: &str,
        portal_password: &SecretString,
        device_limit: Option<u32>,
    ) -> ProvisionResult<Account> {
        if device_limit == Some(0) {
            return Err(ProvisionError::validation(
                "device limit",
                "must be positive",
            ));
        }
        let mut accounts = self.lock()?;
        if accounts.contains_key(name) {
            return Err(ProvisionError::conflict("account name", name));
        }
        if accounts.values().any(|a| a.email == email) {
            return Err(ProvisionError::conflict("contact address", email));
        }

        let account = Account::new(
            name.to_string(),
            email.to_string(),
            AccountRole::User,
            hash_password(portal_password),
            device_limit.unwrap_or(DEFAULT_DEVICE_LIMIT),
            self.clock.now_unix(),
        );

        let mut next = accounts.clone();
        next.insert(name.to_string(), account.clone());
        self.persist(&next)?;
        *accounts = next;

        info!(name, email, "account registered");
        Ok(account)
    }

    /// Returns the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] if no such record exists.
    pub fn get(&self, name: &str) -> ProvisionResult<Account> {
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::not_found("account", name))
    }

    /// Returns all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry mutex is poisoned.
    pub fn list(&self) -> ProvisionResult<Vec<Account>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    /// Returns the records awaiting review.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry mutex is poisoned.
    pub fn pending(&self) -> ProvisionResult<Vec<Account>> {
        Ok(self
            .lock()?
            .values()
            .filter(|a| a.status == AccountStatus::Pending)
            .cloned()
            .collect())
    }

    /// Returns aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry mutex is poisoned.
    pub fn stats(&self) -> ProvisionResult<RegistryStats> {
        let accounts = self.lock()?;
        Ok(RegistryStats {
            total_users: accounts.len(),
            pending_users: accounts
                .values()
                .filter(|a| a.status == AccountStatus::Pending)
                .count(),
            approved_users: accounts
                .values()
                .filter(|a| a.status == AccountStatus::Approved)
                .count(),
        })
    }

    /// Mutates the record for `name` through `f` and persists the result.
    ///
    /// This is the only mutation path for existing records, so every status
    /// change flows through the transition methods `f` calls. If `f` or the
    /// persist step fails, the in-memory record set is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown name, or
    /// whatever error `f` or persistence produced.
    pub fn update<F>(&self, name: &str, f: F) -> ProvisionResult<Account>
    where
        F: FnOnce(&mut Account) -> ProvisionResult<()>,
    {
        let mut accounts = self.lock()?;
        let mut account = accounts
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::not_found("account", name))?;

        f(&mut account)?;

        let mut next = accounts.clone();
        next.insert(name.to_string(), account.clone());
        self.persist(&next)?;
        *accounts = next;
        Ok(account)
    }

    /// Deletes the record for `name` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] if no such record exists.
    pub fn remove(&self, name: &str) -> ProvisionResult<Account> {
        let mut accounts = self.lock()?;
        let mut next = accounts.clone();
        let Some(account) = next.remove(name) else {
            return Err(ProvisionError::not_found("account", name));
        };
        self.persist(&next)?;
        *accounts = next;

        info!(name, "account record deleted");
        Ok(account)
    }

    /// Returns the Unix timestamp the registry's clock reports.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now_unix()
    }

    fn lock(
        &self,
    ) -> ProvisionResult<std::sync::MutexGuard<'_, BTreeMap<String, Account>>> {
        self.accounts
            .lock()
            .map_err(|_| ProvisionError::poisoned("account registry"))
    }

    fn persist(&self, accounts: &BTreeMap<String, Account>) -> ProvisionResult<()> {
        let document = RegistryDocument {
            accounts: accounts.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| ProvisionError::serialization(e.to_string()))?;
        self.store.write_atomic(REGISTRY_FILENAME, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use ovpnkit_store::MemoryBlobStore;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn open_registry() -> (Arc<MemoryBlobStore>, AccountRegistry) {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let registry =
            AccountRegistry::open(Arc::clone(&store) as _, clock).expect("open");
        (store, registry)
    }

    #[test]
    fn test_register_and_get() {
        let (_store, registry) = open_registry();
        let account = registry
            .register("alice", "alice@x.test", &secret("portal-pw"), None)
            .expect("register");
        assert_eq!(account.status, AccountStatus::Pending);
        assert_eq!(account.created_at, 1_000);

        let loaded = registry.get("alice").expect("get");
        assert_eq!(loaded.email, "alice@x.test");
    }

    #[test]
    fn test_duplicate_name_and_email_conflict() {
        let (_store, registry) = open_registry();
        registry
            .register("alice", "alice@x.test", &secret("pw"), None)
            .expect("register");

        let err = registry
            .register("alice", "other@x.test", &secret("pw"), None)
            .expect_err("duplicate name");
        assert!(matches!(err, ProvisionError::Conflict { resource, .. } if resource == "account name"));

        let err = registry
            .register("bob", "alice@x.test", &secret("pw"), None)
            .expect_err("duplicate email");
        assert!(matches!(err, ProvisionError::Conflict { resource, .. } if resource == "contact address"));

        // Record set unchanged by the failed attempts.
        assert_eq!(registry.list().expect("list").len(), 1);
    }

    #[test]
    fn test_zero_device_limit_is_rejected() {
        let (_store, registry) = open_registry();
        let err = registry
            .register("alice", "alice@x.test", &secret("pw"), Some(0))
            .expect_err("zero limit");
        assert!(matches!(err, ProvisionError::Validation { .. }));
        assert!(registry.list().expect("list").is_empty());
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let (store, registry) = open_registry();
        registry
            .register("alice", "alice@x.test", &secret("pw"), None)
            .expect("register");
        registry
            .update("alice", |a| a.approve("admin", "alice".to_string(), 2_000))
            .expect("approve");

        let clock = Arc::new(ManualClock::new(5_000));
        let reopened = AccountRegistry::open(store as _, clock).expect("reopen");
        let account = reopened.get("alice").expect("get");
        assert_eq!(account.status, AccountStatus::Approved);
        assert_eq!(account.approved_by.as_deref(), Some("admin"));
    }

    #[test]
    fn test_update_failure_leaves_state_unchanged() {
        let (_store, registry) = open_registry();
        registry
            .register("alice", "alice@x.test", &secret("pw"), None)
            .expect("register");

        // Suspending a pending account fails the transition guard.
        let err = registry
            .update("alice", Account::suspend)
            .expect_err("bad transition");
        assert!(matches!(err, ProvisionError::InvalidState { .. }));
        assert_eq!(
            registry.get("alice").expect("get").status,
            AccountStatus::Pending
        );
    }

    #[test]
    fn test_remove_then_not_found() {
        let (_store, registry) = open_registry();
        registry
            .register("alice", "alice@x.test", &secret("pw"), None)
            .expect("register");
        registry.remove("alice").expect("remove");
        let err = registry.remove("alice").expect_err("second remove");
        assert!(matches!(err, ProvisionError::NotFound { .. }));
    }

    #[test]
    fn test_stats() {
        let (_store, registry) = open_registry();
        registry
            .register("alice", "a@x.test", &secret("pw"), None)
            .expect("register");
        registry
            .register("bob", "b@x.test", &secret("pw"), None)
            .expect("register");
        registry
            .update("alice", |a| a.approve("admin", "alice".to_string(), 2_000))
            .expect("approve");

        let stats = registry.stats().expect("stats");
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.pending_users, 1);
        assert_eq!(stats.approved_users, 1);
    }

    #[test]
    fn test_bootstrap_admin_is_idempotent() {
        let (store, registry) = open_registry();
        assert!(registry
            .bootstrap_admin("admin", "admin@x.test", &secret("changeme"))
            .expect("bootstrap"));
        assert!(!registry
            .bootstrap_admin("admin", "admin@x.test", &secret("changeme"))
            .expect("bootstrap again"));

        // Still false after a reload: the seeded admin is persisted.
        let clock = Arc::new(ManualClock::new(9_000));
        let reopened = AccountRegistry::open(store as _, clock).expect("reopen");
        assert!(!reopened
            .bootstrap_admin("admin", "admin@x.test", &secret("changeme"))
            .expect("bootstrap after reload"));

        let admin = reopened.get("admin").expect("get");
        assert_eq!(admin.role, AccountRole::Admin);
        assert_eq!(admin.status, AccountStatus::Approved);
        // The seeded password is hashed, never stored as plaintext.
        assert!(admin.portal_password_hash.starts_with("sha256$"));
    }
}
