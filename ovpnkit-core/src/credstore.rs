//! Flat-file credential store consumed by the VPN daemon's auth hook.
//!
//! The store is a line-oriented file of `name:hash` entries and is the
//! single source of truth for "can this name authenticate to the VPN".
//! Every mutation is a full read-modify-write cycle ending in an atomic
//! replace, serialized by an in-process mutex plus a cross-process file
//! lock, so a crash can never leave a truncated or duplicated file.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use secrecy::SecretString;
use tracing::info;

use ovpnkit_store::{AtomicBlobStore, FileLock, FsBlobStore, StoreError};

use crate::error::{ProvisionError, ProvisionResult};
use crate::hash::{hash_password, verify_password};

const USERS_FILENAME: &str = "users";
const LOCK_FILENAME: &str = "users.lock";

/// The flat-file mapping of VPN account names to password hashes.
pub struct CredentialStore {
    blobs: FsBlobStore,
    file_lock: FileLock,
    mutation: Mutex<()>,
}

impl CredentialStore {
    /// Opens the store in `auth_dir`, creating the directory if needed.
    ///
    /// The credential file itself is created on first mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or lock file cannot be created.
    pub fn open<P: AsRef<Path>>(auth_dir: P) -> ProvisionResult<Self> {
        let blobs = FsBlobStore::open(&auth_dir)?;
        let file_lock = FileLock::open(&auth_dir.as_ref().join(LOCK_FILENAME))?;
        Ok(Self {
            blobs,
            file_lock,
            mutation: Mutex::new(()),
        })
    }

    /// Writes or replaces the credential line for `name`.
    ///
    /// The password is hashed before it touches disk; the rewrite is
    /// all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable name, or a storage error
    /// if the rewrite fails (in which case the old content is intact).
    pub fn upsert(&self, name: &str, password: &SecretString) -> ProvisionResult<()> {
        validate_name(name)?;
        let hash = hash_password(password);

        let _guard = self
            .mutation
            .lock()
            .map_err(|_| ProvisionError::poisoned("credential store"))?;
        let _file_guard = self.file_lock.lock()?;

        let mut entries = self.load_entries()?;
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, stored)) => *stored = hash,
            None => entries.push((name.to_string(), hash)),
        }
        self.store_entries(&entries)?;

        info!(name, "vpn credential written");
        Ok(())
    }

    /// Drops the credential line for `name`. Removing an absent name is a
    /// no-op success.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rewrite fails.
    pub fn remove(&self, name: &str) -> ProvisionResult<()> {
        let _guard = self
            .mutation
            .lock()
            .map_err(|_| ProvisionError::poisoned("credential store"))?;
        let _file_guard = self.file_lock.lock()?;

        let mut entries = self.load_entries()?;
        let before = entries.len();
        entries.retain(|(n, _)| n != name);
        if entries.len() != before {
            self.store_entries(&entries)?;
            info!(name, "vpn credential removed");
        }
        Ok(())
    }

    /// Checks `password` against the stored hash for `name`.
    ///
    /// Returns `false` when `name` is absent.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read.
    pub fn verify(&self, name: &str, password: &SecretString) -> ProvisionResult<bool> {
        let entries = self.load_entries()?;
        Ok(entries
            .iter()
            .find(|(n, _)| n == name)
            .is_some_and(|(_, stored)| verify_password(password, stored)))
    }

    /// Returns the set of names that can currently authenticate.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be read.
    pub fn list(&self) -> ProvisionResult<BTreeSet<String>> {
        let entries = self.load_entries()?;
        Ok(entries.into_iter().map(|(name, _)| name).collect())
    }

    fn load_entries(&self) -> ProvisionResult<Vec<(String, String)>> {
        let Some(bytes) = self.blobs.read(USERS_FILENAME)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(bytes).map_err(|_| {
            ProvisionError::Store(StoreError::corrupted("credential file is not UTF-8"))
        })?;

        let mut entries = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((name, hash)) = line.split_once(':') else {
                return Err(ProvisionError::Store(StoreError::corrupted(format!(
                    "credential line without separator: '{line}'"
                ))));
            };
            entries.push((name.to_string(), hash.to_string()));
        }
        Ok(entries)
    }

    fn store_entries(&self, entries: &[(String, String)]) -> ProvisionResult<()> {
        let mut content = String::new();
        for (name, hash) in entries {
            content.push_str(name);
            content.push(':');
            content.push_str(hash);
            content.push('\n');
        }
        self.blobs.write_atomic(USERS_FILENAME, content.as_bytes())?;
        Ok(())
    }
}

/// Names become blob filenames, so the charset is strict: anything that
/// could traverse directories or hide from a directory scan is rejected.
pub(crate) fn validate_name(name: &str) -> ProvisionResult<()> {
    if name.is_empty() {
        return Err(ProvisionError::validation("name", "must not be empty"));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(ProvisionError::validation(
            "name",
            "must not start with '.' or '-'",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(ProvisionError::validation(
            "name",
            "may contain only ASCII letters, digits, '.', '-' and '_'",
        ));
    }
    Ok(())
}
