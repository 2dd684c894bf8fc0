//! Network identity allocator.
//!
//! Each account with a live VPN credential gets one descriptor file in the
//! client-config directory pinning a fixed private address and the
//! device-count policy the daemon pushes to that client. The descriptor file
//! itself is the allocation record: scanning the directory yields the used
//! suffixes, and a failure before the descriptor is persisted simply leaves
//! the suffix free for the next scan.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;

use ovpnkit_store::{AtomicBlobStore, FileLock, FsBlobStore, StoreError};

use crate::account::DEFAULT_DEVICE_LIMIT;
use crate::credstore::validate_name;
use crate::error::{ProvisionError, ProvisionResult};

const LOCK_FILENAME: &str = ".ccd.lock";
const SUBNET_PREFIX: &str = "10.8.0";
const NETMASK: &str = "255.255.255.0";

/// Default inclusive suffix pool.
pub const DEFAULT_POOL: (u8, u8) = (50, 254);

/// A parsed network identity descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDescriptor {
    /// Account name the descriptor belongs to.
    pub name: String,
    /// Assigned address suffix.
    pub suffix: u8,
    /// Device limit pushed to the client.
    pub device_limit: u32,
}

/// Assigns a unique private address suffix to each account from a bounded
/// pool, persisted as one descriptor file per account.
pub struct IdentityAllocator {
    blobs: FsBlobStore,
    file_lock: FileLock,
    mutation: Mutex<()>,
    low: u8,
    high: u8,
}

impl IdentityAllocator {
    /// Opens the allocator over `ccd_dir` with the default pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or lock file cannot be created.
    pub fn open<P: AsRef<Path>>(ccd_dir: P) -> ProvisionResult<Self> {
        Self::with_pool(ccd_dir, DEFAULT_POOL)
    }

    /// Opens the allocator with an explicit inclusive pool `[low, high]`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty pool, or a storage error if
    /// the directory cannot be created.
    pub fn with_pool<P: AsRef<Path>>(ccd_dir: P, pool: (u8, u8)) -> ProvisionResult<Self> {
        let (low, high) = pool;
        if low > high {
            return Err(ProvisionError::validation(
                "pool",
                format!("empty range {low}-{high}"),
            ));
        }
        let blobs = FsBlobStore::open(&ccd_dir)?;
        let file_lock = FileLock::open(&ccd_dir.as_ref().join(LOCK_FILENAME))?;
        Ok(Self {
            blobs,
            file_lock,
            mutation: Mutex::new(()),
            low,
            high,
        })
    }

    /// Assigns the smallest unused suffix to `name` and persists its
    /// descriptor.
    ///
    /// Allocation is idempotent per name: if a descriptor already exists its
    /// suffix is returned and nothing is written, so a retried provisioning
    /// call cannot consume a second slot.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable name,
    /// [`ProvisionError::PoolExhausted`] when no suffix is free, or a
    /// storage error if the descriptor cannot be written.
    pub fn allocate(&self, name: &str, device_limit: u32) -> ProvisionResult<u8> {
        validate_name(name)?;
        let _guard = self
            .mutation
            .lock()
            .map_err(|_| ProvisionError::poisoned("identity allocator"))?;
        let _file_guard = self.file_lock.lock()?;

        if let Some(existing) = self.read_descriptor(name)? {
            return Ok(existing.suffix);
        }

        let used = self.scan_suffixes()?;
        let suffix = (self.low..=self.high)
            .find(|s| !used.contains(s))
            .ok_or(ProvisionError::PoolExhausted {
                low: self.low,
                high: self.high,
            })?;

        let descriptor = IdentityDescriptor {
            name: name.to_string(),
            suffix,
            device_limit,
        };
        self.blobs
            .write_atomic(name, render_descriptor(&descriptor).as_bytes())?;

        info!(name, suffix, "network identity assigned");
        Ok(suffix)
    }

    /// Deletes the descriptor for `name`; idempotent if absent.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable name, or a storage error
    /// if the deletion fails.
    pub fn release(&self, name: &str) -> ProvisionResult<()> {
        validate_name(name)?;
        let _guard = self
            .mutation
            .lock()
            .map_err(|_| ProvisionError::poisoned("identity allocator"))?;
        let _file_guard = self.file_lock.lock()?;

        if self.blobs.exists(name)? {
            self.blobs.delete(name)?;
            info!(name, "network identity released");
        }
        Ok(())
    }

    /// Returns the set of suffixes currently assigned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory scan fails.
    pub fn assigned(&self) -> ProvisionResult<BTreeSet<u8>> {
        self.scan_suffixes()
    }

    /// Returns the descriptor for `name`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the descriptor cannot be read or parsed.
    pub fn lookup(&self, name: &str) -> ProvisionResult<Option<IdentityDescriptor>> {
        self.read_descriptor(name)
    }

    fn scan_suffixes(&self) -> ProvisionResult<BTreeSet<u8>> {
        let mut used = BTreeSet::new();
        for name in self.blobs.list()? {
            if let Some(descriptor) = self.read_descriptor(&name)? {
                used.insert(descriptor.suffix);
            }
        }
        Ok(used)
    }

    fn read_descriptor(&self, name: &str) -> ProvisionResult<Option<IdentityDescriptor>> {
        let Some(bytes) = self.blobs.read(name)? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|_| {
            ProvisionError::Store(StoreError::corrupted(format!(
                "descriptor '{name}' is not UTF-8"
            )))
        })?;
        parse_descriptor(name, &text).map(Some)
    }
}

fn render_descriptor(descriptor: &IdentityDescriptor) -> String {
    format!(
        "ifconfig-push {SUBNET_PREFIX}.{} {NETMASK}\npush \"max-devices {}\"\n",
        descriptor.suffix, descriptor.device_limit
    )
}

fn parse_descriptor(name: &str, text: &str) -> ProvisionResult<IdentityDescriptor> {
    let corrupted = |reason: String| {
        ProvisionError::Store(StoreError::corrupted(format!(
            "descriptor '{name}': {reason}"
        )))
    };

    let mut suffix = None;
    let mut device_limit = DEFAULT_DEVICE_LIMIT;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("ifconfig-push ") {
            let address = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| corrupted("ifconfig-push without address".to_string()))?;
            let octet = address
                .rsplit('.')
                .next()
                .ok_or_else(|| corrupted(format!("unparseable address '{address}'")))?;
            suffix = Some(octet.parse::<u8>().map_err(|_| {
                corrupted(format!("unparseable address suffix '{octet}'"))
            })?);
        } else if let Some(rest) = line.strip_prefix("push \"max-devices ") {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            device_limit = digits
                .parse()
                .map_err(|_| corrupted(format!("unparseable device limit '{rest}'")))?;
        }
    }

    let suffix = suffix.ok_or_else(|| corrupted("missing ifconfig-push line".to_string()))?;
    Ok(IdentityDescriptor {
        name: name.to_string(),
        suffix,
        device_limit,
    })
}
