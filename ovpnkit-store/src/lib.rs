//! On-disk storage primitives for ovpnkit.
//!
//! Everything the provisioning engine writes to disk goes through this
//! crate: small files are written through an [`AtomicBlobStore`] so a crash
//! mid-write can never leave a truncated or duplicated file, and mutating
//! read-modify-write cycles are serialized across processes with a
//! [`FileLock`].
//!
//! The [`MemoryBlobStore`] implementation exists for tests that exercise the
//! engine without touching the filesystem.

pub mod blob;
pub mod error;
pub mod lock;

pub use blob::{AtomicBlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{StoreError, StoreResult};
pub use lock::{FileLock, FileLockGuard};
