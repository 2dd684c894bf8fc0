//! Atomic blob store trait and implementations.
//!
//! A blob store holds small named files inside one directory. Writes MUST be
//! atomic so that readers always observe either the complete old content or
//! the complete new content, never a partial write.
//!
//! # Atomic Write Pattern
//!
//! The filesystem implementation follows this sequence:
//!
//! 1. Write data to a temporary file in the same directory
//! 2. `fsync` the temporary file
//! 3. Atomically rename the temporary file to the target name
//! 4. `fsync` the parent directory so the rename is durable

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};

/// Atomic storage for small named files within one directory.
pub trait AtomicBlobStore: Send + Sync {
    /// Reads a blob by name.
    ///
    /// Returns `Ok(None)` if the blob does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails for any reason other than the blob
    /// being absent.
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Atomically writes a blob, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails at any stage.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Deletes a blob. Deleting a non-existent blob is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns an error only for actual I/O failures.
    fn delete(&self, name: &str) -> StoreResult<()>;

    /// Lists the names of all blobs in the store.
    ///
    /// Temporary files from in-flight writes are not reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying directory cannot be read.
    fn list(&self) -> StoreResult<Vec<String>>;

    /// Checks whether a blob exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.read(name)?.is_some())
    }
}

fn io_error<S: Into<String>>(context: S, err: std::io::Error) -> StoreError {
    StoreError::io(context, err)
}

// FsBlobStore

/// Filesystem-backed implementation of [`AtomicBlobStore`].
///
/// File operations are atomic at the OS level, but callers performing
/// read-modify-write cycles still need external locking (see
/// [`crate::lock::FileLock`]).
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    directory: PathBuf,
}

impl FsBlobStore {
    /// Creates a blob store rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(directory: P) -> StoreResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            io_error(
                format!("creating blob directory '{}'", directory.display()),
                e,
            )
        })?;
        Ok(Self { directory })
    }

    /// Returns the directory this store is rooted at.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the on-disk path for a blob name.
    #[must_use]
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!(".{name}.tmp"))
    }

    fn sync_file(file: &File) -> StoreResult<()> {
        file.sync_all().map_err(|e| io_error("syncing file", e))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        let dir = File::open(&self.directory).map_err(|e| {
            io_error(
                format!("opening directory for sync '{}'", self.directory.display()),
                e,
            )
        })?;
        dir.sync_all()
            .map_err(|e| io_error("syncing directory", e))
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // Directory fsync is not portable; rename is still atomic on modern
        // filesystems.
        Ok(())
    }
}

impl AtomicBlobStore for FsBlobStore {
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(format!("reading blob '{}'", path.display()), e)),
        }
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let final_path = self.blob_path(name);
        let temp_path = self.temp_path(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| {
                io_error(
                    format!("creating temporary file '{}'", temp_path.display()),
                    e,
                )
            })?;

        file.write_all(bytes).map_err(|e| {
            io_error(
                format!("writing temporary file '{}'", temp_path.display()),
                e,
            )
        })?;

        Self::sync_file(&file)?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            io_error(
                format!(
                    "renaming '{}' to '{}'",
                    temp_path.display(),
                    final_path.display()
                ),
                e,
            )
        })?;

        self.sync_directory()
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let path = self.blob_path(name);
        match fs::remove_file(&path) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(format!("deleting blob '{}'", path.display()), e)),
        }
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            io_error(
                format!("listing blob directory '{}'", self.directory.display()),
                e,
            )
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("reading directory entry", e))?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Skip in-flight temporaries and other hidden files.
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.blob_path(name).exists())
    }
}

// MemoryBlobStore

/// In-memory implementation of [`AtomicBlobStore`] for tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty in-memory blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtomicBlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| {
            StoreError::Lock("memory blob store mutex poisoned".to_string())
        })?;
        Ok(blobs.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().map_err(|_| {
            StoreError::Lock("memory blob store mutex poisoned".to_string())
        })?;
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        let mut blobs = self.blobs.lock().map_err(|_| {
            StoreError::Lock("memory blob store mutex poisoned".to_string())
        })?;
        blobs.remove(name);
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        let blobs = self.blobs.lock().map_err(|_| {
            StoreError::Lock("memory blob store mutex poisoned".to_string())
        })?;
        let mut names: Vec<String> = blobs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
