//! Ephemeral single-use download links.
//!
//! A link binds an unguessable token to a materialized copy of the
//! configuration artifact. The copy is taken at issuance, so later mutation
//! of the source cannot change what the link serves. Links expire after a
//! short fixed window and carry a consumption budget (default one download).
//!
//! There is no reaper thread: expiry is checked lazily on resolve, and
//! issuing a new link for an account first sweeps that account's dead links
//! and their materialized files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ovpnkit_store::{AtomicBlobStore, FsBlobStore};

use crate::clock::Clock;
use crate::error::{ProvisionError, ProvisionResult};

const LINKS_FILENAME: &str = ".links.json";
const TOKEN_BYTES: usize = 32;

/// Default link lifetime in seconds.
pub const DEFAULT_LINK_TTL_SECS: u64 = 5 * 60;

/// Default consumption budget per link.
pub const DEFAULT_MAX_DOWNLOADS: u32 = 1;

/// A persisted download link record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Opaque unguessable token.
    pub token: String,
    /// Owning account name.
    pub account: String,
    /// Name of the materialized artifact inside the links directory.
    pub artifact_name: String,
    /// Filename to present to the downloader.
    pub public_filename: String,
    /// Completed downloads so far.
    pub downloads: u32,
    /// Maximum number of downloads.
    pub max_downloads: u32,
    /// Absolute Unix expiry timestamp.
    pub expires_at: u64,
    /// Unix timestamp of issuance.
    pub created_at: u64,
}

impl DownloadLink {
    fn usable_at(&self, now: u64) -> bool {
        now < self.expires_at && self.downloads < self.max_downloads
    }
}

/// Outcome of resolving a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// The link is live; the path points at the materialized artifact.
    Ready(PathBuf),
    /// The expiry window has elapsed.
    Expired,
    /// The consumption budget is spent.
    Exhausted,
    /// No such token.
    NotFound,
}

/// What the caller gets back from issuance.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedLink {
    /// The download token.
    pub token: String,
    /// Filename to present to the downloader.
    pub public_filename: String,
    /// Absolute Unix expiry timestamp.
    pub expires_at: u64,
}

/// Mints and redeems short-lived single-use download links.
pub struct LinkIssuer {
    blobs: FsBlobStore,
    links: Mutex<HashMap<String, DownloadLink>>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    max_downloads: u32,
}

impl LinkIssuer {
    /// Opens the issuer over `links_dir`, loading any persisted link records.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the persisted
    /// records cannot be decoded.
    pub fn open<P: AsRef<Path>>(links_dir: P, clock: Arc<dyn Clock>) -> ProvisionResult<Self> {
        let blobs = FsBlobStore::open(links_dir)?;
        let links = match blobs.read(LINKS_FILENAME)? {
            Some(bytes) => {
                let records: Vec<DownloadLink> = serde_json::from_slice(&bytes)
                    .map_err(|e| ProvisionError::serialization(e.to_string()))?;
                records.into_iter().map(|l| (l.token.clone(), l)).collect()
            }
            None => HashMap::new(),
        };
        Ok(Self {
            blobs,
            links: Mutex::new(links),
            clock,
            ttl_secs: DEFAULT_LINK_TTL_SECS,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
        })
    }

    /// Overrides the expiry window and consumption budget.
    #[must_use]
    pub fn with_policy(mut self, ttl_secs: u64, max_downloads: u32) -> Self {
        self.ttl_secs = ttl_secs;
        self.max_downloads = max_downloads;
        self
    }

    /// Mints a link for `account` serving a snapshot of `source`.
    ///
    /// Dead links of the same account are swept first so expired artifacts
    /// do not accumulate.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the source cannot be read or the snapshot
    /// cannot be written.
    pub fn issue(&self, account: &str, source: &Path) -> ProvisionResult<IssuedLink> {
        let bytes = std::fs::read(source).map_err(|e| {
            ProvisionError::Store(ovpnkit_store::StoreError::io(
                format!("reading source artifact '{}'", source.display()),
                e,
            ))
        })?;

        let mut links = self.lock()?;
        let now = self.clock.now_unix();

        self.sweep_account(&mut links, account, now);

        let token = generate_token();
        let artifact_name = format!("{account}_{token}.ovpn");
        self.blobs.write_atomic(&artifact_name, &bytes)?;

        let link = DownloadLink {
            token: token.clone(),
            account: account.to_string(),
            artifact_name,
            public_filename: format!("{account}.ovpn"),
            downloads: 0,
            max_downloads: self.max_downloads,
            expires_at: now + self.ttl_secs,
            created_at: now,
        };
        let issued = IssuedLink {
            token: token.clone(),
            public_filename: link.public_filename.clone(),
            expires_at: link.expires_at,
        };

        links.insert(token, link);
        self.persist(&links)?;

        info!(account, expires_at = issued.expires_at, "download link issued");
        Ok(issued)
    }

    /// Looks up a token without consuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer mutex is poisoned.
    pub fn resolve(&self, token: &str) -> ProvisionResult<LinkStatus> {
        let links = self.lock()?;
        let Some(link) = links.get(token) else {
            return Ok(LinkStatus::NotFound);
        };
        let now = self.clock.now_unix();
        if now >= link.expires_at {
            return Ok(LinkStatus::Expired);
        }
        if link.downloads >= link.max_downloads {
            return Ok(LinkStatus::Exhausted);
        }
        Ok(LinkStatus::Ready(self.blobs.blob_path(&link.artifact_name)))
    }

    /// Consumes one download from the link's budget and returns the artifact
    /// path and public filename.
    ///
    /// The usability check and the increment happen under one lock, so two
    /// concurrent fetches of a single-use token cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotFound`] for an unknown token and
    /// [`ProvisionError::Gone`] for an expired or exhausted one.
    pub fn consume(&self, token: &str) -> ProvisionResult<(PathBuf, String)> {
        let mut links = self.lock()?;
        let now = self.clock.now_unix();

        let mut next = links.clone();
        let link = next
            .get_mut(token)
            .ok_or_else(|| ProvisionError::not_found("download link", token))?;
        if now >= link.expires_at {
            return Err(ProvisionError::Gone { reason: "expired" });
        }
        if link.downloads >= link.max_downloads {
            return Err(ProvisionError::Gone { reason: "exhausted" });
        }

        link.downloads += 1;
        let path = self.blobs.blob_path(&link.artifact_name);
        let filename = link.public_filename.clone();
        let account = link.account.clone();

        // The budget is committed only once the new state is durable; if the
        // persist fails the caller got no bytes and may retry.
        self.persist(&next)?;
        *links = next;

        info!(account, "download link consumed");
        Ok((path, filename))
    }

    /// Returns the live link count (test and observability aid).
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer mutex is poisoned.
    pub fn len(&self) -> ProvisionResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Returns whether no links are recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer mutex is poisoned.
    pub fn is_empty(&self) -> ProvisionResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn sweep_account(
        &self,
        links: &mut HashMap<String, DownloadLink>,
        account: &str,
        now: u64,
    ) {
        let dead: Vec<String> = links
            .values()
            .filter(|l| l.account == account && !l.usable_at(now))
            .map(|l| l.token.clone())
            .collect();
        for token in dead {
            if let Some(link) = links.remove(&token) {
                if let Err(err) = self.blobs.delete(&link.artifact_name) {
                    warn!(account, artifact = %link.artifact_name, %err, "failed to reclaim expired artifact");
                }
            }
        }
    }

    fn lock(&self) -> ProvisionResult<std::sync::MutexGuard<'_, HashMap<String, DownloadLink>>> {
        self.links
            .lock()
            .map_err(|_| ProvisionError::poisoned("link issuer"))
    }

    fn persist(&self, links: &HashMap<String, DownloadLink>) -> ProvisionResult<()> {
        let mut records: Vec<&DownloadLink> = links.values().collect();
        records.sort_by(|a, b| a.token.cmp(&b.token));
        let bytes = serde_json::to_vec_pretty(&records)
            .map_err(|e| ProvisionError::serialization(e.to_string()))?;
        self.blobs.write_atomic(LINKS_FILENAME, &bytes)?;
        Ok(())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn setup() -> (tempfile::TempDir, Arc<ManualClock>, LinkIssuer, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let issuer =
            LinkIssuer::open(dir.path().join("links"), Arc::clone(&clock) as _).expect("open");
        let source = dir.path().join("common-client.ovpn");
        std::fs::write(&source, b"client config bytes").expect("write source");
        (dir, clock, issuer, source)
    }

    #[test]
    fn test_issue_resolve_consume_once() {
        let (_dir, _clock, issuer, source) = setup();
        let issued = issuer.issue("alice", &source).expect("issue");
        assert_eq!(issued.public_filename, "alice.ovpn");
        assert_eq!(issued.expires_at, 1_000 + DEFAULT_LINK_TTL_SECS);

        let status = issuer.resolve(&issued.token).expect("resolve");
        let LinkStatus::Ready(path) = status else {
            panic!("expected ready link, got {status:?}");
        };
        assert_eq!(
            std::fs::read(&path).expect("read artifact"),
            b"client config bytes"
        );

        let (consumed_path, filename) = issuer.consume(&issued.token).expect("consume");
        assert_eq!(consumed_path, path);
        assert_eq!(filename, "alice.ovpn");

        // Single-use: second attempt is exhausted even before expiry.
        assert_eq!(
            issuer.resolve(&issued.token).expect("resolve"),
            LinkStatus::Exhausted
        );
        let err = issuer.consume(&issued.token).expect_err("second consume");
        assert!(matches!(err, ProvisionError::Gone { reason: "exhausted" }));
    }

    #[test]
    fn test_expiry_beats_consumption_count() {
        let (_dir, clock, issuer, source) = setup();
        let issued = issuer.issue("alice", &source).expect("issue");

        clock.advance(DEFAULT_LINK_TTL_SECS);
        assert_eq!(
            issuer.resolve(&issued.token).expect("resolve"),
            LinkStatus::Expired
        );
        let err = issuer.consume(&issued.token).expect_err("consume expired");
        assert!(matches!(err, ProvisionError::Gone { reason: "expired" }));
    }

    #[test]
    fn test_unknown_token_is_not_found() {
        let (_dir, _clock, issuer, _source) = setup();
        assert_eq!(
            issuer.resolve("deadbeef").expect("resolve"),
            LinkStatus::NotFound
        );
        let err = issuer.consume("deadbeef").expect_err("consume");
        assert!(matches!(err, ProvisionError::NotFound { .. }));
    }

    #[test]
    fn test_snapshot_is_immune_to_source_mutation() {
        let (_dir, _clock, issuer, source) = setup();
        let issued = issuer.issue("alice", &source).expect("issue");

        std::fs::write(&source, b"rotated server config").expect("mutate source");

        let (path, _) = issuer.consume(&issued.token).expect("consume");
        assert_eq!(
            std::fs::read(path).expect("read artifact"),
            b"client config bytes"
        );
    }

    #[test]
    fn test_issuance_sweeps_dead_links_of_same_account() {
        let (_dir, clock, issuer, source) = setup();
        let first = issuer.issue("alice", &source).expect("issue");
        clock.advance(DEFAULT_LINK_TTL_SECS + 1);

        let second = issuer.issue("alice", &source).expect("issue again");
        assert_eq!(issuer.len().expect("len"), 1);
        assert_eq!(
            issuer.resolve(&first.token).expect("resolve"),
            LinkStatus::NotFound
        );
        assert!(matches!(
            issuer.resolve(&second.token).expect("resolve"),
            LinkStatus::Ready(_)
        ));
    }

    #[test]
    fn test_failed_persist_does_not_spend_the_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let links_dir = dir.path().join("links");
        let issuer = LinkIssuer::open(&links_dir, Arc::clone(&clock) as _).expect("open");
        let source = dir.path().join("src.ovpn");
        std::fs::write(&source, b"bytes").expect("write source");
        let issued = issuer.issue("alice", &source).expect("issue");

        // A directory squatting on the record file's temp path makes the
        // persist step fail.
        let blocker = links_dir.join("..links.json.tmp");
        std::fs::create_dir(&blocker).expect("blocker");
        issuer
            .consume(&issued.token)
            .expect_err("persist must fail");

        // No bytes were delivered, so the link is still usable.
        assert!(matches!(
            issuer.resolve(&issued.token).expect("resolve"),
            LinkStatus::Ready(_)
        ));

        std::fs::remove_dir(&blocker).expect("unblock");
        issuer.consume(&issued.token).expect("retry succeeds");
        assert_eq!(
            issuer.resolve(&issued.token).expect("resolve"),
            LinkStatus::Exhausted
        );
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        use std::sync::Arc as StdArc;

        let (_dir, _clock, issuer, source) = setup();
        let issued = issuer.issue("alice", &source).expect("issue");
        let issuer = StdArc::new(issuer);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let issuer = StdArc::clone(&issuer);
            let token = issued.token.clone();
            handles.push(std::thread::spawn(move || issuer.consume(&token).is_ok()));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .filter(|&ok| ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_links_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let source = dir.path().join("src.ovpn");
        std::fs::write(&source, b"bytes").expect("write source");

        let issuer =
            LinkIssuer::open(dir.path().join("links"), Arc::clone(&clock) as _).expect("open");
        let issued = issuer.issue("alice", &source).expect("issue");
        issuer.consume(&issued.token).expect("consume");
        drop(issuer);

        // A restart must not resurrect a consumed token.
        let reopened =
            LinkIssuer::open(dir.path().join("links"), Arc::clone(&clock) as _).expect("reopen");
        assert_eq!(
            reopened.resolve(&issued.token).expect("resolve"),
            LinkStatus::Exhausted
        );
    }
}
