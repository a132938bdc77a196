// src/pool.rs

//! Shared package pool
//!
//! This module provides:
//! - Content-addressed blob storage shared by every repository
//! - Pool entries (package id → metadata + blob) that are never changed once written
//! - The permanent delta failure cache
//! - An explicit mark-and-sweep of unreferenced entries and blobs

use crate::db::models::{DeltaInformation, EntryKind, PoolEntry};
use crate::db::{Store, WriteTx};
use crate::error::{Error, Result};
use crate::packages::PackageMetadata;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Derive the package id of a package file: its file name
pub fn package_id(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| Error::Metadata {
            path: path.display().to_string(),
            reason: "path has no usable file name".to_string(),
        })
}

/// Compute the SHA-256 and size of a file
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// A package file that has been read and hashed, ready to enter the pool
///
/// Preparing candidates does the expensive IO up front so that the write
/// transaction only compares records and copies missing blobs.
#[derive(Debug, Clone)]
pub struct ImportCandidate {
    pub id: String,
    pub meta: PackageMetadata,
    pub source: PathBuf,
    pub sha256: String,
    pub size: u64,
    pub kind: EntryKind,
}

impl ImportCandidate {
    pub fn prepare(id: &str, meta: PackageMetadata, source: &Path, kind: EntryKind) -> Result<Self> {
        let (sha256, size) = hash_file(source)?;
        debug!("Prepared {} ({} bytes, sha256 {})", id, size, sha256);
        Ok(Self {
            id: id.to_string(),
            meta,
            source: source.to_path_buf(),
            sha256,
            size,
            kind,
        })
    }

    fn to_entry(&self) -> PoolEntry {
        PoolEntry::new(
            self.id.clone(),
            self.meta.clone(),
            self.sha256.clone(),
            self.size,
            self.kind,
        )
    }
}

/// Outcome of a pool sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub entries_removed: Vec<String>,
    pub deltas_forgotten: usize,
    pub blobs_removed: usize,
    pub bytes_freed: u64,
}

/// Files a sweep unlinks once its transaction has committed
#[derive(Debug)]
enum Doomed {
    Blob { path: PathBuf, size: u64 },
    Artifact(PathBuf),
}

/// Content-addressed package pool
pub struct Pool {
    store: Arc<Store>,
    root: PathBuf,
}

impl Pool {
    /// Create a pool storing its blobs under `root`
    pub fn new(store: Arc<Store>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::InitError(format!("Failed to create pool directory {}: {}", root.display(), e))
        })?;
        Ok(Self { store, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the blob with the given digest
    pub fn blob_path(&self, sha256: &str) -> PathBuf {
        let fanout = sha256.get(..2).unwrap_or("00");
        self.root.join(fanout).join(sha256)
    }

    /// Location of an entry's blob
    pub fn entry_path(&self, entry: &PoolEntry) -> PathBuf {
        self.blob_path(&entry.sha256)
    }

    /// Look up a pool entry
    pub fn get_entry(&self, id: &str) -> Result<PoolEntry> {
        self.store
            .view(|tx| PoolEntry::find_by_id(tx, id))?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// List every pool entry
    pub fn entries(&self) -> Result<Vec<PoolEntry>> {
        self.store.view(|tx| PoolEntry::list_all(tx))
    }

    /// Add a package to the pool
    ///
    /// Succeeds without change when the id already holds identical content,
    /// fails with [`Error::Conflict`] when it holds something else.
    pub fn put_entry(&self, id: &str, meta: PackageMetadata, blob: &Path) -> Result<PoolEntry> {
        let candidate = ImportCandidate::prepare(id, meta, blob, EntryKind::Package)?;
        self.store.update(|tx| self.put_entry_in(tx, &candidate))
    }

    /// Add a prepared candidate inside an existing write transaction
    pub(crate) fn put_entry_in(&self, tx: &WriteTx<'_>, candidate: &ImportCandidate) -> Result<PoolEntry> {
        let wanted = candidate.to_entry();

        if let Some(existing) = PoolEntry::find_by_id(tx, &candidate.id)? {
            if !existing.same_content(&wanted) {
                warn!("Pool already holds different content for {}", candidate.id);
                return Err(Error::Conflict(candidate.id.clone()));
            }
            // Repair a blob lost outside of Depot's control
            if !self.entry_path(&existing).is_file() {
                self.store_blob(candidate)?;
            }
            debug!("Pool entry {} already present", candidate.id);
            return Ok(existing);
        }

        self.store_blob(candidate)?;
        let mut entry = wanted;
        entry.save(tx)?;
        info!("Added {} to the pool", entry.id);
        Ok(entry)
    }

    /// Copy a candidate's blob into content-addressed storage
    ///
    /// Runs while the caller holds the write transaction, which keeps blob
    /// writes ordered with [`Pool::sweep`].
    fn store_blob(&self, candidate: &ImportCandidate) -> Result<()> {
        let dest = self.blob_path(&candidate.sha256);
        if dest.is_file() {
            return Ok(());
        }

        let parent = dest
            .parent()
            .ok_or_else(|| Error::InitError(format!("Invalid blob path {}", dest.display())))?;
        fs::create_dir_all(parent)?;

        // Write to temporary file first, hashing what is actually copied
        let mut source = File::open(&candidate.source)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let read = source.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            temp.write_all(&buffer[..read])?;
        }
        temp.as_file().sync_all()?;

        let actual = format!("{:x}", hasher.finalize());
        if actual != candidate.sha256 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} changed while being imported", candidate.source.display()),
            )));
        }

        // Atomic rename from temp to final destination
        temp.persist(&dest).map_err(|e| Error::Io(e.error))?;
        debug!("Stored blob {}", dest.display());
        Ok(())
    }

    /// Record `repo` as referencing the entry `id`
    pub(crate) fn add_ref_in(&self, tx: &WriteTx<'_>, id: &str, repo: &str) -> Result<()> {
        let mut entry =
            PoolEntry::find_by_id(tx, id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        if entry.refs.insert(repo.to_string()) {
            entry.save(tx)?;
        }
        Ok(())
    }

    /// Drop every reference `repo` holds, returning how many entries changed
    pub(crate) fn release_repo_in(&self, tx: &WriteTx<'_>, repo: &str) -> Result<usize> {
        let mut released = 0;
        for mut entry in PoolEntry::list_all(tx)? {
            if entry.refs.remove(repo) {
                entry.save(tx)?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Permanently record that a delta cannot be produced
    ///
    /// Marking an already failed delta again is a no-op.
    pub fn mark_delta_failed(&self, delta_id: &str, info: &DeltaInformation) -> Result<()> {
        self.store
            .update(|tx| self.mark_delta_failed_in(tx, delta_id, info))
    }

    pub(crate) fn mark_delta_failed_in(
        &self,
        tx: &WriteTx<'_>,
        delta_id: &str,
        info: &DeltaInformation,
    ) -> Result<()> {
        let mut record = match DeltaInformation::find_by_id(tx, delta_id)? {
            Some(existing) if existing.failed => {
                debug!("Delta {} already marked as failed", delta_id);
                return Ok(());
            }
            Some(existing) => existing,
            None => DeltaInformation::new(
                delta_id.to_string(),
                info.old_package_id.clone(),
                info.new_package_id.clone(),
            ),
        };

        record.failed = true;
        record.delta_path = None;
        record.save(tx)?;
        warn!(
            "Delta {} ({} -> {}) marked as permanently failed",
            delta_id, record.old_package_id, record.new_package_id
        );
        Ok(())
    }

    /// Whether a delta is known to have failed
    ///
    /// `false` means "may be attempted", not "will succeed".
    pub fn get_delta_failed(&self, delta_id: &str) -> Result<bool> {
        let record = self
            .store
            .view(|tx| DeltaInformation::find_by_id(tx, delta_id))?;
        Ok(record.is_some_and(|r| r.failed))
    }

    /// Forget a recorded delta failure so the delta may be attempted again
    pub fn clear_delta_failure(&self, delta_id: &str) -> Result<()> {
        self.store.update(|tx| {
            match DeltaInformation::find_by_id(tx, delta_id)? {
                Some(record) if record.failed => {
                    DeltaInformation::delete(tx, delta_id)?;
                    info!("Cleared failure record for delta {}", delta_id);
                    Ok(())
                }
                _ => Err(Error::NotFound(delta_id.to_string())),
            }
        })
    }

    /// Remove unreferenced entries, their delta records and orphaned blobs
    ///
    /// Never runs implicitly; removing a repository only drops its references.
    /// A delta record is kept while either of its packages is still in the
    /// pool. Files are unlinked only after the transaction commits.
    pub fn sweep(&self) -> Result<SweepReport> {
        let (report, _) = self.store.update_then(
            |tx| {
                let mut report = SweepReport::default();

                let mut live = HashSet::new();
                let mut live_blobs = HashSet::new();
                for entry in PoolEntry::list_all(tx)? {
                    if entry.refs.is_empty() {
                        PoolEntry::delete(tx, &entry.id)?;
                        report.entries_removed.push(entry.id);
                    } else {
                        live_blobs.insert(entry.sha256.clone());
                        live.insert(entry.id);
                    }
                }

                let mut doomed = Vec::new();
                for record in DeltaInformation::list_all(tx)? {
                    if live.contains(&record.old_package_id)
                        || live.contains(&record.new_package_id)
                    {
                        continue;
                    }
                    DeltaInformation::delete(tx, &record.delta_id)?;
                    report.deltas_forgotten += 1;
                    if let Some(path) = record.delta_path {
                        doomed.push(Doomed::Artifact(PathBuf::from(path)));
                    }
                }

                doomed.extend(self.find_orphan_blobs(&live_blobs)?);
                Ok((report, doomed))
            },
            |(report, doomed): &mut (SweepReport, Vec<Doomed>)| {
                for target in doomed.drain(..) {
                    match target {
                        Doomed::Blob { path, size } => match fs::remove_file(&path) {
                            Ok(()) => {
                                debug!("Removed orphaned blob {}", path.display());
                                report.blobs_removed += 1;
                                report.bytes_freed += size;
                            }
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        },
                        Doomed::Artifact(path) => {
                            if let Err(e) = fs::remove_file(&path) {
                                if e.kind() != io::ErrorKind::NotFound {
                                    warn!("Failed to remove delta artifact {}: {}", path.display(), e);
                                }
                            }
                        }
                    }
                }
                Ok(())
            },
        )?;

        info!(
            "Pool sweep removed {} entries, {} delta records, {} blobs ({} bytes)",
            report.entries_removed.len(),
            report.deltas_forgotten,
            report.blobs_removed,
            report.bytes_freed
        );
        Ok(report)
    }

    fn find_orphan_blobs(&self, live: &HashSet<String>) -> Result<Vec<Doomed>> {
        let mut orphans = Vec::new();

        for fanout in fs::read_dir(&self.root)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            for blob in fs::read_dir(fanout.path())? {
                let blob = blob?;
                if live.contains(blob.file_name().to_string_lossy().as_ref()) {
                    continue;
                }
                let size = blob.metadata().map(|m| m.len()).unwrap_or(0);
                orphans.push(Doomed::Blob {
                    path: blob.path(),
                    size,
                });
            }
        }

        Ok(orphans)
    }
}
