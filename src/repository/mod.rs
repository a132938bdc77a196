// src/repository/mod.rs

//! Repository package sets
//!
//! This module provides functionality for:
//! - Creating repositories through the [`RepositoryDirectory`]
//! - Importing package batches into the pool and linking them to a repository
//! - Rebuilding the published index of a repository
//! - Requesting and importing delta packages for a repository

pub mod directory;

pub use directory::{RepositoryDirectory, validate_name};

use crate::db::models::{
    DeltaInformation, DeltaLink, EntryKind, IndexEntry, PackageLink, PoolEntry, Repository,
    RepositoryIndex,
};
use crate::db::{Bucket, ReadTx, Store, WriteTx};
use crate::delta::{self, DeltaEngine};
use crate::error::{Error, Result};
use crate::packages::{MetadataReader, PackageMetadata};
use crate::pool::{self, ImportCandidate, Pool};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Order builds of one package newest first
///
/// Release descending, then version descending, then architecture and id
/// ascending so that the order is total.
pub fn newest_first(a: &IndexEntry, b: &IndexEntry) -> std::cmp::Ordering {
    b.meta
        .cmp_version(&a.meta)
        .then_with(|| a.meta.architecture.cmp(&b.meta.architecture))
        .then_with(|| a.id.cmp(&b.id))
}

fn require_repo(tx: &ReadTx<'_>, repo: &str) -> Result<()> {
    if Repository::exists(tx, repo)? {
        Ok(())
    } else {
        Err(Error::NotFound(repo.to_string()))
    }
}

fn require_linked(tx: &ReadTx<'_>, repo: &str, package_id: &str) -> Result<PoolEntry> {
    if !PackageLink::exists(tx, repo, package_id)? {
        return Err(Error::NotFound(format!("{} in {}", package_id, repo)));
    }
    PoolEntry::find_by_id(tx, package_id)?.ok_or_else(|| Error::NotFound(package_id.to_string()))
}

/// Rebuild the index of `repo` from its links inside an open transaction
pub(crate) fn index_in(tx: &WriteTx<'_>, repo: &str) -> Result<RepositoryIndex> {
    require_repo(tx, repo)?;

    let mut deltas: HashMap<String, Vec<String>> = HashMap::new();
    for link in DeltaLink::find_by_repo(tx, repo)? {
        deltas.entry(link.package_id).or_default().push(link.delta_entry_id);
    }

    let mut packages: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
    for link in PackageLink::find_by_repo(tx, repo)? {
        let entry = PoolEntry::find_by_id(tx, &link.package_id)?.ok_or_else(|| Error::Corrupt {
            bucket: Bucket::RepoPackages.as_str().to_string(),
            key: link.package_id.clone(),
            reason: "linked package is missing from the pool".to_string(),
        })?;

        let mut entry_deltas = deltas.remove(&entry.id).unwrap_or_default();
        entry_deltas.sort();
        packages
            .entry(entry.meta.name.clone())
            .or_default()
            .push(IndexEntry {
                id: entry.id,
                meta: entry.meta,
                deltas: entry_deltas,
            });
    }

    for builds in packages.values_mut() {
        builds.sort_by(newest_first);
    }

    let mut index = RepositoryIndex::new(repo);
    index.packages = packages;
    index.save(tx)?;
    debug!("Indexed {}: {} package names", repo, index.packages.len());
    Ok(index)
}

/// Repository operations over the shared store, pool and delta engine
pub struct Repositories {
    store: Arc<Store>,
    directory: RepositoryDirectory,
    pool: Arc<Pool>,
    deltas: Arc<DeltaEngine>,
    reader: Arc<dyn MetadataReader>,
}

impl Repositories {
    pub fn new(
        store: Arc<Store>,
        pool: Arc<Pool>,
        deltas: Arc<DeltaEngine>,
        reader: Arc<dyn MetadataReader>,
    ) -> Self {
        let directory = RepositoryDirectory::new(Arc::clone(&store), Arc::clone(&pool));
        Self {
            store,
            directory,
            pool,
            deltas,
            reader,
        }
    }

    pub fn directory(&self) -> &RepositoryDirectory {
        &self.directory
    }

    /// Create a repository and publish its (empty) index
    ///
    /// When indexing fails the repository record has already been committed;
    /// the error is still returned so the caller can retry indexing alone.
    pub fn create_repo(&self, name: &str) -> Result<Repository> {
        let repo = self.directory.create(name)?;
        self.index(&repo)?;
        Ok(repo)
    }

    /// Rebuild the published index of a repository
    pub fn index(&self, repo: &Repository) -> Result<()> {
        let index = self.store.update(|tx| index_in(tx, &repo.name))?;
        info!(
            "Rebuilt index of {} ({} package names)",
            repo.name,
            index.packages.len()
        );
        Ok(())
    }

    /// Published index of a repository, if it was ever built
    pub fn get_index(&self, repo: &Repository) -> Result<Option<RepositoryIndex>> {
        self.store
            .view(|tx| RepositoryIndex::find_by_repo(tx, &repo.name))
    }

    /// Distinct package names in the published index, sorted
    pub fn get_package_names(&self, repo: &Repository) -> Result<Vec<String>> {
        Ok(self
            .get_index(repo)?
            .map(|index| index.packages.into_keys().collect())
            .unwrap_or_default())
    }

    /// Every indexed build of `name`, newest first
    pub fn get_packages(&self, repo: &Repository, name: &str) -> Result<Vec<PackageMetadata>> {
        Ok(self
            .get_index(repo)?
            .and_then(|mut index| index.packages.remove(name))
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.meta)
            .collect())
    }

    /// Import a batch of package files into the pool and link them to `repo`
    ///
    /// The batch is all-or-nothing: metadata is read and every file hashed
    /// before anything is written, then the pool entries, links and the new
    /// index are committed in one transaction. Returns the package ids.
    pub fn add_packages(&self, repo: &Repository, paths: &[PathBuf]) -> Result<Vec<String>> {
        info!("Adding {} packages to {}", paths.len(), repo.name);

        let prepared = paths
            .par_iter()
            .map(|path| {
                let id = pool::package_id(path)?;
                let meta = self.reader.read(path)?;
                ImportCandidate::prepare(&id, meta, path, EntryKind::Package)
            })
            .collect::<Result<Vec<_>>>()?;

        // The same id twice in one batch must carry the same content
        let mut batch: BTreeMap<String, ImportCandidate> = BTreeMap::new();
        for candidate in prepared {
            match batch.get(&candidate.id) {
                Some(seen) if seen.sha256 != candidate.sha256 || seen.meta != candidate.meta => {
                    return Err(Error::Conflict(candidate.id));
                }
                Some(_) => continue,
                None => {
                    batch.insert(candidate.id.clone(), candidate);
                }
            }
        }

        self.store.update(|tx| {
            require_repo(tx, &repo.name)?;
            for candidate in batch.values() {
                self.pool.put_entry_in(tx, candidate)?;
                self.pool.add_ref_in(tx, &candidate.id, &repo.name)?;
                PackageLink::new(&repo.name, &candidate.id).insert(tx)?;
            }
            index_in(tx, &repo.name)?;
            Ok(())
        })?;

        info!("Added {} packages to {}", batch.len(), repo.name);
        Ok(batch.into_keys().collect())
    }

    /// Produce the delta between two packages linked into `repo`
    pub fn create_delta(&self, repo: &Repository, old_id: &str, new_id: &str) -> Result<PathBuf> {
        let (old, new) = self.store.view(|tx| {
            require_repo(tx, &repo.name)?;
            Ok((
                require_linked(tx, &repo.name, old_id)?,
                require_linked(tx, &repo.name, new_id)?,
            ))
        })?;
        self.deltas.create_delta(&old, &new)
    }

    /// Whether `repo` already carries the delta at `delta_path` for `package_id`
    pub fn has_delta(&self, repo: &Repository, package_id: &str, delta_path: &str) -> Result<bool> {
        self.deltas.has_delta(&repo.name, package_id, delta_path)
    }

    /// Import a computed delta package into the pool and link it to `repo`
    pub fn add_delta(&self, repo: &Repository, delta_path: &Path, info: &DeltaInformation) -> Result<()> {
        let expected = delta::delta_id(&info.old_package_id, &info.new_package_id);
        if info.delta_id != expected {
            return Err(Error::InvalidPair(format!(
                "delta id {} does not belong to {} -> {}",
                info.delta_id, info.old_package_id, info.new_package_id
            )));
        }
        if info.failed || self.pool.get_delta_failed(&info.delta_id)? {
            return Err(Error::PreviouslyFailed(info.delta_id.clone()));
        }

        let entry_id = pool::package_id(delta_path)?;
        let target = self
            .store
            .view(|tx| require_linked(tx, &repo.name, &info.new_package_id))?;
        let candidate = ImportCandidate::prepare(&entry_id, target.meta, delta_path, EntryKind::Delta)?;

        self.store.update(|tx| {
            require_linked(tx, &repo.name, &info.new_package_id)?;
            self.pool.put_entry_in(tx, &candidate)?;
            self.pool.add_ref_in(tx, &entry_id, &repo.name)?;
            DeltaLink::new(&repo.name, &info.new_package_id, &info.delta_id, &entry_id).insert(tx)?;
            index_in(tx, &repo.name)?;
            Ok(())
        })?;

        info!("Added delta {} to {}", entry_id, repo.name);
        Ok(())
    }
}
