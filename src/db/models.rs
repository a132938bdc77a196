// src/db/models.rs

//! Data models for Depot store records
//!
//! This module defines the records persisted in each bucket and provides
//! methods for creating, reading, updating, and deleting them inside a
//! transaction.

use crate::db::{Bucket, ReadTx, WriteTx, compound_key, compound_prefix};
use crate::error::Result;
use crate::packages::PackageMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A named repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Repository {
    /// Create a new Repository
    pub fn new(name: String) -> Self {
        Self {
            name,
            created_at: None,
        }
    }

    /// Insert this repository, stamping its creation time
    pub fn insert(&mut self, tx: &WriteTx<'_>) -> Result<()> {
        if self.created_at.is_none() {
            self.created_at = Some(current_timestamp());
        }
        tx.put_record(Bucket::Repos, &self.name, self)
    }

    /// Find a repository by name
    pub fn find_by_name(tx: &ReadTx<'_>, name: &str) -> Result<Option<Self>> {
        tx.get_record(Bucket::Repos, name)
    }

    pub fn exists(tx: &ReadTx<'_>, name: &str) -> Result<bool> {
        tx.contains(Bucket::Repos, name)
    }

    /// List all repository names in key order
    pub fn list_names(tx: &ReadTx<'_>) -> Result<Vec<String>> {
        tx.keys(Bucket::Repos)
    }

    /// Delete a repository record, returning whether it existed
    pub fn delete(tx: &WriteTx<'_>, name: &str) -> Result<bool> {
        tx.delete(Bucket::Repos, name)
    }
}

/// What a pool entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Package,
    Delta,
}

/// One immutable blob + metadata pair in the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub id: String,
    pub meta: PackageMetadata,
    pub sha256: String,
    pub size: u64,
    pub kind: EntryKind,
    /// Repositories currently referencing this entry
    #[serde(default)]
    pub refs: BTreeSet<String>,
    #[serde(default)]
    pub added_at: Option<String>,
}

impl PoolEntry {
    /// Create a new PoolEntry with no references
    pub fn new(id: String, meta: PackageMetadata, sha256: String, size: u64, kind: EntryKind) -> Self {
        Self {
            id,
            meta,
            sha256,
            size,
            kind,
            refs: BTreeSet::new(),
            added_at: None,
        }
    }

    /// Whether two entries describe the same blob and metadata
    ///
    /// References and timestamps are bookkeeping and do not take part.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.meta == other.meta
            && self.sha256 == other.sha256
            && self.size == other.size
            && self.kind == other.kind
    }

    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    /// Find an entry by package id
    pub fn find_by_id(tx: &ReadTx<'_>, id: &str) -> Result<Option<Self>> {
        tx.get_record(Bucket::Pool, id)
    }

    /// List every pool entry
    pub fn list_all(tx: &ReadTx<'_>) -> Result<Vec<Self>> {
        tx.records(Bucket::Pool)
    }

    /// Insert or update this entry
    pub fn save(&mut self, tx: &WriteTx<'_>) -> Result<()> {
        if self.added_at.is_none() {
            self.added_at = Some(current_timestamp());
        }
        tx.put_record(Bucket::Pool, &self.id, self)
    }

    pub fn delete(tx: &WriteTx<'_>, id: &str) -> Result<bool> {
        tx.delete(Bucket::Pool, id)
    }
}

/// Persisted record of a requested delta computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaInformation {
    pub delta_id: String,
    pub old_package_id: String,
    pub new_package_id: String,
    /// Location of the finished artifact, set once computation succeeded
    #[serde(default)]
    pub delta_path: Option<String>,
    /// Permanent once true
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl DeltaInformation {
    /// Create a new DeltaInformation for a pair of packages
    pub fn new(delta_id: String, old_package_id: String, new_package_id: String) -> Self {
        Self {
            delta_id,
            old_package_id,
            new_package_id,
            delta_path: None,
            failed: false,
            created_at: None,
            updated_at: None,
        }
    }

    /// Find a delta record by id
    pub fn find_by_id(tx: &ReadTx<'_>, delta_id: &str) -> Result<Option<Self>> {
        tx.get_record(Bucket::Deltas, delta_id)
    }

    /// List every delta record
    pub fn list_all(tx: &ReadTx<'_>) -> Result<Vec<Self>> {
        tx.records(Bucket::Deltas)
    }

    /// Insert or update this record, refreshing its timestamps
    pub fn save(&mut self, tx: &WriteTx<'_>) -> Result<()> {
        let now = current_timestamp();
        if self.created_at.is_none() {
            self.created_at = Some(now.clone());
        }
        self.updated_at = Some(now);
        tx.put_record(Bucket::Deltas, &self.delta_id, self)
    }

    pub fn delete(tx: &WriteTx<'_>, delta_id: &str) -> Result<bool> {
        tx.delete(Bucket::Deltas, delta_id)
    }
}

/// Association of a pool package with a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLink {
    pub repo: String,
    pub package_id: String,
}

impl PackageLink {
    pub fn new(repo: &str, package_id: &str) -> Self {
        Self {
            repo: repo.to_string(),
            package_id: package_id.to_string(),
        }
    }

    fn key(&self) -> String {
        compound_key(&[&self.repo, &self.package_id])
    }

    pub fn insert(&self, tx: &WriteTx<'_>) -> Result<()> {
        tx.put_record(Bucket::RepoPackages, &self.key(), self)
    }

    pub fn exists(tx: &ReadTx<'_>, repo: &str, package_id: &str) -> Result<bool> {
        tx.contains(Bucket::RepoPackages, &compound_key(&[repo, package_id]))
    }

    /// All packages linked into `repo`
    pub fn find_by_repo(tx: &ReadTx<'_>, repo: &str) -> Result<Vec<Self>> {
        tx.records_with_prefix(Bucket::RepoPackages, &compound_prefix(&[repo]))
    }

    /// Remove every package link of `repo`
    pub fn delete_by_repo(tx: &WriteTx<'_>, repo: &str) -> Result<usize> {
        tx.delete_prefix(Bucket::RepoPackages, &compound_prefix(&[repo]))
    }
}

/// Association of a delta package with a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaLink {
    pub repo: String,
    /// Package the delta upgrades to
    pub package_id: String,
    pub delta_id: String,
    /// Pool id of the delta artifact
    pub delta_entry_id: String,
}

impl DeltaLink {
    pub fn new(repo: &str, package_id: &str, delta_id: &str, delta_entry_id: &str) -> Self {
        Self {
            repo: repo.to_string(),
            package_id: package_id.to_string(),
            delta_id: delta_id.to_string(),
            delta_entry_id: delta_entry_id.to_string(),
        }
    }

    fn key(&self) -> String {
        compound_key(&[&self.repo, &self.package_id, &self.delta_entry_id])
    }

    pub fn insert(&self, tx: &WriteTx<'_>) -> Result<()> {
        tx.put_record(Bucket::RepoDeltas, &self.key(), self)
    }

    pub fn exists(
        tx: &ReadTx<'_>,
        repo: &str,
        package_id: &str,
        delta_entry_id: &str,
    ) -> Result<bool> {
        tx.contains(
            Bucket::RepoDeltas,
            &compound_key(&[repo, package_id, delta_entry_id]),
        )
    }

    /// All delta links of `repo`
    pub fn find_by_repo(tx: &ReadTx<'_>, repo: &str) -> Result<Vec<Self>> {
        tx.records_with_prefix(Bucket::RepoDeltas, &compound_prefix(&[repo]))
    }

    /// Remove every delta link of `repo`
    pub fn delete_by_repo(tx: &WriteTx<'_>, repo: &str) -> Result<usize> {
        tx.delete_prefix(Bucket::RepoDeltas, &compound_prefix(&[repo]))
    }
}

/// One package build as published in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub meta: PackageMetadata,
    /// Pool ids of the deltas upgrading to this build
    #[serde(default)]
    pub deltas: Vec<String>,
}

/// Published index of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub repo: String,
    pub generated_at: String,
    /// Package name → builds, newest first
    pub packages: BTreeMap<String, Vec<IndexEntry>>,
}

impl RepositoryIndex {
    pub fn new(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            generated_at: current_timestamp(),
            packages: BTreeMap::new(),
        }
    }

    pub fn find_by_repo(tx: &ReadTx<'_>, repo: &str) -> Result<Option<Self>> {
        tx.get_record(Bucket::Index, repo)
    }

    /// Replace the published index of this repository
    pub fn save(&self, tx: &WriteTx<'_>) -> Result<()> {
        tx.put_record(Bucket::Index, &self.repo, self)
    }

    pub fn delete(tx: &WriteTx<'_>, repo: &str) -> Result<bool> {
        tx.delete(Bucket::Index, repo)
    }
}
