// src/manager.rs

//! Orchestration façade
//!
//! The [`Manager`] owns the single store handle and hands it to every
//! component at construction. Repository-scoped calls resolve the repository
//! through the directory each time; no repository handle is cached.

use crate::config::Layout;
use crate::db::Store;
use crate::db::models::{DeltaInformation, PoolEntry, Repository};
use crate::delta::{DeltaBackend, DeltaEngine, ZstdDelta};
use crate::error::Result;
use crate::packages::{FilenameReader, MetadataReader, PackageMetadata};
use crate::pool::{Pool, SweepReport};
use crate::repository::Repositories;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Entry point used by the control API and the command line
pub struct Manager {
    layout: Layout,
    store: Arc<Store>,
    pool: Arc<Pool>,
    deltas: Arc<DeltaEngine>,
    repos: Repositories,
}

impl Manager {
    /// Open (creating if needed) the state under `layout`
    pub fn open(
        layout: Layout,
        reader: Arc<dyn MetadataReader>,
        backend: Arc<dyn DeltaBackend>,
    ) -> Result<Self> {
        layout.ensure()?;

        let store = Arc::new(Store::open(layout.db_path())?);
        let pool = Arc::new(Pool::new(Arc::clone(&store), layout.pool_dir())?);
        let deltas = Arc::new(DeltaEngine::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            backend,
            layout.delta_dir(),
        )?);
        let repos = Repositories::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::clone(&deltas),
            reader,
        );

        info!("Opened depot at {}", layout.base_dir().display());
        Ok(Self {
            layout,
            store,
            pool,
            deltas,
            repos,
        })
    }

    /// Open with the file name metadata reader and the zstd delta backend
    pub fn open_default(layout: Layout) -> Result<Self> {
        Self::open(
            layout,
            Arc::new(FilenameReader::new()),
            Arc::new(ZstdDelta::default()),
        )
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Create a repository, then index it
    ///
    /// An indexing failure leaves the repository in place and is reported;
    /// indexing can then be retried on its own.
    pub fn create_repo(&self, id: &str) -> Result<()> {
        self.repos.create_repo(id)?;
        Ok(())
    }

    pub fn get_repo(&self, id: &str) -> Result<Repository> {
        self.repos.directory().get(id)
    }

    pub fn remove_repo(&self, id: &str) -> Result<()> {
        self.repos.directory().remove(id)
    }

    pub fn list_repos(&self) -> Result<Vec<String>> {
        self.repos.directory().list()
    }

    pub fn index(&self, id: &str) -> Result<()> {
        let repo = self.get_repo(id)?;
        self.repos.index(&repo)
    }

    pub fn get_package_names(&self, id: &str) -> Result<Vec<String>> {
        let repo = self.get_repo(id)?;
        self.repos.get_package_names(&repo)
    }

    pub fn get_packages(&self, id: &str, name: &str) -> Result<Vec<PackageMetadata>> {
        let repo = self.get_repo(id)?;
        self.repos.get_packages(&repo, name)
    }

    pub fn add_packages(&self, id: &str, paths: &[PathBuf]) -> Result<Vec<String>> {
        let repo = self.get_repo(id)?;
        self.repos.add_packages(&repo, paths)
    }

    pub fn create_delta(&self, id: &str, old_package_id: &str, new_package_id: &str) -> Result<PathBuf> {
        let repo = self.get_repo(id)?;
        self.repos.create_delta(&repo, old_package_id, new_package_id)
    }

    pub fn has_delta(&self, id: &str, package_id: &str, delta_path: &str) -> Result<bool> {
        let repo = self.get_repo(id)?;
        self.repos.has_delta(&repo, package_id, delta_path)
    }

    pub fn add_delta(&self, id: &str, delta_path: &Path, info: &DeltaInformation) -> Result<()> {
        let repo = self.get_repo(id)?;
        self.repos.add_delta(&repo, delta_path, info)
    }

    pub fn get_delta(&self, delta_id: &str) -> Result<Option<DeltaInformation>> {
        self.deltas.get_delta(delta_id)
    }

    pub fn mark_delta_failed(&self, delta_id: &str, info: &DeltaInformation) -> Result<()> {
        self.pool.mark_delta_failed(delta_id, info)
    }

    pub fn get_delta_failed(&self, delta_id: &str) -> Result<bool> {
        self.pool.get_delta_failed(delta_id)
    }

    /// Operator action allowing a failed delta to be attempted again
    pub fn clear_delta_failure(&self, delta_id: &str) -> Result<()> {
        self.pool.clear_delta_failure(delta_id)
    }

    /// Look up a pool entry by package id or by any path ending in it
    pub fn get_pool_entry(&self, package: &str) -> Result<PoolEntry> {
        let id = Path::new(package)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(package);
        self.pool.get_entry(id)
    }

    pub fn sweep_pool(&self) -> Result<SweepReport> {
        self.pool.sweep()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, Manager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::open_default(Layout::new(dir.path().join("state"))).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_open_creates_layout() {
        let (dir, manager) = create_test_manager();
        assert!(dir.path().join("state/depot.db").is_file());
        assert!(manager.layout().pool_dir().is_dir());
        assert!(manager.layout().delta_dir().is_dir());
    }

    #[test]
    fn test_repository_scoped_calls_resolve_every_time() {
        let (_dir, manager) = create_test_manager();
        manager.create_repo("shannon").unwrap();
        manager.remove_repo("shannon").unwrap();

        assert!(matches!(manager.index("shannon"), Err(Error::NotFound(_))));
        assert!(matches!(
            manager.get_package_names("shannon"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            manager.add_packages("shannon", &[]),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_get_pool_entry_accepts_paths() {
        let (dir, manager) = create_test_manager();
        manager.create_repo("shannon").unwrap();
        let path = dir.path().join("foo-1.0-1.eopkg");
        fs::write(&path, b"foo").unwrap();
        manager.add_packages("shannon", &[path]).unwrap();

        let by_id = manager.get_pool_entry("foo-1.0-1.eopkg").unwrap();
        let by_path = manager
            .get_pool_entry("/srv/incoming/foo-1.0-1.eopkg")
            .unwrap();
        assert_eq!(by_id, by_path);
        assert_eq!(by_id.meta.release, 1);
    }

    #[test]
    fn test_sweep_after_remove() {
        let (dir, manager) = create_test_manager();
        manager.create_repo("shannon").unwrap();
        let path = dir.path().join("foo-1.0-1.eopkg");
        fs::write(&path, b"foo").unwrap();
        manager.add_packages("shannon", &[path]).unwrap();

        // Removal alone keeps the pool entry
        manager.remove_repo("shannon").unwrap();
        assert!(manager.get_pool_entry("foo-1.0-1.eopkg").is_ok());

        let report = manager.sweep_pool().unwrap();
        assert_eq!(report.entries_removed, vec!["foo-1.0-1.eopkg".to_string()]);
        assert!(matches!(
            manager.get_pool_entry("foo-1.0-1.eopkg"),
            Err(Error::NotFound(_))
        ));
    }
}
