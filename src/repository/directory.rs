// src/repository/directory.rs

//! Repository directory
//!
//! Maps repository names to repository records and enforces that names are
//! unique.

use crate::db::models::{DeltaLink, PackageLink, Repository, RepositoryIndex};
use crate::db::{KEY_SEPARATOR, Store};
use crate::error::{Error, Result};
use crate::pool::Pool;
use std::sync::Arc;
use tracing::{debug, info};

/// Check that a name can serve as a store key and a URL path segment
pub fn validate_name(name: &str) -> Result<()> {
    let bad_char = |c: char| c == '/' || c == KEY_SEPARATOR || c.is_whitespace() || c.is_control();
    if name.is_empty() || name == "." || name == ".." || name.chars().any(bad_char) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Registry of repositories by name
pub struct RepositoryDirectory {
    store: Arc<Store>,
    pool: Arc<Pool>,
}

impl RepositoryDirectory {
    pub fn new(store: Arc<Store>, pool: Arc<Pool>) -> Self {
        Self { store, pool }
    }

    /// Create a new repository
    pub fn create(&self, name: &str) -> Result<Repository> {
        validate_name(name)?;

        let repo = self.store.update(|tx| {
            // Check it doesn't already exist
            if Repository::exists(tx, name)? {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            let mut repo = Repository::new(name.to_string());
            repo.insert(tx)?;
            Ok(repo)
        })?;

        info!("Created repository: {}", name);
        Ok(repo)
    }

    /// Look up a repository by name
    pub fn get(&self, name: &str) -> Result<Repository> {
        self.store
            .view(|tx| Repository::find_by_name(tx, name))?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// List repository names, sorted by name
    pub fn list(&self) -> Result<Vec<String>> {
        self.store.view(|tx| Repository::list_names(tx))
    }

    /// Remove a repository together with everything it references
    ///
    /// The record, its package and delta links, its index and its references
    /// on pool entries go away in one transaction. Pool entries themselves stay
    /// until an explicit [`Pool::sweep`].
    pub fn remove(&self, name: &str) -> Result<()> {
        self.store.update(|tx| {
            if !Repository::delete(tx, name)? {
                return Err(Error::NotFound(name.to_string()));
            }
            let packages = PackageLink::delete_by_repo(tx, name)?;
            let deltas = DeltaLink::delete_by_repo(tx, name)?;
            RepositoryIndex::delete(tx, name)?;
            let released = self.pool.release_repo_in(tx, name)?;
            debug!(
                "Dropped {} package links, {} delta links, {} pool references of {}",
                packages, deltas, released, name
            );
            Ok(())
        })?;

        info!("Removed repository: {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_directory() -> (TempDir, RepositoryDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("depot.db")).unwrap());
        let pool = Arc::new(Pool::new(Arc::clone(&store), dir.path().join("pool")).unwrap());
        (dir, RepositoryDirectory::new(store, pool))
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, directory) = create_test_directory();

        let created = directory.create("shannon").unwrap();
        assert_eq!(created.name, "shannon");

        let found = directory.get("shannon").unwrap();
        assert_eq!(found.name, "shannon");
    }

    #[test]
    fn test_create_duplicate() {
        let (_dir, directory) = create_test_directory();

        directory.create("shannon").unwrap();
        let result = directory.create("shannon");
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_unknown_repository() {
        let (_dir, directory) = create_test_directory();

        assert!(matches!(directory.get("nope"), Err(Error::NotFound(_))));
        assert!(matches!(directory.remove("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_and_remove() {
        let (_dir, directory) = create_test_directory();

        directory.create("unstable").unwrap();
        directory.create("shannon").unwrap();
        assert_eq!(
            directory.list().unwrap(),
            vec!["shannon".to_string(), "unstable".to_string()]
        );

        directory.remove("unstable").unwrap();
        assert_eq!(directory.list().unwrap(), vec!["shannon".to_string()]);
        assert!(matches!(directory.get("unstable"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_corrupt_record_is_not_not_found() {
        let (_dir, directory) = create_test_directory();

        directory
            .store
            .update(|tx| tx.put(crate::db::Bucket::Repos, "broken", b"\xff\xfe"))
            .unwrap();
        assert!(matches!(directory.get("broken"), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_invalid_names() {
        let (_dir, directory) = create_test_directory();

        for name in ["", "a/b", "with space", "..", "tab\there"] {
            assert!(matches!(directory.create(name), Err(Error::InvalidName(_))));
        }
    }
}
