// src/delta/mod.rs

//! Delta package engine
//!
//! Computes binary deltas between two builds of the same package and
//! remembers the outcome:
//! - A delta is identified by its (old package id, new package id) pair only,
//!   so every repository asking for it shares the same unit of work
//! - Failures are recorded permanently in the pool and are never retried
//! - Concurrent requests for the same delta wait for the first one instead of
//!   computing it twice
//! - Computation runs outside of any store transaction

pub mod zstd;

use crate::db::models::{DeltaInformation, DeltaLink, PoolEntry};
use crate::db::{Store, relock};
use crate::error::{Error, Result};
use crate::packages::PackageMetadata;
use crate::packages::eopkg::DELTA_SUFFIX;
use crate::pool::{self, Pool};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub use self::zstd::ZstdDelta;

/// Algorithm producing and applying binary deltas
pub trait DeltaBackend: Send + Sync {
    /// Write a delta turning `old` into `new` to `out`
    fn compute(&self, old: &Path, new: &Path, out: &Path) -> Result<()>;

    /// Rebuild the new package from `old` and a delta
    fn apply(&self, old: &Path, delta: &Path, out: &Path) -> Result<()> {
        let _ = (old, delta, out);
        Err(Error::Unimplemented(
            "this delta backend cannot apply deltas".to_string(),
        ))
    }
}

/// Identity of the delta between two packages
///
/// Depends on the package ids only, never on the requesting repository.
pub fn delta_id(old_package_id: &str, new_package_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(old_package_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(new_package_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Length of the delta id prefix carried in artifact names
const NAME_ID_LEN: usize = 16;

/// File name of the delta package between two builds
///
/// Builds sharing name and releases can still differ, so the name carries a
/// prefix of the delta id to stay unique per pair.
pub fn delta_file_name(old: &PackageMetadata, new: &PackageMetadata, delta_id: &str) -> String {
    let tag = delta_id.get(..NAME_ID_LEN).unwrap_or(delta_id);
    format!(
        "{}-{}-{}-{}-{}{}",
        new.name, old.release, new.release, tag, new.architecture, DELTA_SUFFIX
    )
}

/// Check that `old` can be upgraded to `new` with a delta
pub fn validate_pair(old: &PoolEntry, new: &PoolEntry) -> Result<()> {
    if !old.meta.same_package(&new.meta) {
        return Err(Error::InvalidPair(format!(
            "{} ({}) and {} ({}) are not the same package",
            old.meta.name, old.meta.architecture, new.meta.name, new.meta.architecture
        )));
    }
    if old.meta.cmp_version(&new.meta) != Ordering::Less {
        return Err(Error::InvalidPair(format!(
            "{} release {} does not precede release {}",
            new.meta.name, old.meta.release, new.meta.release
        )));
    }
    Ok(())
}

/// Computes and memoizes delta packages
pub struct DeltaEngine {
    store: Arc<Store>,
    pool: Arc<Pool>,
    backend: Arc<dyn DeltaBackend>,
    output_dir: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeltaEngine {
    pub fn new(
        store: Arc<Store>,
        pool: Arc<Pool>,
        backend: Arc<dyn DeltaBackend>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).map_err(|e| {
            Error::InitError(format!(
                "Failed to create delta directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            store,
            pool,
            backend,
            output_dir,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Produce the delta from `old` to `new`, returning the artifact path
    ///
    /// Fails with [`Error::InvalidPair`] before doing any work when the pair
    /// is not an upgrade, and with [`Error::PreviouslyFailed`] when the delta
    /// is already known to fail. A fresh failure is recorded before the error
    /// is returned.
    pub fn create_delta(&self, old: &PoolEntry, new: &PoolEntry) -> Result<PathBuf> {
        validate_pair(old, new)?;

        let id = delta_id(&old.id, &new.id);
        let slot = self.claim(&id);
        let result = {
            let _guard = relock(slot.lock());
            self.create_delta_exclusive(&id, old, new)
        };
        self.release(&id, slot);
        result
    }

    /// Look up the record of a delta
    pub fn get_delta(&self, delta_id: &str) -> Result<Option<DeltaInformation>> {
        self.store
            .view(|tx| DeltaInformation::find_by_id(tx, delta_id))
    }

    /// Whether `repo` already carries the delta at `delta_path` for `package_id`
    pub fn has_delta(&self, repo: &str, package_id: &str, delta_path: &str) -> Result<bool> {
        let delta_entry_id = pool::package_id(Path::new(delta_path))?;
        self.store
            .view(|tx| DeltaLink::exists(tx, repo, package_id, &delta_entry_id))
    }

    fn create_delta_exclusive(&self, id: &str, old: &PoolEntry, new: &PoolEntry) -> Result<PathBuf> {
        if self.pool.get_delta_failed(id)? {
            debug!("Delta {} previously failed, not retrying", id);
            return Err(Error::PreviouslyFailed(id.to_string()));
        }

        let existing = self.get_delta(id)?;
        if let Some(path) = existing.as_ref().and_then(|r| r.delta_path.as_ref()) {
            let path = PathBuf::from(path);
            if path.is_file() {
                debug!("Delta {} already available at {}", id, path.display());
                return Ok(path);
            }
        }

        let mut record = match existing {
            Some(record) => record,
            None => {
                let mut record =
                    DeltaInformation::new(id.to_string(), old.id.clone(), new.id.clone());
                self.store.update(|tx| record.save(tx))?;
                record
            }
        };

        // Missing blobs are a pool problem, not a property of this pair
        let old_blob = self.pool.entry_path(old);
        let new_blob = self.pool.entry_path(new);
        for blob in [&old_blob, &new_blob] {
            if !blob.is_file() {
                return Err(Error::NotFound(blob.display().to_string()));
            }
        }

        let out = self.output_dir.join(delta_file_name(&old.meta, &new.meta, id));
        info!("Computing delta {} -> {}", old.id, new.id);

        // Only verdicts about the pair are recorded as permanent
        match self.compute(&old_blob, &new_blob, new.size) {
            Ok(temp) => {
                temp.persist(&out).map_err(|e| Error::Io(e.error))?;
                record.delta_path = Some(out.display().to_string());
                self.store.update(|tx| record.save(tx))?;
                info!("Delta {} written to {}", id, out.display());
                Ok(out)
            }
            Err(Error::DeltaFailed { reason, .. }) => {
                warn!("Delta {} -> {} failed: {}", old.id, new.id, reason);
                self.pool.mark_delta_failed(id, &record)?;
                Err(Error::DeltaFailed {
                    delta_id: id.to_string(),
                    reason,
                })
            }
            Err(err) => {
                warn!(
                    "Delta {} -> {} not produced, failure not recorded: {}",
                    old.id, new.id, err
                );
                Err(err)
            }
        }
    }

    /// Run the backend into a temporary file in the output directory
    ///
    /// Returns [`Error::DeltaFailed`] only for verdicts about the pair: the
    /// backend rejecting it, or a delta that saves nothing.
    fn compute(&self, old_blob: &Path, new_blob: &Path, new_size: u64) -> Result<NamedTempFile> {
        let temp = NamedTempFile::new_in(&self.output_dir)?;
        self.backend.compute(old_blob, new_blob, temp.path())?;

        let delta_size = temp.as_file().metadata()?.len();
        if delta_size >= new_size {
            return Err(Error::DeltaFailed {
                delta_id: String::new(),
                reason: format!(
                    "delta ({} bytes) is not smaller than the package ({} bytes)",
                    delta_size, new_size
                ),
            });
        }

        Ok(temp)
    }

    fn claim(&self, id: &str) -> Arc<Mutex<()>> {
        let mut in_flight = relock(self.in_flight.lock());
        Arc::clone(in_flight.entry(id.to_string()).or_default())
    }

    fn release(&self, id: &str, slot: Arc<Mutex<()>>) {
        let mut in_flight = relock(self.in_flight.lock());
        drop(slot);
        if in_flight
            .get(id)
            .is_some_and(|remaining| Arc::strong_count(remaining) == 1)
        {
            in_flight.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Backend double that counts calls and writes the old build's first bytes
    struct CountingBackend {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingBackend {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    impl DeltaBackend for CountingBackend {
        fn compute(&self, old: &Path, _new: &Path, out: &Path) -> Result<()> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(Error::DeltaFailed {
                    delta_id: String::new(),
                    reason: "undiffable input".to_string(),
                });
            }
            let old = fs::read(old)?;
            fs::write(out, &old[..old.len().min(8)])?;
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        pool: Arc<Pool>,
        engine: DeltaEngine,
        backend: Arc<CountingBackend>,
    }

    fn fixture(backend: CountingBackend) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("depot.db")).unwrap());
        let pool = Arc::new(Pool::new(Arc::clone(&store), dir.path().join("pool")).unwrap());
        let backend = Arc::new(backend);
        let engine = DeltaEngine::new(
            store,
            Arc::clone(&pool),
            Arc::clone(&backend) as Arc<dyn DeltaBackend>,
            dir.path().join("deltas"),
        )
        .unwrap();
        Fixture {
            dir,
            pool,
            engine,
            backend,
        }
    }

    fn add(fx: &Fixture, id: &str, meta: PackageMetadata, content: &[u8]) -> PoolEntry {
        let path = fx.dir.path().join(id);
        fs::write(&path, content).unwrap();
        fx.pool.put_entry(id, meta, &path).unwrap()
    }

    fn pair(fx: &Fixture) -> (PoolEntry, PoolEntry) {
        let old = add(
            fx,
            "foo-1.0-1.eopkg",
            PackageMetadata::new("foo", "1.0", 1, "x86_64"),
            b"the first build of foo, padded out to be larger than a delta",
        );
        let new = add(
            fx,
            "foo-1.1-2.eopkg",
            PackageMetadata::new("foo", "1.1", 2, "x86_64"),
            b"the second build of foo, padded out to be larger than a delta",
        );
        (old, new)
    }

    #[test]
    fn test_delta_id_is_pure() {
        assert_eq!(delta_id("a", "b"), delta_id("a", "b"));
        assert_ne!(delta_id("a", "b"), delta_id("b", "a"));
        assert_ne!(delta_id("ab", "c"), delta_id("a", "bc"));
    }

    #[test]
    fn test_delta_file_name() {
        let old = PackageMetadata::new("nano", "2.7.4", 67, "x86_64");
        let new = PackageMetadata::new("nano", "2.7.5", 68, "x86_64");
        let id = delta_id("nano-2.7.4-67-1-x86_64.eopkg", "nano-2.7.5-68-1-x86_64.eopkg");
        assert_eq!(
            delta_file_name(&old, &new, &id),
            format!("nano-67-68-{}-x86_64.delta.eopkg", &id[..16])
        );
    }

    #[test]
    fn test_invalid_pairs_are_rejected_without_computing() {
        let fx = fixture(CountingBackend::new(false));
        let (old, new) = pair(&fx);
        let other = add(
            &fx,
            "bar-1.0-3.eopkg",
            PackageMetadata::new("bar", "1.0", 3, "x86_64"),
            b"bar",
        );

        assert!(matches!(fx.engine.create_delta(&old, &old), Err(Error::InvalidPair(_))));
        assert!(matches!(fx.engine.create_delta(&new, &old), Err(Error::InvalidPair(_))));
        assert!(matches!(fx.engine.create_delta(&old, &other), Err(Error::InvalidPair(_))));
        assert_eq!(fx.backend.calls(), 0);
    }

    #[test]
    fn test_successful_delta_is_memoized() {
        let fx = fixture(CountingBackend::new(false));
        let (old, new) = pair(&fx);

        let first = fx.engine.create_delta(&old, &new).unwrap();
        assert!(first.is_file());
        let id = delta_id(&old.id, &new.id);
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            delta_file_name(&old.meta, &new.meta, &id)
        );

        let second = fx.engine.create_delta(&old, &new).unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.backend.calls(), 1);

        let record = fx.engine.get_delta(&id).unwrap().unwrap();
        assert!(!record.failed);
        assert_eq!(record.delta_path, Some(first.display().to_string()));
    }

    #[test]
    fn test_failure_is_recorded_and_not_retried() {
        let fx = fixture(CountingBackend::new(true));
        let (old, new) = pair(&fx);
        let id = delta_id(&old.id, &new.id);

        assert!(matches!(
            fx.engine.create_delta(&old, &new),
            Err(Error::DeltaFailed { .. })
        ));
        assert!(fx.pool.get_delta_failed(&id).unwrap());

        assert!(matches!(
            fx.engine.create_delta(&old, &new),
            Err(Error::PreviouslyFailed(_))
        ));
        assert_eq!(fx.backend.calls(), 1);
    }

    #[test]
    fn test_pointless_delta_is_a_failure() {
        let fx = fixture(CountingBackend::new(false));
        let old = add(
            &fx,
            "tiny-1-1.eopkg",
            PackageMetadata::new("tiny", "1", 1, "x86_64"),
            b"a",
        );
        let new = add(
            &fx,
            "tiny-1-2.eopkg",
            PackageMetadata::new("tiny", "1", 2, "x86_64"),
            b"b",
        );

        assert!(matches!(
            fx.engine.create_delta(&old, &new),
            Err(Error::DeltaFailed { .. })
        ));
        assert!(fx.pool.get_delta_failed(&delta_id(&old.id, &new.id)).unwrap());
    }

    #[test]
    fn test_concurrent_requests_coalesce() {
        let mut backend = CountingBackend::new(false);
        backend.delay = Duration::from_millis(100);
        let fx = Arc::new(fixture(backend));
        let (old, new) = pair(&fx);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fx = Arc::clone(&fx);
                let (old, new) = (old.clone(), new.clone());
                thread::spawn(move || fx.engine.create_delta(&old, &new).unwrap())
            })
            .collect();

        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(fx.backend.calls(), 1);
        assert!(relock(fx.engine.in_flight.lock()).is_empty());
    }

    #[test]
    fn test_pairs_sharing_releases_get_distinct_artifacts() {
        let fx = fixture(CountingBackend::new(false));
        let meta = |version: &str, release: u32| PackageMetadata::new("foo", version, release, "x86_64");
        let first = add(&fx, "foo-1.0-1-1-x86_64.eopkg", meta("1.0", 1), b"AAAAAAAA first distro build");
        let second = add(&fx, "foo-1.0-1-2-x86_64.eopkg", meta("1.0", 1), b"BBBBBBBB second distro build");
        let new = add(&fx, "foo-1.1-2-1-x86_64.eopkg", meta("1.1", 2), b"the next release of foo, built once");

        let from_first = fx.engine.create_delta(&first, &new).unwrap();
        let from_second = fx.engine.create_delta(&second, &new).unwrap();
        assert_ne!(from_first, from_second);
        assert_eq!(fx.backend.calls(), 2);

        // The memoized artifact still belongs to its own pair
        let again = fx.engine.create_delta(&first, &new).unwrap();
        assert_eq!(again, from_first);
        assert_eq!(fs::read(&again).unwrap(), b"AAAAAAAA");
        assert_eq!(fs::read(&from_second).unwrap(), b"BBBBBBBB");
    }

    #[test]
    fn test_local_io_failure_is_not_recorded() {
        let fx = fixture(CountingBackend::new(false));
        let (old, new) = pair(&fx);
        let id = delta_id(&old.id, &new.id);

        fs::remove_dir_all(fx.engine.output_dir()).unwrap();
        assert!(matches!(
            fx.engine.create_delta(&old, &new),
            Err(Error::Io(_))
        ));
        assert!(!fx.pool.get_delta_failed(&id).unwrap());

        fs::create_dir_all(fx.engine.output_dir()).unwrap();
        let path = fx.engine.create_delta(&old, &new).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn test_has_delta_reads_repository_links() {
        let fx = fixture(CountingBackend::new(false));
        assert!(!fx
            .engine
            .has_delta("main", "foo-1.1-2.eopkg", "/tmp/foo-1-2-x86_64.delta.eopkg")
            .unwrap());

        fx.engine
            .store
            .update(|tx| {
                DeltaLink::new("main", "foo-1.1-2.eopkg", "d", "foo-1-2-x86_64.delta.eopkg")
                    .insert(tx)
            })
            .unwrap();
        assert!(fx
            .engine
            .has_delta("main", "foo-1.1-2.eopkg", "/tmp/foo-1-2-x86_64.delta.eopkg")
            .unwrap());
        assert!(!fx
            .engine
            .has_delta("other", "foo-1.1-2.eopkg", "/tmp/foo-1-2-x86_64.delta.eopkg")
            .unwrap());
    }
}
