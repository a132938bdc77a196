// src/db/mod.rs

//! Transactional store for Depot
//!
//! An embedded key-value store over SQLite with named partitions
//! ("buckets"). This module handles:
//! - Store initialization and schema migration
//! - The single writer connection and the pool of read-only connections
//! - Read-write (`update`) and snapshot read (`view`) transactions
//! - Typed JSON record helpers used by every component above it

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{LockResult, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Maximum number of idle read connections kept around
const MAX_IDLE_READERS: usize = 8;

/// Separator used to build composite keys
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Named partitions of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Repository records keyed by name
    Repos,
    /// Pool entries keyed by package id
    Pool,
    /// Delta bookkeeping keyed by delta id
    Deltas,
    /// Repository → package associations
    RepoPackages,
    /// Repository → delta associations
    RepoDeltas,
    /// Published repository indexes keyed by repository name
    Index,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::Repos,
        Bucket::Pool,
        Bucket::Deltas,
        Bucket::RepoPackages,
        Bucket::RepoDeltas,
        Bucket::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Repos => "repos",
            Bucket::Pool => "pool",
            Bucket::Deltas => "deltas",
            Bucket::RepoPackages => "repo_packages",
            Bucket::RepoDeltas => "repo_deltas",
            Bucket::Index => "index",
        }
    }
}

/// Join key parts with [`KEY_SEPARATOR`]
pub fn compound_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Prefix matching every compound key that starts with `parts`
pub fn compound_prefix(parts: &[&str]) -> String {
    let mut prefix = compound_key(parts);
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Read access inside a transaction
///
/// Both snapshot views and write transactions hand out this type, so every
/// lookup helper is usable from either.
pub struct ReadTx<'a> {
    conn: &'a Connection,
}

impl<'a> ReadTx<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Fetch the raw value stored under `key`
    pub fn get(&self, bucket: Bucket, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM records WHERE bucket = ?1 AND key = ?2",
                params![bucket.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn contains(&self, bucket: Bucket, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM records WHERE bucket = ?1 AND key = ?2",
                params![bucket.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All keys of a bucket in key order
    pub fn keys(&self, bucket: Bucket) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM records WHERE bucket = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map([bucket.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// All key/value pairs of a bucket in key order
    pub fn scan(&self, bucket: Bucket) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM records WHERE bucket = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map([bucket.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Key/value pairs whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, bucket: Bucket, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, value FROM records
             WHERE bucket = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![bucket.as_str(), prefix], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Decode the record stored under `key`
    ///
    /// A value that does not decode is reported as [`Error::Corrupt`], never
    /// as a missing record.
    pub fn get_record<T: DeserializeOwned>(&self, bucket: Bucket, key: &str) -> Result<Option<T>> {
        match self.get(bucket, key)? {
            Some(raw) => decode(bucket, key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Decode every record of a bucket
    pub fn records<T: DeserializeOwned>(&self, bucket: Bucket) -> Result<Vec<T>> {
        self.scan(bucket)?
            .iter()
            .map(|(key, raw)| decode(bucket, key, raw))
            .collect()
    }

    /// Decode every record whose key starts with `prefix`
    pub fn records_with_prefix<T: DeserializeOwned>(
        &self,
        bucket: Bucket,
        prefix: &str,
    ) -> Result<Vec<T>> {
        self.scan_prefix(bucket, prefix)?
            .iter()
            .map(|(key, raw)| decode(bucket, key, raw))
            .collect()
    }
}

/// Write access inside an `update` transaction
pub struct WriteTx<'a> {
    read: ReadTx<'a>,
}

impl<'a> Deref for WriteTx<'a> {
    type Target = ReadTx<'a>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl WriteTx<'_> {
    /// Store a raw value, replacing any previous value
    pub fn put(&self, bucket: Bucket, key: &str, value: &[u8]) -> Result<()> {
        self.read.conn.execute(
            "INSERT INTO records (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(bucket, key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP",
            params![bucket.as_str(), key, value],
        )?;
        Ok(())
    }

    pub fn put_record<T: Serialize>(&self, bucket: Bucket, key: &str, record: &T) -> Result<()> {
        let raw = serde_json::to_vec(record).map_err(|e| Error::Corrupt {
            bucket: bucket.as_str().to_string(),
            key: key.to_string(),
            reason: format!("failed to encode record: {}", e),
        })?;
        self.put(bucket, key, &raw)
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&self, bucket: Bucket, key: &str) -> Result<bool> {
        let removed = self.read.conn.execute(
            "DELETE FROM records WHERE bucket = ?1 AND key = ?2",
            params![bucket.as_str(), key],
        )?;
        Ok(removed > 0)
    }

    /// Delete every key starting with `prefix`, returning how many went away
    pub fn delete_prefix(&self, bucket: Bucket, prefix: &str) -> Result<usize> {
        let removed = self.read.conn.execute(
            "DELETE FROM records WHERE bucket = ?1 AND substr(key, 1, length(?2)) = ?2",
            params![bucket.as_str(), prefix],
        )?;
        Ok(removed)
    }
}

fn decode<T: DeserializeOwned>(bucket: Bucket, key: &str, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| Error::Corrupt {
        bucket: bucket.as_str().to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Recover a guard from a poisoned mutex
///
/// A panic inside `update` drops its transaction, which rolls back, so the
/// connection behind the lock is still in a clean state.
pub(crate) fn relock<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Embedded transactional store
///
/// One writer at a time (the writer connection sits behind a mutex and every
/// write transaction is `BEGIN IMMEDIATE`), any number of concurrent readers
/// on their own read-only connections. WAL mode gives readers a consistent
/// snapshot that is unaffected by a concurrent writer.
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl Store {
    /// Open (or create) the store at `db_path`
    ///
    /// Creates parent directories, applies pending migrations and registers
    /// all buckets. Calling it on an existing store is safe.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        debug!("Opening store at: {}", db_path.display());

        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::InitError(format!("Failed to create store directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;

        // Set pragmas for better performance and reliability
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        schema::migrate(&conn)?;
        schema::register_buckets(&conn, &Bucket::ALL)?;

        info!("Store ready at {}", db_path.display());

        Ok(Self {
            path: db_path.to_path_buf(),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a single read-write transaction
    ///
    /// Commits iff `f` returns `Ok`. An error or a panic inside `f` rolls back
    /// every write it performed, across all buckets.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&WriteTx<'_>) -> Result<T>,
    {
        self.update_then(f, |_| Ok(()))
    }

    /// Like [`Store::update`], then run `then` once the commit succeeded
    ///
    /// `then` still holds the writer slot, so no other update can observe
    /// the committed state before it has finished. It never runs when the
    /// transaction rolls back.
    pub fn update_then<T, F, G>(&self, f: F, then: G) -> Result<T>
    where
        F: FnOnce(&WriteTx<'_>) -> Result<T>,
        G: FnOnce(&mut T) -> Result<()>,
    {
        let mut conn = relock(self.writer.lock());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut value = f(&WriteTx {
            read: ReadTx::new(&tx),
        })?;
        tx.commit()?;
        then(&mut value)?;
        Ok(value)
    }

    /// Run `f` against a consistent read-only snapshot
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTx<'_>) -> Result<T>,
    {
        let mut conn = self.acquire_reader()?;
        let value = {
            let tx = conn.transaction()?;
            let value = f(&ReadTx::new(&tx))?;
            tx.finish()?;
            value
        };
        self.release_reader(conn);
        Ok(value)
    }

    fn acquire_reader(&self) -> Result<Connection> {
        if let Some(conn) = relock(self.readers.lock()).pop() {
            return Ok(conn);
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        Ok(conn)
    }

    fn release_reader(&self, conn: Connection) {
        let mut idle = relock(self.readers.lock());
        if idle.len() < MAX_IDLE_READERS {
            idle.push(conn);
        }
    }
}
