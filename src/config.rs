// src/config.rs

//! On-disk layout
//!
//! Depot keeps no configuration files: every path is derived from a single
//! base directory.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default base directory for the daemon's state
pub const DEFAULT_BASE_DIR: &str = "/var/lib/depot";

const DB_FILE: &str = "depot.db";
const POOL_DIR: &str = "pool";
const DELTA_DIR: &str = "deltas";

/// Paths used by a Depot instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Store database file
    pub fn db_path(&self) -> PathBuf {
        self.base.join(DB_FILE)
    }

    /// Content-addressed blob storage shared by all repositories
    pub fn pool_dir(&self) -> PathBuf {
        self.base.join(POOL_DIR)
    }

    /// Where freshly computed delta packages are written
    pub fn delta_dir(&self) -> PathBuf {
        self.base.join(DELTA_DIR)
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.base.clone(), self.pool_dir(), self.delta_dir()] {
            debug!("Ensuring directory {}", dir.display());
            fs::create_dir_all(&dir).map_err(|e| {
                Error::InitError(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}
