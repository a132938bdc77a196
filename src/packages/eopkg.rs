// src/packages/eopkg.rs

//! Metadata from eopkg file names
//!
//! eopkg files are named `name-version-release-distrorelease-arch.eopkg`.
//! A shorter `name-version-release.eopkg` form is also accepted, in which
//! case the architecture defaults to [`DEFAULT_ARCHITECTURE`].

use crate::error::{Error, Result};
use crate::packages::traits::{MetadataReader, PackageMetadata};
use std::path::Path;
use tracing::debug;

/// File extension of binary packages
pub const PACKAGE_SUFFIX: &str = ".eopkg";

/// File extension of delta packages
pub const DELTA_SUFFIX: &str = ".delta.eopkg";

/// Architecture assumed when the file name does not carry one
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Reads package metadata from the package's file name
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameReader;

impl FilenameReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse a bare file name
    pub fn parse_file_name(file_name: &str) -> Result<PackageMetadata> {
        let invalid = |reason: &str| Error::Metadata {
            path: file_name.to_string(),
            reason: reason.to_string(),
        };

        if file_name.ends_with(DELTA_SUFFIX) {
            return Err(invalid("delta packages carry no standalone metadata"));
        }
        let stem = file_name
            .strip_suffix(PACKAGE_SUFFIX)
            .ok_or_else(|| invalid("not an .eopkg file"))?;

        let parts: Vec<&str> = stem.split('-').collect();
        let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        // name-version-release-distrorelease-arch
        if parts.len() >= 5
            && !is_number(parts[parts.len() - 1])
            && is_number(parts[parts.len() - 2])
            && is_number(parts[parts.len() - 3])
        {
            let n = parts.len();
            let release = parts[n - 3]
                .parse()
                .map_err(|_| invalid("release out of range"))?;
            return Ok(PackageMetadata::new(
                &parts[..n - 4].join("-"),
                parts[n - 4],
                release,
                parts[n - 1],
            ));
        }

        // name-version-release
        if parts.len() >= 3 && is_number(parts[parts.len() - 1]) {
            let n = parts.len();
            let release = parts[n - 1]
                .parse()
                .map_err(|_| invalid("release out of range"))?;
            return Ok(PackageMetadata::new(
                &parts[..n - 2].join("-"),
                parts[n - 2],
                release,
                DEFAULT_ARCHITECTURE,
            ));
        }

        Err(invalid("file name does not follow name-version-release"))
    }
}

impl MetadataReader for FilenameReader {
    fn read(&self, path: &Path) -> Result<PackageMetadata> {
        debug!("Reading package metadata: {}", path.display());

        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Metadata {
                path: path.display().to_string(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;

        Self::parse_file_name(file_name)
    }
}
