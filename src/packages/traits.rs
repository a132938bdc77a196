// src/packages/traits.rs

//! Package metadata and the reader interface

use crate::error::Result;
use crate::version::compare_versions;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// Metadata describing one binary package
///
/// Supplied by a [`MetadataReader`]; Depot stores and compares it but never
/// changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    /// Monotonic build number of the package
    pub release: u32,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PackageMetadata {
    pub fn new(name: &str, version: &str, release: u32, architecture: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release,
            architecture: architecture.to_string(),
            summary: None,
        }
    }

    /// Order two builds of a package: release first, then version
    pub fn cmp_version(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| compare_versions(&self.version, &other.version))
    }

    /// Whether `other` is a build of the same logical package
    pub fn same_package(&self, other: &Self) -> bool {
        self.name == other.name && self.architecture == other.architecture
    }
}

/// Source of package metadata for package files
///
/// Implementations own the package container format; nothing else in Depot
/// parses package files.
pub trait MetadataReader: Send + Sync {
    /// Read the metadata of the package at `path`
    fn read(&self, path: &Path) -> Result<PackageMetadata>;
}
