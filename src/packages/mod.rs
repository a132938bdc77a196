// src/packages/mod.rs

//! Package metadata for Depot
//!
//! Depot never parses the package container format itself; it consumes
//! metadata through the `MetadataReader` trait.

pub mod eopkg;
pub mod traits;

pub use eopkg::FilenameReader;
pub use traits::{MetadataReader, PackageMetadata};
