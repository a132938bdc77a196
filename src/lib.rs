// src/lib.rs

//! Depot binary package repository core
//!
//! Named repositories of versioned packages over a shared, content-addressed
//! package pool, with memoized computation of delta packages between builds.
//!
//! # Architecture
//!
//! - Database-first: all state in one SQLite store, no config files
//! - Single writer: every mutation is one transaction, readers see snapshots
//! - Pool: package blobs deduplicated across repositories by package id
//! - Deltas: identified by their package pair, failures remembered forever

pub mod api;
pub mod config;
pub mod db;
pub mod delta;
mod error;
pub mod manager;
pub mod packages;
pub mod pool;
pub mod repository;
pub mod version;

pub use error::{Error, Result};
pub use manager::Manager;
