// src/delta/zstd.rs

//! zstd "patch-from" delta backend
//!
//! The old package is used as a raw-content dictionary while compressing
//! the new package, so long runs shared between the two builds encode as
//! back-references. Applying the delta decompresses with the same
//! dictionary.

use crate::delta::DeltaBackend;
use crate::error::Result;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Default compression level for deltas
pub const DEFAULT_LEVEL: i32 = 12;

const MIN_WINDOW_LOG: u32 = 10;
const MAX_WINDOW_LOG: u32 = 30;

/// Delta backend built on zstd dictionary compression
#[derive(Debug, Clone, Copy)]
pub struct ZstdDelta {
    level: i32,
}

impl ZstdDelta {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdDelta {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

/// Smallest window spanning `size` bytes of dictionary plus input
fn window_log_for(size: u64) -> u32 {
    let needed = 64 - size.max(1).leading_zeros();
    needed.clamp(MIN_WINDOW_LOG, MAX_WINDOW_LOG)
}

impl DeltaBackend for ZstdDelta {
    fn compute(&self, old: &Path, new: &Path, out: &Path) -> Result<()> {
        let dictionary = fs::read(old)?;
        let new_size = fs::metadata(new)?.len();
        let window_log = window_log_for(new_size + dictionary.len() as u64);
        debug!(
            "zstd delta: dictionary {} bytes, target {} bytes, window log {}",
            dictionary.len(),
            new_size,
            window_log
        );

        let mut input = File::open(new)?;
        let output = BufWriter::new(File::create(out)?);

        let mut encoder = ::zstd::stream::write::Encoder::with_dictionary(output, self.level, &dictionary)?;
        encoder.include_checksum(true)?;
        encoder.long_distance_matching(true)?;
        encoder.window_log(window_log)?;

        io::copy(&mut input, &mut encoder)?;
        let mut output = encoder.finish()?;
        output.flush()?;
        Ok(())
    }

    fn apply(&self, old: &Path, delta: &Path, out: &Path) -> Result<()> {
        let dictionary = fs::read(old)?;
        let input = BufReader::new(File::open(delta)?);

        let mut decoder = ::zstd::stream::read::Decoder::with_dictionary(input, &dictionary)?;
        decoder.window_log_max(MAX_WINDOW_LOG)?;

        let mut output = BufWriter::new(File::create(out)?);
        io::copy(&mut decoder, &mut output)?;
        output.flush()?;
        Ok(())
    }
}
