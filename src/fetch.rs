//! Model fetcher: copies a serialized model from the object store to local disk.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

use crate::color_utils::symbols;
use crate::config::FetchConfig;
use crate::storage::ObjectStore;

/// Calculate MD5 hash of a file
pub fn calculate_md5(path: &Path) -> Result<String> {
    let contents = fs::read(path)?;
    Ok(calculate_md5_bytes(&contents))
}

/// Calculate MD5 hash of bytes
pub fn calculate_md5_bytes(bytes: &[u8]) -> String {
    let mut hasher = md5::Context::new();
    hasher.consume(bytes);
    format!("{:x}", hasher.compute())
}

/// Download the configured object and verify it when a checksum was given.
///
/// Any transport or authentication error propagates uncaught; there is no
/// retry. A checksum mismatch removes the downloaded file before erroring.
pub fn run_fetch(config: FetchConfig) -> Result<()> {
    let store = ObjectStore::new(&config.endpoint, &config.bucket)?;

    let bytes = store
        .download(&config.key, &config.dest)
        .with_context(|| format!("failed to fetch {}/{}", config.bucket, config.key))?;

    if let Some(expected) = &config.checksum {
        log::debug!("{} Verifying download checksum...", symbols::checking());
        let actual = calculate_md5(&config.dest)?;
        if &actual != expected {
            fs::remove_file(&config.dest)?;
            return Err(anyhow!(
                "downloaded object failed checksum verification (expected {expected}, got {actual})"
            ));
        }
        log::debug!("   Checksum OK: {actual}");
    }

    log::info!(
        "{} Downloaded {} from {} to {} ({bytes} bytes)",
        symbols::completed_successfully(),
        config.key,
        config.bucket,
        config.dest.display()
    );

    Ok(())
}
