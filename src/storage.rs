//! Object-store client over plain HTTPS.
//!
//! Speaks the storage provider's HTTP surface directly: objects are read with
//! `GET {endpoint}/{bucket}/{key}` and written with the media-upload endpoint.
//! Authentication is a bearer token taken from `PIPIT_STORAGE_TOKEN` when set;
//! public buckets need none. There is no retry at this layer: transport and
//! status failures surface to the caller.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::color_utils::symbols;
use crate::progress::{add_progress_bar, remove_progress_bar};

/// Environment variable holding the bearer token for private buckets.
pub const TOKEN_ENV_VAR: &str = "PIPIT_STORAGE_TOKEN";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("object {key} is empty")]
    EmptyObject { key: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Client for a single bucket.
pub struct ObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl ObjectStore {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self, StorageError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| StorageError::Transport {
                url: endpoint.to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token: std::env::var(TOKEN_ENV_VAR).ok(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn get_response(&self, key: &str) -> Result<reqwest::blocking::Response, StorageError> {
        let url = self.object_url(key);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| StorageError::Transport {
            url: url.clone(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status { url, status });
        }

        Ok(response)
    }

    /// Read an object fully into memory.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(key);
        let response = self.get_response(key)?;
        let bytes = response
            .bytes()
            .map_err(|e| StorageError::Transport { url, source: e })?;
        Ok(bytes.to_vec())
    }

    /// Download an object to a local file.
    ///
    /// The body is streamed into a `.part` sibling and renamed into place only
    /// after the stream completes, so a failed download never leaves a partial
    /// destination file behind. Returns the number of bytes written.
    pub fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        log::info!(
            "{} Downloading {} from bucket {}",
            symbols::downloading(),
            key,
            self.bucket
        );

        let mut response = self.get_response(key)?;
        let content_length = response.content_length();

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let part_path = partial_path(dest);
        let result = stream_to_file(&mut response, &part_path, content_length);

        let downloaded = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&part_path);
                return Err(e);
            }
        };

        if downloaded == 0 {
            let _ = fs::remove_file(&part_path);
            return Err(StorageError::EmptyObject {
                key: key.to_string(),
            });
        }

        if let Some(expected) = content_length {
            if downloaded != expected {
                log::warn!(
                    "{}Size mismatch: expected {expected} bytes, got {downloaded} bytes",
                    symbols::warning()
                );
            }
        }

        fs::rename(&part_path, dest)?;
        log::debug!(
            "{} Object written to: {} ({downloaded} bytes)",
            symbols::save_file(),
            dest.display()
        );

        Ok(downloaded)
    }

    /// Upload a local file as an object. Returns the number of bytes sent.
    pub fn upload(&self, src: &Path, key: &str) -> Result<u64, StorageError> {
        let body = fs::read(src)?;
        let len = body.len() as u64;

        log::info!(
            "{} Uploading {} ({len} bytes) to bucket {} as {}",
            symbols::uploading(),
            src.display(),
            self.bucket,
            key
        );

        let url = format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket);
        let mut request = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| StorageError::Transport {
            url: url.clone(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status { url, status });
        }

        Ok(len)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn stream_to_file(
    response: &mut reqwest::blocking::Response,
    path: &Path,
    content_length: Option<u64>,
) -> Result<u64, StorageError> {
    let progress_bar = content_length.and_then(|length| {
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})")
            .ok()?
            .progress_chars("#> ");
        let pb = ProgressBar::new(length);
        pb.set_style(style);
        add_progress_bar(pb.clone());
        Some(pb)
    });

    let mut file = fs::File::create(path)?;
    let mut downloaded = 0u64;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        if let Some(pb) = &progress_bar {
            pb.set_position(downloaded);
        }
    }

    file.flush()?;
    file.sync_all()?;
    drop(file);

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
        remove_progress_bar(&pb);
    }

    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Port 9 (discard) is reserved and refused without network access, so the
    // request fails at the transport layer deterministically.
    const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/tmp/model.bin")),
            PathBuf::from("/tmp/model.bin.part")
        );
    }

    #[test]
    fn test_download_failure_leaves_no_partial_file() {
        let temp_dir = tempdir().unwrap();
        let dest = temp_dir.path().join("weights.bin");

        let store = ObjectStore::new(UNREACHABLE_ENDPOINT, "no-such-bucket").unwrap();
        let result = store.download("models/missing.bin", &dest);

        assert!(matches!(result, Err(StorageError::Transport { .. })));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[test]
    fn test_get_failure_is_transport_error() {
        let store = ObjectStore::new(UNREACHABLE_ENDPOINT, "no-such-bucket").unwrap();
        let result = store.get("models/missing.bin");
        assert!(matches!(result, Err(StorageError::Transport { .. })));
    }

    #[test]
    fn test_upload_missing_source_is_io_error() {
        let store = ObjectStore::new(UNREACHABLE_ENDPOINT, "bucket").unwrap();
        let result = store.upload(Path::new("/nonexistent/weights.bin"), "models/w.bin");
        assert!(matches!(result, Err(StorageError::Io(_))));
    }
}
