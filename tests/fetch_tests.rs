use std::path::PathBuf;
use tempfile::TempDir;

use pipit::config::{BaseConfig, FetchConfig};
use pipit::fetch::run_fetch;
use pipit::storage::{ObjectStore, StorageError};

/// Port 9 (discard) refuses connections without any network access, so the
/// request fails deterministically at the transport layer.
const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:9";

fn fetch_config(dest: PathBuf) -> FetchConfig {
    FetchConfig {
        base: BaseConfig::default(),
        bucket: "no-such-bucket".to_string(),
        key: "models/bird-vit-model.bin".to_string(),
        dest,
        endpoint: UNREACHABLE_ENDPOINT.to_string(),
        checksum: None,
    }
}

#[test]
fn fetch_failure_creates_no_partial_destination_file() {
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("bird-vit-model.bin");

    let result = run_fetch(fetch_config(dest.clone()));

    assert!(result.is_err());
    assert!(!dest.exists(), "destination must not exist after a failed fetch");

    // No leftovers of any kind in the destination directory.
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "no partial files may be left behind");
}

#[test]
fn fetch_failure_is_a_transport_error() {
    let store = ObjectStore::new(UNREACHABLE_ENDPOINT, "no-such-bucket").unwrap();
    let temp_dir = TempDir::new().unwrap();
    let dest = temp_dir.path().join("weights.bin");

    match store.download("models/missing.bin", &dest) {
        Err(StorageError::Transport { .. }) => {}
        other => panic!("expected a transport error, got {other:?}"),
    }
}
