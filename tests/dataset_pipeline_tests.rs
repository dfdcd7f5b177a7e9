//! End-to-end dataset tests: annotation files on disk through indexing,
//! splitting, and sample loading.

use image::{Rgb, RgbImage};
use std::fs;
use tempfile::TempDir;

use pipit::dataset::{index_dataset, Split, BBOXES_FILE, IMAGES_FILE, LABELS_FILE, SPLIT_FILE};
use pipit::loader::{filter_valid, load_sample, ImageSource, SENTINEL_LABEL};

/// Lay out a tiny CUB-style dataset: two species, one image each, one broken
/// reference, one invalid label.
fn write_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let images_dir = dir.path().join("images");
    fs::create_dir_all(images_dir.join("001.Albatross")).unwrap();
    fs::create_dir_all(images_dir.join("002.Goldfinch")).unwrap();

    RgbImage::from_pixel(24, 24, Rgb([180, 40, 40]))
        .save(images_dir.join("001.Albatross/a1.png"))
        .unwrap();
    RgbImage::from_pixel(24, 24, Rgb([40, 180, 40]))
        .save(images_dir.join("002.Goldfinch/g1.png"))
        .unwrap();

    fs::write(
        dir.path().join(IMAGES_FILE),
        "1 001.Albatross/a1.png\n\
         2 002.Goldfinch/g1.png\n\
         3 003.Missing/m1.png\n\
         4 001.Albatross/a1.png\n",
    )
    .unwrap();
    fs::write(
        dir.path().join(LABELS_FILE),
        "1 1\n2 2\n3 1\n4 900\n", // sample 4 is out of range for 200 classes
    )
    .unwrap();
    fs::write(
        dir.path().join(BBOXES_FILE),
        "1 4 4 16 16\n2 2 2\n3 4 4 16 16\n4 4 4 16 16\n", // sample 2 is malformed
    )
    .unwrap();
    fs::write(dir.path().join(SPLIT_FILE), "1 1\n2 0\n3 1\n4 1\n").unwrap();

    dir
}

#[test]
fn split_map_routes_samples_to_their_subsets() {
    let dir = write_fixture();
    let index = index_dataset(dir.path(), 200).unwrap();

    let (train, test) = index.partition();
    let train_ids: Vec<u32> = train.iter().map(|r| r.id).collect();
    let test_ids: Vec<u32> = test.iter().map(|r| r.id).collect();

    assert_eq!(train_ids, vec![1, 3]);
    assert_eq!(test_ids, vec![2]);
}

#[test]
fn invalid_label_drops_image_and_box_together() {
    let dir = write_fixture();
    let index = index_dataset(dir.path(), 200).unwrap();

    assert_eq!(index.stats.total, 4);
    assert_eq!(index.stats.valid, 3);
    assert_eq!(index.stats.skipped, 1);
    assert!(index.records.iter().all(|r| r.id != 4));
}

#[test]
fn malformed_box_loads_the_full_image() {
    let dir = write_fixture();
    let index = index_dataset(dir.path(), 200).unwrap();

    let sample2 = index.records.iter().find(|r| r.id == 2).unwrap();
    assert_eq!(sample2.bbox, None);
    assert_eq!(sample2.split, Split::Test);

    let source = ImageSource::Local(dir.path().join("images"));
    let loaded = load_sample(sample2, &source, 8);
    assert_eq!(loaded.label, 1);
    assert_eq!(loaded.pixels.len(), 3 * 8 * 8);
}

#[test]
fn unresolvable_sample_becomes_a_filtered_sentinel() {
    let dir = write_fixture();
    let index = index_dataset(dir.path(), 200).unwrap();
    let source = ImageSource::Local(dir.path().join("images"));

    // Sample 3 references an image that does not exist on disk.
    let sample3 = index.records.iter().find(|r| r.id == 3).unwrap();
    let loaded = load_sample(sample3, &source, 8);
    assert_eq!(loaded.label, SENTINEL_LABEL);

    // The sentinel never reaches a loss computation.
    let batch = vec![loaded];
    assert!(filter_valid(&batch, 200).is_empty());
}
