//! Dataset indexing for CUB-style annotation files.
//!
//! The dataset root holds four whitespace-delimited, line-oriented files, each
//! line carrying a leading 1-based sample id:
//!
//! - `images.txt`             — `<id> <relative image path>`
//! - `image_class_labels.txt` — `<id> <class, 1-based>`
//! - `bounding_boxes.txt`     — `<id> <x> <y> <w> <h>` (pixel units)
//! - `train_test_split.txt`   — `<id> <1 = train | 0 = test>`
//!
//! Indexing joins the four files by sample id into one combined record list,
//! so the per-file sequences can never fall out of alignment. A sample whose
//! label is out of range or unparsable is dropped entirely (its image and box
//! go with it); a malformed bounding box degrades to "use the full image".

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::color_utils::symbols;

pub const IMAGES_FILE: &str = "images.txt";
pub const LABELS_FILE: &str = "image_class_labels.txt";
pub const BBOXES_FILE: &str = "bounding_boxes.txt";
pub const SPLIT_FILE: &str = "train_test_split.txt";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read annotation file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable samples indexed under {}", root.display())]
    Empty { root: PathBuf },
}

/// Rectangular region of interest, (x, y, width, height) in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Train/test membership of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// One fully-joined dataset sample.
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub id: u32,
    pub image_path: String,
    /// `None` when the bounding-box record was malformed; the full image is used.
    pub bbox: Option<BoundingBox>,
    /// Validated zero-based class index, in `[0, num_classes)`.
    pub label: usize,
    pub split: Split,
}

/// Counters from an indexing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Label lines seen.
    pub total: usize,
    /// Samples that joined cleanly with a valid label.
    pub valid: usize,
    /// Samples dropped (bad label, unparsable line, or missing join partner).
    pub skipped: usize,
}

/// The indexed dataset: one combined record list plus the indexing counters.
#[derive(Debug)]
pub struct DatasetIndex {
    pub records: Vec<SampleRecord>,
    pub stats: IndexStats,
}

impl DatasetIndex {
    /// Partition records by split membership into (train, test).
    pub fn partition(&self) -> (Vec<&SampleRecord>, Vec<&SampleRecord>) {
        let train = self
            .records
            .iter()
            .filter(|r| r.split == Split::Train)
            .collect();
        let test = self
            .records
            .iter()
            .filter(|r| r.split == Split::Test)
            .collect();
        (train, test)
    }
}

/// Index the dataset under `root`, keeping only samples whose class index
/// falls in `[0, num_classes)` after the 1-based to 0-based shift.
pub fn index_dataset(root: &Path, num_classes: usize) -> Result<DatasetIndex, DatasetError> {
    let images = parse_paths(&read_annotation(&root.join(IMAGES_FILE))?);
    let bboxes = parse_bboxes(&read_annotation(&root.join(BBOXES_FILE))?);
    let split_map = parse_split(&read_annotation(&root.join(SPLIT_FILE))?);
    let labels = read_annotation(&root.join(LABELS_FILE))?;

    let mut records = Vec::new();
    let mut stats = IndexStats::default();

    // The label file drives the join: a sample without a usable label does
    // not exist, and its image and bounding box are discarded with it.
    for line in labels.lines() {
        if line.trim().is_empty() {
            continue;
        }
        stats.total += 1;

        let Some((id, rest)) = parse_id_line(line) else {
            log::warn!("{}Unparsable label line {line:?}. Skipping this sample.", symbols::warning());
            stats.skipped += 1;
            continue;
        };

        let raw_label = rest.split_whitespace().next().and_then(|s| s.parse::<i64>().ok());
        let Some(raw_label) = raw_label else {
            log::warn!(
                "{}Error parsing label for sample {id}. Skipping this sample.",
                symbols::warning()
            );
            stats.skipped += 1;
            continue;
        };

        // Labels are 1-based on disk.
        let label = raw_label - 1;
        if label < 0 || label >= num_classes as i64 {
            log::warn!(
                "{}Invalid label {label} for sample {id}. Skipping this sample.",
                symbols::warning()
            );
            stats.skipped += 1;
            continue;
        }

        let Some(image_path) = images.get(&id) else {
            log::warn!(
                "{}Sample {id} has no image entry. Skipping this sample.",
                symbols::warning()
            );
            stats.skipped += 1;
            continue;
        };

        let Some(split) = split_map.get(&id) else {
            log::warn!(
                "{}Sample {id} has no train/test assignment. Skipping this sample.",
                symbols::warning()
            );
            stats.skipped += 1;
            continue;
        };

        records.push(SampleRecord {
            id,
            image_path: image_path.clone(),
            bbox: bboxes.get(&id).copied().flatten(),
            label: label as usize,
            split: *split,
        });
        stats.valid += 1;
    }

    log::info!("Total samples: {}", stats.total);
    log::info!("Valid samples: {}", stats.valid);
    log::info!("Invalid samples skipped: {}", stats.skipped);

    if records.is_empty() {
        return Err(DatasetError::Empty {
            root: root.to_path_buf(),
        });
    }

    Ok(DatasetIndex { records, stats })
}

fn read_annotation(path: &Path) -> Result<String, DatasetError> {
    fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Split a line into its leading sample id and the remainder.
fn parse_id_line(line: &str) -> Option<(u32, &str)> {
    let trimmed = line.trim();
    let (id_str, rest) = trimmed.split_once(char::is_whitespace)?;
    let id = id_str.parse::<u32>().ok()?;
    Some((id, rest.trim_start()))
}

fn parse_paths(content: &str) -> HashMap<u32, String> {
    let mut paths = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_id_line(line) {
            Some((id, rest)) if !rest.is_empty() => {
                paths.insert(id, rest.to_string());
            }
            _ => log::warn!("{}Unparsable image line {line:?}", symbols::warning()),
        }
    }
    paths
}

fn parse_bboxes(content: &str) -> HashMap<u32, Option<BoundingBox>> {
    let mut bboxes = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((id, rest)) = parse_id_line(line) else {
            log::warn!("{}Unparsable bounding-box line {line:?}", symbols::warning());
            continue;
        };

        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 4 {
            log::warn!(
                "{}Invalid bounding box format for sample {id}. Using full image.",
                symbols::warning()
            );
            bboxes.insert(id, None);
            continue;
        }

        let parsed: Option<Vec<f32>> = fields[..4].iter().map(|f| f.parse::<f32>().ok()).collect();
        match parsed {
            Some(coords) => {
                bboxes.insert(
                    id,
                    Some(BoundingBox {
                        x: coords[0],
                        y: coords[1],
                        width: coords[2],
                        height: coords[3],
                    }),
                );
            }
            None => {
                log::warn!(
                    "{}Error parsing bounding box for sample {id}. Using full image.",
                    symbols::warning()
                );
                bboxes.insert(id, None);
            }
        }
    }
    bboxes
}

fn parse_split(content: &str) -> HashMap<u32, Split> {
    let mut split_map = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((id, rest)) = parse_id_line(line) else {
            log::warn!("{}Unparsable split line {line:?}", symbols::warning());
            continue;
        };
        match rest.split_whitespace().next() {
            Some("1") => {
                split_map.insert(id, Split::Train);
            }
            Some("0") => {
                split_map.insert(id, Split::Test);
            }
            _ => log::warn!(
                "{}Invalid train/test flag for sample {id}: {rest:?}",
                symbols::warning()
            ),
        }
    }
    split_map
}
