//! Sample loading: resolves indexed records into normalized image tensors.
//!
//! Resolution is crop (when a box is present), resize, then ImageNet
//! normalization to CHW `f32`. Any per-sample read, decode, or crop error is
//! swallowed into a sentinel sample (blank image, label -1) so a bad file
//! never fails the batch; sentinels are filtered out before loss computation.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::PathBuf;

use crate::color_utils::symbols;
use crate::dataset::{BoundingBox, SampleRecord};
use crate::storage::ObjectStore;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Label carried by sentinel samples.
pub const SENTINEL_LABEL: i64 = -1;

/// Where sample images are read from.
pub enum ImageSource {
    /// Images under a local directory.
    Local(PathBuf),
    /// Images streamed from the object store under a key prefix.
    Store { store: ObjectStore, prefix: String },
}

impl ImageSource {
    fn read(&self, relative: &str) -> anyhow::Result<Vec<u8>> {
        match self {
            ImageSource::Local(root) => Ok(std::fs::read(root.join(relative))?),
            ImageSource::Store { store, prefix } => {
                let key = if prefix.is_empty() {
                    relative.to_string()
                } else {
                    format!("{}/{relative}", prefix.trim_end_matches('/'))
                };
                Ok(store.get(&key)?)
            }
        }
    }
}

/// A resolved sample: normalized CHW pixels plus its class label.
#[derive(Debug, Clone)]
pub struct LoadedSample {
    pub pixels: Vec<f32>,
    pub label: i64,
}

/// Resolve a record to a sample, substituting the sentinel on any error.
pub fn load_sample(record: &SampleRecord, source: &ImageSource, image_size: u32) -> LoadedSample {
    match try_load(record, source, image_size) {
        Ok(sample) => sample,
        Err(e) => {
            log::warn!(
                "{}Error loading image {}: {e}. Substituting blank sample.",
                symbols::warning(),
                record.image_path
            );
            sentinel_sample(image_size)
        }
    }
}

fn try_load(
    record: &SampleRecord,
    source: &ImageSource,
    image_size: u32,
) -> anyhow::Result<LoadedSample> {
    let bytes = source.read(&record.image_path)?;
    let img = image::load_from_memory(&bytes)?.to_rgb8();

    let img = match record.bbox {
        Some(bbox) => crop_to_box(img, bbox),
        None => img,
    };

    let resized = image::imageops::resize(&img, image_size, image_size, FilterType::Triangle);
    Ok(LoadedSample {
        pixels: normalize_chw(&resized),
        label: record.label as i64,
    })
}

/// Crop to the bounding box, clamped to the image bounds. A box that clamps
/// to nothing leaves the image uncropped.
fn crop_to_box(img: RgbImage, bbox: BoundingBox) -> RgbImage {
    let (width, height) = img.dimensions();
    let x = bbox.x.max(0.0) as u32;
    let y = bbox.y.max(0.0) as u32;
    if x >= width || y >= height {
        log::warn!(
            "{}Bounding box lies outside the image. Using full image.",
            symbols::warning()
        );
        return img;
    }

    let w = (bbox.width.max(0.0) as u32).min(width - x);
    let h = (bbox.height.max(0.0) as u32).min(height - y);
    if w == 0 || h == 0 {
        log::warn!(
            "{}Degenerate bounding box after clamping. Using full image.",
            symbols::warning()
        );
        return img;
    }

    image::imageops::crop_imm(&img, x, y, w, h).to_image()
}

/// Flatten an RGB image to normalized CHW floats.
fn normalize_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut pixels = Vec::with_capacity((3 * width * height) as usize);
    for c in 0..3usize {
        for y in 0..height {
            for x in 0..width {
                let v = img.get_pixel(x, y)[c] as f32 / 255.0;
                pixels.push((v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
            }
        }
    }
    pixels
}

/// The sentinel: a blank (black) image pushed through the same transform,
/// labeled -1.
pub fn sentinel_sample(image_size: u32) -> LoadedSample {
    let per_channel = (image_size * image_size) as usize;
    let mut pixels = Vec::with_capacity(3 * per_channel);
    for c in 0..3usize {
        let v = (0.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        pixels.extend(std::iter::repeat(v).take(per_channel));
    }
    LoadedSample {
        pixels,
        label: SENTINEL_LABEL,
    }
}

/// Keep only samples whose label is a real class index.
pub fn filter_valid(samples: &[LoadedSample], num_classes: usize) -> Vec<&LoadedSample> {
    samples
        .iter()
        .filter(|s| s.label >= 0 && (s.label as usize) < num_classes)
        .collect()
}

/// Stack loaded samples into batch tensors: `[N, 3, S, S]` images and `[N]`
/// integer labels.
pub fn collate<B: Backend>(
    samples: &[&LoadedSample],
    image_size: usize,
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
    let batch = samples.len();
    let mut image_buf = Vec::with_capacity(batch * 3 * image_size * image_size);
    let mut label_buf = Vec::with_capacity(batch);
    for sample in samples {
        image_buf.extend_from_slice(&sample.pixels);
        label_buf.push(sample.label);
    }

    let images = Tensor::<B, 4>::from_data(
        TensorData::new(image_buf, [batch, 3, image_size, image_size]),
        device,
    );
    let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(label_buf, [batch]), device);

    (images, labels)
}
