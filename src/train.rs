//! Training pipeline: fine-tunes the classifier end to end.
//!
//! Indexes the dataset, partitions it by the train/test split, runs the epoch
//! loop with a step-decay learning rate, and persists the weights locally
//! before uploading them to the object store. There is no retry anywhere:
//! unrecoverable errors abort the run, while per-sample errors were already
//! converted into sentinel samples by the loader and are filtered out here
//! before any loss computation.

use anyhow::{anyhow, Context, Result};
use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::color_utils::symbols;
use crate::config::TrainConfig;
use crate::dataset::{index_dataset, SampleRecord};
use crate::loader::{collate, filter_valid, load_sample, ImageSource, LoadedSample};
use crate::metrics::{EpochMetrics, RunningMetrics};
use crate::model::VitClassifier;
use crate::storage::ObjectStore;

/// CPU backend used for training and evaluation.
pub type TrainBackend = NdArray<f32>;
type ADBackend = Autodiff<TrainBackend>;

#[derive(Serialize)]
struct RunSummary<'a> {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    weights_path: String,
    config: &'a TrainConfig,
    epochs: &'a [EpochMetrics],
}

/// Run the full fine-tuning loop described by `config`.
pub fn run_training(config: TrainConfig) -> Result<()> {
    let started_at = Utc::now();

    let index = index_dataset(&config.dataset_root, config.vit.num_classes)?;
    let (train_records, test_records) = index.partition();
    log::info!(
        "Training samples: {}, test samples: {}",
        train_records.len(),
        test_records.len()
    );
    if train_records.is_empty() {
        return Err(anyhow!("no training samples after the train/test split"));
    }

    let source = build_image_source(&config)?;
    let device = <ADBackend as Backend>::Device::default();

    let mut model = VitClassifier::<ADBackend>::new(config.vit.clone(), &device);
    match &config.pretrained {
        Some(path) => {
            model = model.load_backbone_record(path, &device).map_err(|e| {
                anyhow!("failed to load pretrained backbone {}: {e}", path.display())
            })?;
            log::info!(
                "{} Loaded pretrained backbone from {}",
                symbols::completed_successfully(),
                path.display()
            );
        }
        None => log::warn!(
            "{}No pretrained backbone given; training from random initialization",
            symbols::warning()
        ),
    }

    let mut optim = AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .init();
    let mut history = Vec::new();

    for epoch in 0..config.epochs {
        log::info!("--- Epoch {}/{} ---", epoch + 1, config.epochs);
        // Step-decay schedule, applied once per epoch.
        let lr = config.learning_rate * config.lr_gamma.powi((epoch / config.lr_step) as i32);
        log::debug!("Learning rate: {lr:e}");

        let (updated, train_loss, train_accuracy) =
            train_one_epoch(epoch, model, &mut optim, lr, &train_records, &source, &config);
        model = updated;

        let (val_loss, val_accuracy) = evaluate(&model.valid(), &test_records, &source, &config);

        log::info!(
            "Epoch [{}], Loss: {train_loss:.4}, Accuracy: {train_accuracy:.2}%",
            epoch + 1
        );
        log::info!("Validation Loss: {val_loss:.4}, Accuracy: {val_accuracy:.2}%");

        history.push(EpochMetrics {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
        });
    }

    // The recorder forces its own file extension; track the path it writes.
    let weights_path = config.weights_out.with_extension("bin");
    if let Some(parent) = weights_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(weights_path.clone(), &recorder)
        .map_err(|e| anyhow!("failed to save weights to {}: {e}", weights_path.display()))?;
    log::info!(
        "{} Model saved locally at {}",
        symbols::save_file(),
        weights_path.display()
    );

    write_run_summary(&config, &weights_path, &history, started_at)?;

    if let Some(bucket) = &config.bucket {
        let store = ObjectStore::new(&config.endpoint, bucket)?;
        store
            .upload(&weights_path, &config.upload_key)
            .with_context(|| format!("failed to upload weights to {bucket}"))?;
        log::info!(
            "{} Model uploaded to gs://{}/{}",
            symbols::completed_successfully(),
            bucket,
            config.upload_key
        );
    }

    Ok(())
}

fn build_image_source(config: &TrainConfig) -> Result<ImageSource> {
    if config.images_from_store {
        let bucket = config
            .bucket
            .as_deref()
            .ok_or_else(|| anyhow!("--images-from-store requires --bucket"))?;
        Ok(ImageSource::Store {
            store: ObjectStore::new(&config.endpoint, bucket)?,
            prefix: config.images_prefix.clone(),
        })
    } else {
        Ok(ImageSource::Local(config.dataset_root.join("images")))
    }
}

fn train_one_epoch<O>(
    epoch: usize,
    mut model: VitClassifier<ADBackend>,
    optim: &mut O,
    lr: f64,
    records: &[&SampleRecord],
    source: &ImageSource,
    config: &TrainConfig,
) -> (VitClassifier<ADBackend>, f64, f64)
where
    O: Optimizer<VitClassifier<ADBackend>, ADBackend>,
{
    let device = <ADBackend as Backend>::Device::default();
    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let mut metrics = RunningMetrics::default();
    let num_batches = records.len().div_ceil(config.batch_size);

    for (batch_idx, chunk) in records.chunks(config.batch_size).enumerate() {
        let loaded: Vec<LoadedSample> = chunk
            .iter()
            .map(|record| load_sample(record, source, config.vit.image_size as u32))
            .collect();
        let valid = filter_valid(&loaded, config.vit.num_classes);
        if valid.is_empty() {
            log::debug!("Skipping batch {}: no valid labels", batch_idx + 1);
            continue;
        }

        let (images, labels) = collate::<ADBackend>(&valid, config.vit.image_size, &device);
        let logits = model.forward(images);
        let loss = loss_fn.forward(logits.clone(), labels);

        let loss_value = loss.clone().into_scalar();
        let correct = count_correct(&logits, &valid);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        metrics.record_batch(loss_value, correct, valid.len());

        if (batch_idx + 1) % 10 == 0 || (batch_idx + 1) == num_batches {
            log::info!(
                "Epoch [{}], Batch [{}/{}], Loss: {loss_value:.4}",
                epoch + 1,
                batch_idx + 1,
                num_batches
            );
        }
    }

    (model, metrics.average_loss(), metrics.accuracy_percent())
}

/// Evaluation pass: same validity filtering as training, no gradients.
fn evaluate(
    model: &VitClassifier<TrainBackend>,
    records: &[&SampleRecord],
    source: &ImageSource,
    config: &TrainConfig,
) -> (f64, f64) {
    let device = <TrainBackend as Backend>::Device::default();
    let loss_fn = CrossEntropyLossConfig::new().init(&device);
    let mut metrics = RunningMetrics::default();

    for chunk in records.chunks(config.batch_size) {
        let loaded: Vec<LoadedSample> = chunk
            .iter()
            .map(|record| load_sample(record, source, config.vit.image_size as u32))
            .collect();
        let valid = filter_valid(&loaded, config.vit.num_classes);
        if valid.is_empty() {
            continue;
        }

        let (images, labels) = collate::<TrainBackend>(&valid, config.vit.image_size, &device);
        let logits = model.forward(images);
        let loss = loss_fn.forward(logits.clone(), labels);

        metrics.record_batch(loss.into_scalar(), count_correct(&logits, &valid), valid.len());
    }

    (metrics.average_loss(), metrics.accuracy_percent())
}

fn count_correct<B: Backend>(logits: &Tensor<B, 2>, samples: &[&LoadedSample]) -> usize {
    let predictions = logits.clone().argmax(1).reshape([samples.len()]);
    let predictions: Vec<i64> = predictions.into_data().to_vec().unwrap_or_default();
    predictions
        .into_iter()
        .zip(samples)
        .filter(|&(prediction, sample)| prediction == sample.label)
        .count()
}

fn write_run_summary(
    config: &TrainConfig,
    weights_path: &std::path::Path,
    history: &[EpochMetrics],
    started_at: DateTime<Utc>,
) -> Result<()> {
    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        weights_path: weights_path.to_string_lossy().to_string(),
        config,
        epochs: history,
    };

    let summary_path = summary_path(weights_path);
    let rendered = toml::to_string_pretty(&summary).context("failed to render run summary")?;
    fs::write(&summary_path, rendered)?;
    log::debug!("Run summary written to: {}", summary_path.display());

    Ok(())
}

/// Sidecar path for the run summary: `<stem>.pipit.toml` next to the weights.
pub fn summary_path(weights_path: &std::path::Path) -> PathBuf {
    let stem = weights_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("training-run");
    weights_path.with_file_name(format!("{stem}.pipit.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_summary_path_is_sidecar() {
        assert_eq!(
            summary_path(Path::new("out/bird-vit-model.bin")),
            PathBuf::from("out/bird-vit-model.pipit.toml")
        );
    }

    #[test]
    fn test_step_decay_schedule() {
        // Mirrors the per-epoch computation in run_training.
        let lr = 5e-5f64;
        let gamma = 0.1f64;
        let step = 5usize;

        let at = |epoch: usize| lr * gamma.powi((epoch / step) as i32);
        assert!((at(0) - 5e-5).abs() < 1e-12);
        assert!((at(4) - 5e-5).abs() < 1e-12);
        assert!((at(5) - 5e-6).abs() < 1e-12);
        assert!((at(10) - 5e-7).abs() < 1e-12);
    }
}
