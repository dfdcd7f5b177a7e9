//! Configuration layer providing clean separation between CLI arguments and internal configs.
//!
//! This module defines the shared configuration structures used throughout the pipit
//! toolkit:
//! - `BaseConfig`: common options shared by all commands
//! - Command-specific configurations that embed the base config
//! - Conversion functions from CLI commands to internal configurations
//!
//! The design separates CLI concerns (argument parsing, help text, validation) from
//! business logic (processing parameters, internal state).

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::model::VitConfig;

/// Default object-store endpoint (Google Cloud Storage HTTP surface).
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Default bucket holding the project's assets.
pub const DEFAULT_BUCKET: &str = "smartbirds-assets";

/// Default object key for trained classifier weights.
pub const DEFAULT_WEIGHTS_KEY: &str = "models/bird-vit-model.bin";

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

/// Parse a corner-form bounding box from a string like "63,52,262,186"
pub fn parse_corner_box(s: &str) -> Result<[u32; 4], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err("Box must be in format 'x1,y1,x2,y2' (e.g., '63,52,262,186')".to_string());
    }

    let mut bbox = [0u32; 4];
    for (i, part) in parts.iter().enumerate() {
        bbox[i] = part
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid box coordinate: '{part}'"))?;
    }

    if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
        return Err(format!(
            "Box corners must satisfy x2 > x1 and y2 > y1, got {bbox:?}"
        ));
    }

    Ok(bbox)
}

/// Parse an MD5 checksum (32 hex characters)
pub fn parse_md5(s: &str) -> Result<String, String> {
    let s = s.trim().to_lowercase();
    if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("Checksum must be 32 hexadecimal characters".to_string());
    }
    Ok(s)
}

/// Global CLI arguments that apply to all pipit commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Disable colored output (also respects NO_COLOR and PIPIT_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Base configuration common to all commands
#[derive(Debug, Clone, Default, Serialize)]
pub struct BaseConfig {
    /// Optional output directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            output_dir: global.output_dir,
        }
    }
}

/// CLI command for fetching a model from the object store
#[derive(Parser, Debug, Clone)]
pub struct FetchCommand {
    /// Bucket to fetch from
    #[arg(long, default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Object key within the bucket
    #[arg(long, default_value = DEFAULT_WEIGHTS_KEY)]
    pub key: String,

    /// Local destination path
    #[arg(long, default_value = "bird-vit-model.bin")]
    pub dest: String,

    /// Object-store endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// MD5 checksum to verify the download against
    #[arg(long, value_parser = parse_md5)]
    pub checksum: Option<String>,
}

/// Internal configuration for the fetch command
#[derive(Debug, Clone, Serialize)]
pub struct FetchConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub bucket: String,
    pub key: String,
    pub dest: PathBuf,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl FetchConfig {
    pub fn from_args(global: GlobalArgs, cmd: FetchCommand) -> Self {
        let base: BaseConfig = global.into();
        let dest = resolve_output(&base, Path::new(&cmd.dest));
        Self {
            base,
            bucket: cmd.bucket,
            key: cmd.key,
            dest,
            endpoint: cmd.endpoint,
            checksum: cmd.checksum,
        }
    }
}

/// CLI command for drawing a detection box onto an image
#[derive(Parser, Debug, Clone)]
pub struct VisualizeCommand {
    /// Path to the input image
    #[arg(long, default_value = "test-images/american-goldfinch.jpg")]
    pub image: String,

    /// Detection box as corner coordinates 'x1,y1,x2,y2' in pixels
    #[arg(long, default_value = "63,52,262,186", value_parser = parse_corner_box)]
    pub bbox: [u32; 4],

    /// Detection confidence (0.0-1.0), rendered next to the box
    #[arg(long, default_value = "0.79", value_parser = parse_probability)]
    pub confidence: f32,

    /// Path to a TTF/OTF font for the confidence label (well-known system
    /// fonts are tried when omitted)
    #[arg(long)]
    pub font: Option<String>,

    /// Explicit output path (defaults to '<stem>_bbox.<ext>' next to the input)
    #[arg(long)]
    pub output: Option<String>,
}

/// Internal configuration for the visualize command
#[derive(Debug, Clone, Serialize)]
pub struct VisualizeConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub image: PathBuf,
    pub bbox: [u32; 4],
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl VisualizeConfig {
    pub fn from_args(global: GlobalArgs, cmd: VisualizeCommand) -> Self {
        Self {
            base: global.into(),
            image: PathBuf::from(cmd.image),
            bbox: cmd.bbox,
            confidence: cmd.confidence,
            font: cmd.font.map(PathBuf::from),
            output: cmd.output.map(PathBuf::from),
        }
    }
}

/// CLI command for fine-tuning the classifier
#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    /// Dataset root containing images.txt, image_class_labels.txt,
    /// bounding_boxes.txt, train_test_split.txt and the images/ tree
    #[arg(long, default_value = "data/CUB_200_2011")]
    pub dataset_root: String,

    /// Number of classes in the dataset
    #[arg(long, default_value_t = 200)]
    pub num_classes: usize,

    /// Input image size (must be a multiple of the patch size)
    #[arg(long, default_value_t = 224)]
    pub image_size: usize,

    /// Number of epochs
    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    /// Batch size
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Learning rate
    #[arg(long, default_value_t = 5e-5)]
    pub lr: f64,

    /// Epochs between learning-rate decay steps
    #[arg(long, default_value_t = 5)]
    pub lr_step: usize,

    /// Multiplicative learning-rate decay factor
    #[arg(long, default_value_t = 0.1)]
    pub lr_gamma: f64,

    /// AdamW weight decay
    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f32,

    /// Path to a pretrained backbone record (train from scratch when omitted)
    #[arg(long)]
    pub pretrained: Option<String>,

    /// Local path for the trained weights
    #[arg(long, default_value = "bird-vit-model.bin")]
    pub weights_out: String,

    /// Bucket to upload the trained weights to (no upload when omitted);
    /// also the bucket images are streamed from with --images-from-store
    #[arg(long)]
    pub bucket: Option<String>,

    /// Object key for the uploaded weights
    #[arg(long, default_value = DEFAULT_WEIGHTS_KEY)]
    pub upload_key: String,

    /// Object-store endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Read sample images from the object store instead of the local dataset root
    #[arg(long)]
    pub images_from_store: bool,

    /// Key prefix for sample images within the bucket
    #[arg(long, default_value = "images")]
    pub images_prefix: String,
}

/// Internal configuration for the training pipeline
#[derive(Debug, Clone, Serialize)]
pub struct TrainConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub dataset_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    pub upload_key: String,
    pub endpoint: String,
    pub images_from_store: bool,
    pub images_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretrained: Option<PathBuf>,
    pub weights_out: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub lr_step: usize,
    pub lr_gamma: f64,
    pub weight_decay: f32,
    pub vit: VitConfig,
}

impl TrainConfig {
    pub fn from_args(global: GlobalArgs, cmd: TrainCommand) -> Result<Self, String> {
        if cmd.images_from_store && cmd.bucket.is_none() {
            return Err("--images-from-store requires --bucket".to_string());
        }
        if cmd.batch_size == 0 {
            return Err("--batch-size must be at least 1".to_string());
        }
        if cmd.lr_step == 0 {
            return Err("--lr-step must be at least 1".to_string());
        }

        let vit = VitConfig {
            image_size: cmd.image_size,
            num_classes: cmd.num_classes,
            ..VitConfig::default()
        };
        if cmd.image_size == 0 || cmd.image_size % vit.patch_size != 0 {
            return Err(format!(
                "--image-size must be a positive multiple of the patch size ({})",
                vit.patch_size
            ));
        }

        let base: BaseConfig = global.into();
        let weights_out = resolve_output(&base, Path::new(&cmd.weights_out));

        Ok(Self {
            base,
            dataset_root: PathBuf::from(cmd.dataset_root),
            bucket: cmd.bucket,
            upload_key: cmd.upload_key,
            endpoint: cmd.endpoint,
            images_from_store: cmd.images_from_store,
            images_prefix: cmd.images_prefix,
            pretrained: cmd.pretrained.map(PathBuf::from),
            weights_out,
            epochs: cmd.epochs,
            batch_size: cmd.batch_size,
            learning_rate: cmd.lr,
            lr_step: cmd.lr_step,
            lr_gamma: cmd.lr_gamma,
            weight_decay: cmd.weight_decay,
            vit,
        })
    }
}

/// Place a relative output path into the global output directory when one is set.
fn resolve_output(base: &BaseConfig, path: &Path) -> PathBuf {
    match &base.output_dir {
        Some(dir) if path.is_relative() => Path::new(dir).join(path),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_global_args(output_dir: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            output_dir: output_dir.map(str::to_string),
            verbosity: Verbosity::new(0, 0),
            no_color: false,
        }
    }

    #[test]
    fn test_parse_probability() {
        assert_eq!(parse_probability("0.0"), Ok(0.0));
        assert_eq!(parse_probability("0.79"), Ok(0.79));
        assert_eq!(parse_probability("1.0"), Ok(1.0));

        assert!(parse_probability("-0.5").is_err());
        assert!(parse_probability("2.0").is_err());
        assert!(parse_probability("invalid").is_err());
    }

    #[test]
    fn test_parse_corner_box() {
        assert_eq!(parse_corner_box("63,52,262,186"), Ok([63, 52, 262, 186]));
        assert_eq!(parse_corner_box(" 0, 0, 1, 1 "), Ok([0, 0, 1, 1]));

        assert!(parse_corner_box("63,52,262").is_err()); // too few fields
        assert!(parse_corner_box("63,52,262,186,7").is_err()); // too many
        assert!(parse_corner_box("a,b,c,d").is_err()); // non-numeric
        assert!(parse_corner_box("100,52,62,186").is_err()); // x2 <= x1
        assert!(parse_corner_box("63,186,262,52").is_err()); // y2 <= y1
    }

    #[test]
    fn test_parse_md5() {
        assert_eq!(
            parse_md5("5EB63BBBE01EEED093CB22BB8F5ACDC3"),
            Ok("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string())
        );
        assert!(parse_md5("abc123").is_err()); // too short
        assert!(parse_md5("zzb63bbbe01eeed093cb22bb8f5acdc3").is_err()); // non-hex
    }

    #[test]
    fn test_fetch_config_conversion() {
        let cmd = FetchCommand {
            bucket: DEFAULT_BUCKET.to_string(),
            key: DEFAULT_WEIGHTS_KEY.to_string(),
            dest: "bird-vit-model.bin".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            checksum: None,
        };

        let config = FetchConfig::from_args(test_global_args(Some("/tmp/out")), cmd);

        assert_eq!(config.bucket, "smartbirds-assets");
        assert_eq!(config.key, "models/bird-vit-model.bin");
        // Relative destination is placed into the output directory.
        assert_eq!(config.dest, PathBuf::from("/tmp/out/bird-vit-model.bin"));
    }

    #[test]
    fn test_fetch_config_absolute_dest_ignores_output_dir() {
        let cmd = FetchCommand {
            bucket: DEFAULT_BUCKET.to_string(),
            key: DEFAULT_WEIGHTS_KEY.to_string(),
            dest: "/models/weights.bin".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            checksum: None,
        };

        let config = FetchConfig::from_args(test_global_args(Some("/tmp/out")), cmd);
        assert_eq!(config.dest, PathBuf::from("/models/weights.bin"));
    }

    #[test]
    fn test_visualize_config_conversion() {
        let cmd = VisualizeCommand {
            image: "birds/goldfinch.jpg".to_string(),
            bbox: [63, 52, 262, 186],
            confidence: 0.79,
            font: None,
            output: Some("annotated.jpg".to_string()),
        };

        let config = VisualizeConfig::from_args(test_global_args(None), cmd);

        assert_eq!(config.image, PathBuf::from("birds/goldfinch.jpg"));
        assert_eq!(config.bbox, [63, 52, 262, 186]);
        assert_eq!(config.confidence, 0.79);
        assert_eq!(config.output, Some(PathBuf::from("annotated.jpg")));
    }

    fn test_train_command() -> TrainCommand {
        TrainCommand {
            dataset_root: "data/CUB_200_2011".to_string(),
            num_classes: 200,
            image_size: 224,
            epochs: 5,
            batch_size: 16,
            lr: 5e-5,
            lr_step: 5,
            lr_gamma: 0.1,
            weight_decay: 0.01,
            pretrained: None,
            weights_out: "bird-vit-model.bin".to_string(),
            bucket: None,
            upload_key: DEFAULT_WEIGHTS_KEY.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            images_from_store: false,
            images_prefix: "images".to_string(),
        }
    }

    #[test]
    fn test_train_config_conversion() {
        let config = TrainConfig::from_args(test_global_args(None), test_train_command()).unwrap();

        assert_eq!(config.vit.num_classes, 200);
        assert_eq!(config.vit.image_size, 224);
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.learning_rate, 5e-5);
        assert!(config.bucket.is_none());
    }

    #[test]
    fn test_train_config_rejects_store_images_without_bucket() {
        let cmd = TrainCommand {
            images_from_store: true,
            ..test_train_command()
        };

        let result = TrainConfig::from_args(test_global_args(None), cmd);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("--bucket"));
    }

    #[test]
    fn test_train_config_rejects_bad_image_size() {
        let cmd = TrainCommand {
            image_size: 100, // not a multiple of the default patch size
            ..test_train_command()
        };

        assert!(TrainConfig::from_args(test_global_args(None), cmd).is_err());
    }
}
