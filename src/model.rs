//! Vision-transformer classifier.
//!
//! Shapes:
//! - Input images: `[B, 3, S, S]` (ImageNet-normalized)
//! - Patch tokens: `[B, (S/P)^2, d_model]`
//! - Logits: `[B, num_classes]`
//!
//! The backbone (patch embedding, positional embedding, encoder) and the
//! classification head are separate modules so a pretrained backbone record
//! can be loaded underneath a freshly initialized head for fine-tuning.

use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use serde::Serialize;
use std::path::Path;

/// Classifier hyperparameters. The default is a small ViT sized for
/// 224x224 inputs with 16-pixel patches.
#[derive(Debug, Clone, Serialize)]
pub struct VitConfig {
    pub image_size: usize,
    pub patch_size: usize,
    pub d_model: usize,
    pub d_ff: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub dropout: f64,
    pub num_classes: usize,
}

impl Default for VitConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            patch_size: 16,
            d_model: 384,
            d_ff: 1536,
            num_heads: 6,
            num_layers: 6,
            dropout: 0.1,
            num_classes: 200,
        }
    }
}

impl VitConfig {
    pub fn num_patches(&self) -> usize {
        let per_side = self.image_size / self.patch_size;
        per_side * per_side
    }
}

#[derive(Module, Debug)]
pub struct VitBackbone<B: Backend> {
    patch_embed: Conv2d<B>,
    pos_embed: Param<Tensor<B, 3>>,
    dropout: Dropout,
    encoder: TransformerEncoder<B>,
    norm: LayerNorm<B>,
}

impl<B: Backend> VitBackbone<B> {
    pub fn new(config: &VitConfig, device: &B::Device) -> Self {
        let patch = config.patch_size;
        let patch_embed = Conv2dConfig::new([3, config.d_model], [patch, patch])
            .with_stride([patch, patch])
            .init(device);
        let pos_embed = Param::from_tensor(Tensor::random(
            [1, config.num_patches(), config.d_model],
            Distribution::Normal(0.0, 0.02),
            device,
        ));
        let encoder = TransformerEncoderConfig::new(
            config.d_model,
            config.d_ff,
            config.num_heads,
            config.num_layers,
        )
        .with_dropout(config.dropout)
        .init(device);

        Self {
            patch_embed,
            pos_embed,
            dropout: DropoutConfig::new(config.dropout).init(),
            encoder,
            norm: LayerNormConfig::new(config.d_model).init(device),
        }
    }

    /// `[B, 3, S, S]` images to pooled token features `[B, d_model]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.patch_embed.forward(images);
        let [batch, d_model, h, w] = x.dims();
        let tokens = x.reshape([batch, d_model, h * w]).swap_dims(1, 2);

        let tokens = tokens + self.pos_embed.val();
        let tokens = self.dropout.forward(tokens);

        let encoded = self.encoder.forward(TransformerEncoderInput::new(tokens));
        let encoded = self.norm.forward(encoded);
        encoded.mean_dim(1).squeeze::<2>(1)
    }
}

#[derive(Module, Debug)]
pub struct VitClassifier<B: Backend> {
    pub backbone: VitBackbone<B>,
    head: Linear<B>,
    pub config: Ignored<VitConfig>,
}

impl<B: Backend> VitClassifier<B> {
    pub fn new(config: VitConfig, device: &B::Device) -> Self {
        let backbone = VitBackbone::new(&config, device);
        let head = LinearConfig::new(config.d_model, config.num_classes).init(device);
        Self {
            backbone,
            head,
            config: Ignored(config),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Swap in pretrained backbone weights, keeping the fresh head.
    pub fn load_backbone_record(
        mut self,
        path: &Path,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.backbone = self.backbone.load_file(path.to_path_buf(), &recorder, device)?;
        Ok(self)
    }
}
