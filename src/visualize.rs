//! Detection visualizer: draws a bounding box and confidence label on an image.
//!
//! Debugging utility for inspecting detector output against a known image. A
//! missing or undecodable input is reported and the command returns cleanly
//! without drawing anything.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;
use crate::config::VisualizeConfig;

const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const LABEL_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: f32 = 18.0;

/// Font locations tried when `--font` is not given.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial Unicode.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Draw the configured box onto the image and save an annotated copy.
///
/// Returns the output path, or `None` when the input image could not be
/// loaded (reported, not fatal).
pub fn run_visualize(config: VisualizeConfig) -> Result<Option<PathBuf>> {
    let img = match image::open(&config.image) {
        Ok(img) => img,
        Err(e) => {
            log::error!(
                "{} Could not load image {}: {e}",
                symbols::operation_failed(),
                config.image.display()
            );
            return Ok(None);
        }
    };

    let mut rgba = img.to_rgba8();
    draw_detection(&mut rgba, config.bbox, config.confidence, load_label_font(config.font.as_deref()).as_ref());

    let output_path = annotated_output_path(&config);
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // JPEG has no alpha channel; collapse back to RGB for non-PNG outputs.
    let preserve_alpha = output_path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase() == "png")
        .unwrap_or(false);
    let output_img = if preserve_alpha {
        DynamicImage::ImageRgba8(rgba)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
    };

    output_img
        .save(&output_path)
        .with_context(|| format!("failed to save {}", output_path.display()))?;

    log::info!(
        "{} Annotated image saved to: {}",
        symbols::completed_successfully(),
        output_path.display()
    );

    Ok(Some(output_path))
}

/// Draw a hollow rectangle and confidence label onto an RGBA image.
pub fn draw_detection(
    rgba_img: &mut RgbaImage,
    bbox: [u32; 4],
    confidence: f32,
    font: Option<&FontVec>,
) {
    let (width, height) = rgba_img.dimensions();
    let x1 = bbox[0].min(width.saturating_sub(1));
    let y1 = bbox[1].min(height.saturating_sub(1));
    let x2 = bbox[2].min(width);
    let y2 = bbox[3].min(height);

    for t in 0..BOX_THICKNESS as i32 {
        let rect = imageproc::rect::Rect::at(x1 as i32 - t, y1 as i32 - t).of_size(
            (x2 - x1) + (t * 2) as u32,
            (y2 - y1) + (t * 2) as u32,
        );
        draw_hollow_rect_mut(rgba_img, rect, BOX_COLOR);
    }

    let label = format!("Confidence: {confidence:.2}");
    match font {
        Some(font) => {
            let text_x = x1 as i32;
            let text_y = y1 as i32 - (LABEL_SCALE as i32 + 2).min(y1 as i32);
            draw_text_mut(
                rgba_img,
                LABEL_COLOR,
                text_x,
                text_y.max(0),
                PxScale::from(LABEL_SCALE),
                font,
                &label,
            );
        }
        None => {
            log::warn!(
                "{}No usable label font found; drawing box without text (set --font)",
                symbols::warning()
            );
        }
    }
}

/// Load the label font from an explicit path or the first usable candidate.
fn load_label_font(explicit: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => FONT_CANDIDATES.iter().map(PathBuf::from).collect(),
    };

    for candidate in candidates {
        if let Ok(bytes) = fs::read(&candidate) {
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    log::debug!("Using label font: {}", candidate.display());
                    return Some(font);
                }
                Err(e) => {
                    log::debug!("Skipping unusable font {}: {e}", candidate.display());
                }
            }
        }
    }

    None
}

/// Output path for the annotated copy: `<stem>_bbox.<ext>`, next to the input
/// or inside the configured output directory.
fn annotated_output_path(config: &VisualizeConfig) -> PathBuf {
    if let Some(output) = &config.output {
        return output.clone();
    }

    let stem = config
        .image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = config
        .image
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("jpg");
    let filename = format!("{stem}_bbox.{ext}");

    match &config.base.output_dir {
        Some(dir) => Path::new(dir).join(filename),
        None => config
            .image
            .parent()
            .unwrap_or(Path::new("."))
            .join(filename),
    }
}
