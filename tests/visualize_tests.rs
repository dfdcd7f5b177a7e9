use image::{Rgb, RgbImage, Rgba};
use std::path::PathBuf;
use tempfile::TempDir;

use pipit::config::{BaseConfig, VisualizeConfig};
use pipit::visualize::run_visualize;

fn viz_config(image: PathBuf, output_dir: Option<String>) -> VisualizeConfig {
    VisualizeConfig {
        base: BaseConfig { output_dir },
        image,
        bbox: [10, 30, 50, 60],
        confidence: 0.79,
        font: None,
        output: None,
    }
}

#[test]
fn missing_image_reports_and_draws_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("not-there.jpg");

    let result = run_visualize(viz_config(missing, None)).unwrap();

    assert!(result.is_none(), "no output path for a missing image");
    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "nothing may be written for a missing image");
}

#[test]
fn undecodable_image_reports_and_draws_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let bogus = temp_dir.path().join("corrupt.jpg");
    std::fs::write(&bogus, b"definitely not a jpeg").unwrap();

    let result = run_visualize(viz_config(bogus, None)).unwrap();
    assert!(result.is_none());
}

#[test]
fn annotated_copy_is_written_with_the_box_drawn() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("bird.png");
    RgbImage::from_pixel(100, 80, Rgb([200, 200, 200]))
        .save(&input)
        .unwrap();

    let output = run_visualize(viz_config(input, None))
        .unwrap()
        .expect("an output path");

    assert_eq!(output, temp_dir.path().join("bird_bbox.png"));
    let annotated = image::open(&output).unwrap().to_rgba8();
    // Box corner carries the green detection color; interior is untouched.
    assert_eq!(*annotated.get_pixel(10, 30), Rgba([0, 255, 0, 255]));
    assert_eq!(*annotated.get_pixel(30, 45), Rgba([200, 200, 200, 255]));
}

#[test]
fn output_dir_override_is_respected() {
    let temp_dir = TempDir::new().unwrap();
    let out_dir = temp_dir.path().join("annotated");
    let input = temp_dir.path().join("bird.png");
    RgbImage::from_pixel(64, 64, Rgb([0, 0, 0])).save(&input).unwrap();

    let output = run_visualize(viz_config(
        input,
        Some(out_dir.to_string_lossy().to_string()),
    ))
    .unwrap()
    .expect("an output path");

    assert_eq!(output, out_dir.join("bird_bbox.png"));
    assert!(output.exists());
}
