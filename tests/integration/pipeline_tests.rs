//! Sequential driver integration tests.
//!
//! Tests verify:
//! - Sharp slides pass and blurry slides raise an advisory
//! - Corrupt files are reported as load failures without stopping the batch
//! - Mask artifacts land in the output directory with the tissue dimensions
//! - The tissue artifact survives a failure in the blur stage
//! - Artifact write failures are recorded but do not fail the slide
//! - The JSON report is written and well formed

use image::{Rgb, RgbImage};

use wsi_qc::{BatchDriver, Reporter, SlideOutcome, StageId, WorkSize};

use super::test_utils::{blurry_slide, encode_png, png_config, sharp_slide, ScratchDir, SLIDE_SIZE};

fn write_batch(dir: &ScratchDir) {
    dir.write("sharp.png", &encode_png(&sharp_slide()));
    dir.write("blurry.png", &encode_png(&blurry_slide()));
    dir.write("broken.png", b"\x89PNG but not really");
    dir.write("notes.txt", b"ignored");
}

#[tokio::test]
async fn test_batch_flags_only_blurry_slide() {
    let input = ScratchDir::new("seq-in");
    let output = ScratchDir::new("seq-out");
    write_batch(&input);

    let config = png_config(input.path(), output.path());
    let reporter = Reporter::new("sequential");
    let report = BatchDriver::new(config).run(&reporter).await.unwrap();

    let ids: Vec<_> = report.slides.iter().map(|s| s.slide_id.as_str()).collect();
    assert_eq!(ids, vec!["blurry", "broken", "sharp"]);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.flagged(), 1);

    let blurry = &report.slides[0];
    assert_eq!(blurry.outcome, SlideOutcome::Completed);
    assert_eq!(blurry.blurry, Some(true));
    assert!(blurry.advised);
    let fraction = blurry.metrics.get("blurry_fraction").unwrap().as_f64().unwrap();
    assert!(fraction > 0.5, "fraction = {}", fraction);

    let sharp = &report.slides[2];
    assert_eq!(sharp.blurry, Some(false));
    assert!(!sharp.advised);
    let fraction = sharp.metrics.get("blurry_fraction").unwrap().as_f64().unwrap();
    assert!(fraction < 0.05, "fraction = {}", fraction);

    assert_eq!(report.advisories.len(), 1);
    assert_eq!(report.advisories[0].slide_id, "blurry");
}

#[tokio::test]
async fn test_corrupt_slide_is_load_failure() {
    let input = ScratchDir::new("seq-corrupt-in");
    let output = ScratchDir::new("seq-corrupt-out");
    write_batch(&input);

    let config = png_config(input.path(), output.path());
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();

    let broken = &report.slides[1];
    match &broken.outcome {
        SlideOutcome::Failed { stage, error } => {
            assert_eq!(*stage, StageId::Load);
            assert!(!error.is_empty());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(broken.artifacts.is_empty());
    assert!(!output.join("broken_tissue_seg.png").exists());
}

#[tokio::test]
async fn test_metrics_and_artifacts() {
    let input = ScratchDir::new("seq-art-in");
    let output = ScratchDir::new("seq-art-out");
    input.write("sharp.png", &encode_png(&sharp_slide()));

    let config = png_config(input.path(), output.path());
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();
    let slide = &report.slides[0];

    let names: Vec<_> = slide.metrics.iter().map(|(name, _)| name).collect();
    assert_eq!(
        names,
        vec![
            "filename",
            "work_size",
            "tissue_otsu_threshold",
            "tissue_pixels",
            "blur_pixels",
            "percent_blurry",
            "blurry_fraction",
        ]
    );
    assert_eq!(slide.metrics.get("filename").unwrap().as_f64(), None);
    assert!(slide.mask_digests.contains_key("tissue"));
    assert!(slide.mask_digests.contains_key("blur"));

    let tissue_path = output.join("sharp_tissue_seg.png");
    let blur_path = output.join("sharp_blurry.png");
    assert_eq!(slide.artifacts.len(), 2);
    assert!(tissue_path.exists());
    assert!(blur_path.exists());

    let tissue = image::open(&tissue_path).unwrap().to_luma8();
    let blur = image::open(&blur_path).unwrap().to_luma8();
    assert_eq!(tissue.dimensions(), (SLIDE_SIZE, SLIDE_SIZE));
    assert_eq!(tissue.dimensions(), blur.dimensions());
    assert_eq!(tissue.get_pixel(150, 150)[0], 255);
    assert_eq!(tissue.get_pixel(5, 5)[0], 0);
}

#[tokio::test]
async fn test_tissue_artifact_survives_blur_failure() {
    let input = ScratchDir::new("seq-fail-in");
    let output = ScratchDir::new("seq-fail-out");
    input.write("blurry.png", &encode_png(&blurry_slide()));

    // PNGs carry no magnification, so a magnification blur work size fails
    let mut config = png_config(input.path(), output.path());
    config.blur_work_size = Some(WorkSize::Magnification(1.25));
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();

    let slide = &report.slides[0];
    assert!(matches!(
        slide.outcome,
        SlideOutcome::Failed {
            stage: StageId::DetectBlur,
            ..
        }
    ));
    assert!(output.join("blurry_tissue_seg.png").exists());
    assert!(!output.join("blurry_blurry.png").exists());
    assert_eq!(slide.artifacts.len(), 1);
    assert!(slide.metrics.contains("tissue_pixels"));
    assert!(report.advisories.is_empty());
}

#[tokio::test]
async fn test_artifact_write_failure_is_not_fatal() {
    let input = ScratchDir::new("seq-blocked-in");
    let scratch = ScratchDir::new("seq-blocked-out");
    input.write("blurry.png", &encode_png(&blurry_slide()));

    // The output "directory" is a regular file
    let blocker = scratch.write("blocker", b"file");
    let config = png_config(input.path(), &blocker);
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();

    let slide = &report.slides[0];
    assert_eq!(slide.outcome, SlideOutcome::Completed);
    assert_eq!(slide.blurry, Some(true));
    assert!(slide.artifacts.is_empty());
    assert_eq!(slide.artifact_errors.len(), 2);
}

#[tokio::test]
async fn test_uniform_slides_are_degenerate_not_errors() {
    let input = ScratchDir::new("seq-uniform-in");
    let output = ScratchDir::new("seq-uniform-out");
    let white = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
    let gray = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
    input.write("white.png", &encode_png(&white));
    input.write("gray.png", &encode_png(&gray));

    let config = png_config(input.path(), output.path());
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();
    assert_eq!(report.completed(), 2);

    // Gray: the whole raster is tissue, and all of it is flat
    let gray = &report.slides[0];
    assert_eq!(gray.metrics.get("tissue_pixels").unwrap().as_f64(), Some(4096.0));
    assert_eq!(gray.metrics.get("blurry_fraction").unwrap().as_f64(), Some(1.0));
    assert_eq!(gray.blurry, Some(true));

    // White: no tissue at all, so nothing can be blurry
    let white = &report.slides[1];
    assert_eq!(white.metrics.get("tissue_pixels").unwrap().as_f64(), Some(0.0));
    assert_eq!(white.metrics.get("blurry_fraction").unwrap().as_f64(), Some(0.0));
    assert_eq!(white.blurry, Some(false));
}

#[tokio::test]
async fn test_report_written_as_json() {
    let input = ScratchDir::new("seq-json-in");
    let output = ScratchDir::new("seq-json-out");
    write_batch(&input);

    let config = png_config(input.path(), output.path());
    let report_path = config.report_path();
    let report = BatchDriver::new(config)
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();
    report.write(&report_path).await.unwrap();

    let text = std::fs::read_to_string(&report_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["mode"], "sequential");
    assert_eq!(json["slides"].as_array().unwrap().len(), 3);
    assert_eq!(json["slides"][0]["slide_id"], "blurry");
    assert_eq!(json["slides"][0]["status"], "completed");
    assert_eq!(json["slides"][1]["status"], "failed");
    assert_eq!(json["slides"][1]["stage"], "load");
    assert_eq!(json["advisories"][0]["slide_id"], "blurry");
}

#[tokio::test]
async fn test_missing_input_dir_is_fatal() {
    let output = ScratchDir::new("seq-missing-out");
    let config = png_config(&output.join("nope"), output.path());
    let result = BatchDriver::new(config).run(&Reporter::new("sequential")).await;
    assert!(result.is_err());
}
