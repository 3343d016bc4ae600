//! The QC stages, defined once and shared by both execution modes.
//!
//! Each stage takes the slide by value and hands it back, so a slide's state
//! is only ever reachable from the stage currently working on it. CPU-heavy
//! work runs on tokio's blocking pool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::RunConfig;
use crate::error::QcError;
use crate::qc::{
    self, write_mask_png, Advisory, Mask, SlideRecord, BLUR_ARTIFACT, TISSUE_ARTIFACT,
};
use crate::slide::{SlideHandle, WorkSize};

use super::report::Reporter;

// =============================================================================
// Stage Identity
// =============================================================================

/// The units of work applied to every slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Load,
    Segment,
    DetectBlur,
    CheckBlurry,
    BlurryAction,
}

impl StageId {
    pub const fn name(&self) -> &'static str {
        match self {
            StageId::Load => "load",
            StageId::Segment => "segment",
            StageId::DetectBlur => "detect_blur",
            StageId::CheckBlurry => "check_blurry",
            StageId::BlurryAction => "blurry_action",
        }
    }

    /// Whether the stage's output is a boolean that can gate an edge.
    pub const fn produces_decision(&self) -> bool {
        matches!(self, StageId::CheckBlurry)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage that failed, with the slide's record as far as it got.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: StageId,
    pub error: QcError,
    pub record: SlideRecord,
}

impl StageFailure {
    fn new(stage: StageId, error: impl Into<QcError>, record: SlideRecord) -> Self {
        Self {
            stage,
            error: error.into(),
            record,
        }
    }
}

/// An opened slide together with its QC record.
#[derive(Debug)]
pub struct LoadedSlide {
    pub handle: Arc<SlideHandle>,
    pub record: SlideRecord,
}

// =============================================================================
// Stages
// =============================================================================

/// Open the slide and start its record.
pub async fn load(
    path: &Path,
    config: &RunConfig,
    reporter: &Reporter,
) -> Result<LoadedSlide, StageFailure> {
    let mut record = SlideRecord::new(
        path,
        &config.output_dir,
        config.work_size,
        config.mask_statistics,
    );

    let handle = match SlideHandle::open(path, config.open_options()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(parent: reporter.span(), error = %e, "Failed to load slide");
            return Err(StageFailure::new(StageId::Load, e, record));
        }
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let recorded = record
        .metrics
        .insert("filename", filename)
        .and_then(|_| record.metrics.insert("work_size", record.work_size.to_string()));
    if let Err(e) = recorded {
        return Err(StageFailure::new(StageId::Load, e, record));
    }

    debug!(parent: reporter.span(), format = handle.format().name(), "Loaded slide");
    Ok(LoadedSlide {
        handle: Arc::new(handle),
        record,
    })
}

/// Segment tissue and write `<id>_tissue_seg.png`.
pub async fn segment(slide: LoadedSlide, reporter: &Reporter) -> Result<LoadedSlide, StageFailure> {
    let LoadedSlide { handle, record } = slide;
    let raster = match working_raster(&handle, &record.work_size).await {
        Ok(raster) => raster,
        Err(e) => return Err(StageFailure::new(StageId::Segment, e, record)),
    };

    let span = reporter.span().clone();
    let record = blocking(StageId::Segment, record, move |mut record| {
        let _entered = span.enter();
        let segmentation = match qc::segment_tissue(&raster) {
            Ok(segmentation) => segmentation,
            Err(e) => return Err(StageFailure::new(StageId::Segment, e, record)),
        };

        let recorded = record
            .metrics
            .insert("tissue_otsu_threshold", segmentation.otsu_threshold as f64)
            .and_then(|_| record.metrics.insert("tissue_pixels", segmentation.mask.count()));
        if let Err(e) = recorded {
            return Err(StageFailure::new(StageId::Segment, e, record));
        }

        persist_mask(&mut record, &segmentation.mask, TISSUE_ARTIFACT);
        info!(
            tissue_pixels = segmentation.mask.count(),
            threshold = segmentation.otsu_threshold,
            "Tissue segmented"
        );
        record.tissue_mask = Some(segmentation.mask);
        Ok(record)
    })
    .await?;

    Ok(LoadedSlide { handle, record })
}

/// Detect blur, refine the tissue mask and write `<id>_blurry.png`.
///
/// Returns the slide and its blurry fraction.
pub async fn detect_blur(
    slide: LoadedSlide,
    config: &RunConfig,
    reporter: &Reporter,
) -> Result<(LoadedSlide, f64), StageFailure> {
    let LoadedSlide { handle, record } = slide;
    let raster = match working_raster(&handle, &config.effective_blur_work_size()).await {
        Ok(raster) => raster,
        Err(e) => return Err(StageFailure::new(StageId::DetectBlur, e, record)),
    };

    let params = config.blur_params();
    let span = reporter.span().clone();
    let (record, fraction) = blocking(StageId::DetectBlur, record, move |mut record| {
        let _entered = span.enter();
        let fraction = match qc::detect_blur(&mut record, &raster, &params) {
            Ok(fraction) => fraction,
            Err(e) => return Err(StageFailure::new(StageId::DetectBlur, e, record)),
        };

        if let Some(blur_mask) = record.blur_mask.clone() {
            persist_mask(&mut record, &blur_mask, BLUR_ARTIFACT);
        }
        info!(
            blurry_fraction = fraction,
            percent_blurry = fraction * 100.0,
            "Blur detected"
        );
        Ok((record, fraction))
    })
    .await?;

    Ok((LoadedSlide { handle, record }, fraction))
}

/// Whether the slide needs the blurry action.
pub fn decide(
    record: &SlideRecord,
    blurry_fraction: f64,
    blur_max: f64,
    reporter: &Reporter,
) -> bool {
    let blurry = qc::decide(blurry_fraction, blur_max);
    info!(
        parent: reporter.span(),
        slide = %record.slide_id,
        blurry_fraction,
        blur_max,
        blurry,
        "Blur decision"
    );
    blurry
}

/// Raise the rescan advisory for a blurry slide. Observational only.
pub fn advise(record: &SlideRecord, blurry_fraction: f64, blur_max: f64, reporter: &Reporter) {
    reporter.advise(Advisory::new(record.slide_id.clone(), blurry_fraction, blur_max));
}

// =============================================================================
// Helpers
// =============================================================================

async fn working_raster(
    handle: &SlideHandle,
    work_size: &WorkSize,
) -> Result<Arc<RgbImage>, QcError> {
    let raster = handle.thumbnail(work_size).await?;
    if raster.width() == 0 || raster.height() == 0 {
        return Err(QcError::EmptyRaster);
    }
    Ok(raster)
}

/// Run `f` on the blocking pool, owning the record for its duration.
async fn blocking<T, F>(stage: StageId, record: SlideRecord, f: F) -> Result<T, StageFailure>
where
    T: Send + 'static,
    F: FnOnce(SlideRecord) -> Result<T, StageFailure> + Send + 'static,
{
    // Kept so a panicking task still reports the slide it belonged to.
    let fallback = SlideRecord::new(
        record.path.clone(),
        record.output_dir.clone(),
        record.work_size,
        record.mask_statistics,
    );
    match tokio::task::spawn_blocking(move || f(record)).await {
        Ok(result) => result,
        Err(e) => Err(StageFailure::new(stage, QcError::Task(e.to_string()), fallback)),
    }
}

/// Write a mask artifact; failures are logged and recorded, never fatal.
fn persist_mask(record: &mut SlideRecord, mask: &Mask, suffix: &str) {
    let path: PathBuf = record.artifact_path(suffix);
    match write_mask_png(mask, &path) {
        Ok(()) => {
            debug!(path = %path.display(), "Wrote mask artifact");
            record.artifacts.push(path);
        }
        Err(e) => {
            error!(error = %e, "Failed to write mask artifact; continuing");
            record.artifact_errors.push(e.to_string());
        }
    }
}
