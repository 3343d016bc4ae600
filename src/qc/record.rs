//! Per-slide QC state passed through the stages by value.

use std::path::{Path, PathBuf};

use crate::error::QcError;
use crate::slide::WorkSize;

use super::mask::Mask;
use super::metrics::{MaskStatistic, MetricSet};

/// Everything the stages know about one slide.
///
/// The record is owned by exactly one stage at a time; each stage takes it
/// by value and hands it back updated.
#[derive(Debug, Clone)]
pub struct SlideRecord {
    /// File stem of the slide
    pub slide_id: String,

    /// Path the slide was opened from
    pub path: PathBuf,

    /// Directory receiving mask artifacts
    pub output_dir: PathBuf,

    /// Working resolution of the run
    pub work_size: WorkSize,

    /// Statistic reported as `percent_blurry`
    pub mask_statistics: MaskStatistic,

    /// Tissue still considered valid after each refinement
    pub tissue_mask: Option<Mask>,

    pub blur_mask: Option<Mask>,

    pub metrics: MetricSet,

    /// Artifacts written so far
    pub artifacts: Vec<PathBuf>,

    /// Artifact writes that failed; they do not stop processing
    pub artifact_errors: Vec<String>,
}

impl SlideRecord {
    pub fn new(
        path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        work_size: WorkSize,
        mask_statistics: MaskStatistic,
    ) -> Self {
        let path = path.into();
        let slide_id = slide_id_for(&path);
        Self {
            slide_id,
            path,
            output_dir: output_dir.into(),
            work_size,
            mask_statistics,
            tissue_mask: None,
            blur_mask: None,
            metrics: MetricSet::new(),
            artifacts: Vec::new(),
            artifact_errors: Vec::new(),
        }
    }

    /// Path of an artifact named `<slide_id>_<suffix>`.
    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{}", self.slide_id, suffix))
    }

    /// Compute `statistic` for a `before` -> `after` refinement and record it
    /// under `name`.
    pub fn record_metric(
        &mut self,
        name: &str,
        statistic: MaskStatistic,
        before: &Mask,
        after: &Mask,
    ) -> Result<f64, QcError> {
        let value = statistic.compute(before, after)?;
        self.metrics.insert(name, value)?;
        Ok(value)
    }

    pub fn tissue_mask(&self) -> Result<&Mask, QcError> {
        self.tissue_mask.as_ref().ok_or(QcError::MissingMask("tissue"))
    }
}

/// Slide id for a path: its file stem, or the whole name when there is none.
pub fn slide_id_for(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
