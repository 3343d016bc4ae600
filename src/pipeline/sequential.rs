//! Sequential batch driver: one slide at a time, stages in fixed order.

use std::path::{Path, PathBuf};

use tracing::{error, info, Instrument};

use crate::config::RunConfig;
use crate::error::IoError;
use crate::qc::slide_id_for;

use super::report::{BatchClock, BatchReport, ExecutionMode, Reporter, SlideReport};
use super::stages;

/// Files directly inside `dir` whose extension is in `extensions`
/// (case-insensitive), sorted by path.
pub async fn discover_slides(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, IoError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(dir.display().to_string())
        } else {
            IoError::from(e)
        }
    })?;

    let mut slides = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false);
        if !matches {
            continue;
        }
        // Follows symlinks
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if is_file {
            slides.push(path);
        }
    }

    slides.sort();
    Ok(slides)
}

/// Runs the QC stages over every slide in the input directory.
#[derive(Debug, Clone)]
pub struct BatchDriver {
    config: RunConfig,
}

impl BatchDriver {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Discover slides and process them. Only discovery failure is fatal.
    pub async fn run(&self, reporter: &Reporter) -> Result<BatchReport, IoError> {
        let files = discover_slides(&self.config.input_dir, &self.config.extension_list()).await?;
        info!(
            parent: reporter.span(),
            count = files.len(),
            input = %self.config.input_dir.display(),
            "Discovered slides"
        );
        Ok(self.run_files(&files, reporter).await)
    }

    /// Process `files` in order. A failing slide is reported and skipped.
    pub async fn run_files(&self, files: &[PathBuf], reporter: &Reporter) -> BatchReport {
        let clock = BatchClock::start();
        let mut slides = Vec::with_capacity(files.len());

        for path in files {
            let slide_reporter = reporter.for_slide(&slide_id_for(path));
            let report = process_slide(path, &self.config, &slide_reporter)
                .instrument(slide_reporter.span().clone())
                .await;
            slides.push(report);
        }

        let batch = clock.finish(ExecutionMode::Sequential, slides, reporter);
        info!(
            parent: reporter.span(),
            completed = batch.completed(),
            failed = batch.failed(),
            flagged = batch.flagged(),
            elapsed_ms = batch.elapsed_ms,
            "Batch finished"
        );
        batch
    }
}

/// Load, segment, detect blur, decide and advise for one slide.
pub async fn process_slide(path: &Path, config: &RunConfig, reporter: &Reporter) -> SlideReport {
    let result = async {
        let slide = stages::load(path, config, reporter).await?;
        let slide = stages::segment(slide, reporter).await?;
        let (slide, fraction) = stages::detect_blur(slide, config, reporter).await?;

        let blurry = stages::decide(&slide.record, fraction, config.blur_max, reporter);
        if blurry {
            stages::advise(&slide.record, fraction, config.blur_max, reporter);
        }
        Ok::<_, stages::StageFailure>((slide.record, blurry))
    }
    .await;

    match result {
        Ok((record, blurry)) => SlideReport::completed(record, Some(blurry), blurry),
        Err(failure) => {
            error!(
                parent: reporter.span(),
                stage = %failure.stage,
                error = %failure.error,
                "Slide failed; continuing with the next one"
            );
            SlideReport::failed(failure)
        }
    }
}
