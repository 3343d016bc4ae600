//! Configuration for WSI QC.
//!
//! Options come from command-line arguments, fall back to environment
//! variables with the `WSI_QC_` prefix, and then to defaults:
//!
//! - `WSI_QC_INPUT_DIR` - Directory scanned for slides (required)
//! - `WSI_QC_OUTPUT_DIR` - Directory receiving masks and the report (default: qc_output)
//! - `WSI_QC_EXTENSIONS` - Comma-separated extension filter (default: svs)
//! - `WSI_QC_WORK_SIZE` - Working resolution (default: 1.25x)
//! - `WSI_QC_BLUR_WORK_SIZE` - Working resolution of the blur stage (default: work size)
//! - `WSI_QC_BLUR_RADIUS` - Gaussian sigma of the blur detector (default: 7)
//! - `WSI_QC_BLUR_THRESHOLD` - Low-energy threshold (default: 0.05)
//! - `WSI_QC_BLUR_MAX` - Blurry fraction above which a slide is flagged (default: 0.05)
//! - `WSI_QC_MASK_STATISTICS` - Statistic reported as percent_blurry (default: relative2mask)
//! - `WSI_QC_BASE_MAGNIFICATION` - Objective magnification for slides without metadata
//! - `WSI_QC_MAX_CONCURRENCY` - Concurrent slides in `flow` mode (default: CPU count)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::qc::{
    BlurParams, MaskStatistic, DEFAULT_BLUR_MAX, DEFAULT_BLUR_RADIUS, DEFAULT_BLUR_THRESHOLD,
};
use crate::slide::{OpenOptions, WorkSize, DEFAULT_THUMBNAIL_CACHE};

// =============================================================================
// Default Values
// =============================================================================

/// Default working resolution.
pub const DEFAULT_WORK_SIZE: &str = "1.25x";

/// Default extension filter.
pub const DEFAULT_EXTENSIONS: &str = "svs";

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "qc_output";

/// File name of the batch report inside the output directory.
pub const REPORT_FILE_NAME: &str = "qc_results.json";

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI QC - tissue and blur quality control for whole-slide images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-qc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Process every slide sequentially, one stage after another.
    Run(RunConfig),

    /// Process slides concurrently through the stage graph.
    Flow(FlowConfig),

    /// Print the stage graph in Graphviz DOT format.
    Graph(GraphConfig),
}

/// Options shared by both execution modes.
#[derive(Args, Debug, Clone)]
pub struct RunConfig {
    // =========================================================================
    // Input / Output
    // =========================================================================
    /// Directory containing the slides (not searched recursively).
    #[arg(long, short = 'i', env = "WSI_QC_INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Directory receiving mask images and the JSON report.
    #[arg(long, short = 'o', default_value = DEFAULT_OUTPUT_DIR, env = "WSI_QC_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Comma-separated file extensions to process (case-insensitive).
    #[arg(long, default_value = DEFAULT_EXTENSIONS, env = "WSI_QC_EXTENSIONS")]
    pub extensions: String,

    // =========================================================================
    // Working Resolution
    // =========================================================================
    /// Working resolution: "<mag>x", a scale factor < 1, a level, or a maximum size.
    #[arg(long, default_value = DEFAULT_WORK_SIZE, env = "WSI_QC_WORK_SIZE")]
    pub work_size: WorkSize,

    /// Working resolution of the blur stage (defaults to --work-size).
    #[arg(long, env = "WSI_QC_BLUR_WORK_SIZE")]
    pub blur_work_size: Option<WorkSize>,

    /// Objective magnification assumed for slides whose metadata has none.
    #[arg(long, env = "WSI_QC_BASE_MAGNIFICATION")]
    pub base_magnification: Option<f64>,

    /// Working-resolution rasters memoized per slide.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_CACHE, env = "WSI_QC_THUMBNAIL_CACHE")]
    pub thumbnail_cache: usize,

    // =========================================================================
    // Blur Detection
    // =========================================================================
    /// Standard deviation of the Gaussian applied to Laplacian energy.
    #[arg(long, default_value_t = DEFAULT_BLUR_RADIUS, env = "WSI_QC_BLUR_RADIUS")]
    pub blur_radius: f32,

    /// Smoothed energy at or below this value counts as blurry.
    #[arg(long, default_value_t = DEFAULT_BLUR_THRESHOLD, env = "WSI_QC_BLUR_THRESHOLD")]
    pub blur_threshold: f32,

    /// Blurry tissue fraction above which a rescan is advised.
    #[arg(long, default_value_t = DEFAULT_BLUR_MAX, env = "WSI_QC_BLUR_MAX")]
    pub blur_max: f64,

    /// Statistic reported as percent_blurry: relative2mask, relative2image or absolute.
    #[arg(long, default_value_t = MaskStatistic::RelativeToMask, env = "WSI_QC_MASK_STATISTICS")]
    pub mask_statistics: MaskStatistic,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RunConfig {
    /// Defaults for everything but the directories.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            extensions: DEFAULT_EXTENSIONS.to_string(),
            work_size: WorkSize::Magnification(1.25),
            blur_work_size: None,
            base_magnification: None,
            thumbnail_cache: DEFAULT_THUMBNAIL_CACHE,
            blur_radius: DEFAULT_BLUR_RADIUS,
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            blur_max: DEFAULT_BLUR_MAX,
            mask_statistics: MaskStatistic::RelativeToMask,
            verbose: false,
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.input_dir.as_os_str().is_empty() {
            return Err(
                "Input directory is required. Set --input-dir or WSI_QC_INPUT_DIR".to_string(),
            );
        }

        if self.extension_list().is_empty() {
            return Err("At least one file extension is required (--extensions)".to_string());
        }

        if !self.blur_radius.is_finite() || self.blur_radius <= 0.0 {
            return Err("blur_radius must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.blur_threshold) {
            return Err("blur_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.blur_max) {
            return Err("blur_max must be between 0 and 1".to_string());
        }

        if let Some(mag) = self.base_magnification {
            if !mag.is_finite() || mag <= 0.0 {
                return Err("base_magnification must be greater than 0".to_string());
            }
        }

        if self.thumbnail_cache == 0 {
            return Err("thumbnail_cache must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Normalized extension filter: lowercase, without leading dots.
    pub fn extension_list(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    /// Working resolution of the blur stage.
    pub fn effective_blur_work_size(&self) -> WorkSize {
        self.blur_work_size.unwrap_or(self.work_size)
    }

    pub fn blur_params(&self) -> BlurParams {
        BlurParams {
            radius: self.blur_radius,
            threshold: self.blur_threshold,
        }
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            base_magnification: self.base_magnification,
            thumbnail_cache: self.thumbnail_cache,
        }
    }

    /// Location of the batch report.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE_NAME)
    }
}

/// Options of the graph executor.
#[derive(Args, Debug, Clone)]
pub struct FlowConfig {
    #[command(flatten)]
    pub run: RunConfig,

    /// Maximum number of slides processed at once.
    #[arg(long, env = "WSI_QC_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Also write the stage graph as Graphviz DOT to this file.
    #[arg(long)]
    pub dot: Option<PathBuf>,
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.run.validate()?;
        if self.max_concurrency == Some(0) {
            return Err("max_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Configured concurrency, or the available parallelism.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Options of the `graph` command.
#[derive(Args, Debug, Clone)]
pub struct GraphConfig {
    /// Write the DOT text to this file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

// =============================================================================
// Tests
// =============================================================================
