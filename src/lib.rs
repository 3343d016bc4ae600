//! # WSI QC
//!
//! Automated quality control for Whole Slide Images (WSI).
//!
//! For every slide in a directory, the library segments tissue on a
//! low-resolution rendition, finds out-of-focus regions inside that tissue,
//! and flags the slide for rescanning when too much of it is blurry. Binary
//! masks are written next to a JSON batch report.
//!
//! ## Features
//!
//! - **Native slide access**: TIFF/BigTIFF pyramids (Aperio SVS included) read
//!   tile by tile, plus plain rasters through the `image` crate
//! - **Working resolutions**: magnification (`1.25x`), downscale factor,
//!   pyramid level or maximum dimension
//! - **Tissue segmentation**: Otsu threshold on inverted luminance, dilated
//! - **Blur detection**: smoothed Laplacian energy inside the tissue mask
//! - **Two execution modes**: a sequential driver and a concurrent
//!   dependency-graph executor over the same stage implementations
//!
//! ## Architecture
//!
//! - [`io`] - Async range readers over files and memory
//! - [`mod@format`] - TIFF/SVS parsing, JPEG table handling, level stitching
//! - [`slide`] - Slide handles and working-resolution thumbnails
//! - [`qc`] - Masks, metrics, segmentation, blur detection and the decision
//! - [`pipeline`] - Stage adapters, drivers and the batch report
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_qc::{BatchDriver, Reporter, RunConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RunConfig::new("/data/slides", "/data/qc");
//!     let reporter = Reporter::new("sequential");
//!     let report = BatchDriver::new(config).run(&reporter).await.unwrap();
//!     println!("{} slide(s) flagged", report.flagged());
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod qc;
pub mod slide;

// Re-export commonly used types
pub use config::{Cli, Command, FlowConfig, GraphConfig, RunConfig};
pub use error::{GraphError, IoError, QcError, SlideError, TiffError};
pub use format::{SlideFormat, SvsMetadata, TiffPyramid};
pub use io::{FileRangeReader, MemoryRangeReader, RangeReader};
pub use pipeline::{
    discover_slides, BatchDriver, BatchReport, ExecutionMode, FlowGraph, GraphExecutor,
    NodeState, Reporter, SlideOutcome, SlideReport, StageId,
};
pub use qc::{
    decide, detect_blur, segment_tissue, Advisory, BlurParams, Mask, MaskStatistic, MetricSet,
    MetricValue, SlideRecord,
};
pub use slide::{OpenOptions, SlideHandle, WorkSize};
