//! The analytic core: tissue segmentation, blur detection and the decision.
//!
//! Everything here is synchronous and works on rasters already in memory;
//! reading slides and scheduling stages live in [`crate::slide`] and
//! [`crate::pipeline`].
//!
//! ```text
//! raster ──► segment_tissue ──► tissue mask
//!   │                               │
//!   └──────────► detect_blur ◄──────┘
//!                    │
//!                    ├──► blur mask, refined tissue mask
//!                    └──► blurry_fraction ──► decide(> blur_max) ──► Advisory
//! ```

pub mod artifact;
pub mod blur;
pub mod decision;
pub mod mask;
pub mod metrics;
pub mod record;
pub mod segmentation;

pub use artifact::{write_mask_png, BLUR_ARTIFACT, TISSUE_ARTIFACT};
pub use blur::{
    align_indicator, compose_blur, detect_blur, low_energy_indicator, BlurDetection, BlurParams,
    DEFAULT_BLUR_RADIUS, DEFAULT_BLUR_THRESHOLD,
};
pub use decision::{decide, Advisory, DEFAULT_BLUR_MAX};
pub use mask::Mask;
pub use metrics::{MaskStatistic, MetricSet, MetricValue};
pub use record::{slide_id_for, SlideRecord};
pub use segmentation::{segment_tissue, TissueSegmentation};
