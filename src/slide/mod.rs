//! Image accessor: opens slide files and serves working-resolution rasters.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 QC stages                    │
//! └──────────────────────┬───────────────────────┘
//!                        │ thumbnail(&WorkSize)
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                 SlideHandle                  │
//! │     (LRU of rasters keyed by work size)      │
//! └──────────────────────┬───────────────────────┘
//!              ┌─────────┴──────────┐
//!              ▼                    ▼
//! ┌────────────────────┐  ┌────────────────────┐
//! │ tiled TIFF / SVS   │  │ raster (PNG, JPEG) │
//! │ (levels on demand) │  │ (decoded once)     │
//! └────────────────────┘  └────────────────────┘
//! ```

mod handle;
mod work_size;

pub use handle::{LevelInfo, OpenOptions, SlideHandle, DEFAULT_THUMBNAIL_CACHE};
pub use work_size::{Resolution, WorkSize};
