//! Batch execution.
//!
//! The QC stages live in [`stages`] and are shared by two thin drivers:
//!
//! ```text
//!                      ┌──────────────┐
//!                 ┌───►│ BatchDriver  │  one slide at a time
//! discover_slides │    └──────────────┘
//!                 │    ┌──────────────┐
//!                 └───►│GraphExecutor │  one flow per slide, bounded concurrency
//!                      └──────────────┘
//!                              │
//!                              ▼
//!                 BatchReport ─► qc_results.json
//! ```

mod graph;
mod report;
mod sequential;
pub mod stages;

pub use graph::{Edge, EdgeKind, FlowGraph, GraphExecutor};
pub use report::{
    BatchReport, ExecutionMode, NodeReport, NodeState, Reporter, SlideOutcome, SlideReport,
};
pub use sequential::{discover_slides, process_slide, BatchDriver};
pub use stages::{LoadedSlide, StageFailure, StageId};
