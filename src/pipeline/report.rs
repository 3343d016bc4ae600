//! Logging scope and the batch report.
//!
//! A [`Reporter`] carries the tracing span every message of a slide is logged
//! under, plus the shared sink advisories are collected into. The
//! [`BatchReport`] is the JSON summary written to `qc_results.json`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info_span, warn, Span};

use crate::qc::{Advisory, MetricSet, SlideRecord};

use super::stages::{StageFailure, StageId};

// =============================================================================
// Reporter
// =============================================================================

/// Per-batch or per-slide logging scope.
///
/// Cloning is cheap; clones share the advisory sink.
#[derive(Debug, Clone)]
pub struct Reporter {
    span: Span,
    advisories: Arc<Mutex<Vec<Advisory>>>,
}

impl Reporter {
    /// Root reporter for a batch run in `mode`.
    pub fn new(mode: &str) -> Self {
        Self {
            span: info_span!("qc_batch", mode),
            advisories: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Child reporter scoped to one slide.
    pub fn for_slide(&self, slide_id: &str) -> Self {
        Self {
            span: info_span!(parent: &self.span, "slide", id = %slide_id),
            advisories: Arc::clone(&self.advisories),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Emit an advisory at warning level and keep it for the report.
    pub fn advise(&self, advisory: Advisory) {
        warn!(
            parent: &self.span,
            slide = %advisory.slide_id,
            percent_blurry = advisory.percent_blurry(),
            "{}",
            advisory.message()
        );
        self.advisories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(advisory);
    }

    /// Advisories raised so far, in emission order.
    pub fn advisories(&self) -> Vec<Advisory> {
        self.advisories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

// =============================================================================
// Report Types
// =============================================================================

/// How a batch was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Graph,
}

impl ExecutionMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Graph => "graph",
        }
    }
}

/// Final state of a node in one slide's flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum NodeState {
    Success,
    /// A gating condition was not met
    Skipped,
    Failed(String),
    /// A dependency failed
    UpstreamFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub stage: StageId,
    #[serde(flatten)]
    pub state: NodeState,
}

/// How far a slide got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlideOutcome {
    Completed,
    Failed { stage: StageId, error: String },
}

/// Everything reported about one slide.
#[derive(Debug, Clone, Serialize)]
pub struct SlideReport {
    pub slide_id: String,
    pub path: String,
    #[serde(flatten)]
    pub outcome: SlideOutcome,
    pub metrics: MetricSet,
    /// Blur decision, when the slide got that far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blurry: Option<bool>,
    /// Whether the rescan advisory was raised
    pub advised: bool,
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifact_errors: Vec<String>,
    /// SHA-256 of each final mask, keyed by mask name
    pub mask_digests: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeReport>,
}

impl SlideReport {
    pub fn completed(record: SlideRecord, blurry: Option<bool>, advised: bool) -> Self {
        let mut report = Self::from_record(record, SlideOutcome::Completed, blurry);
        report.advised = advised;
        report
    }

    pub fn failed(failure: StageFailure) -> Self {
        let outcome = SlideOutcome::Failed {
            stage: failure.stage,
            error: failure.error.to_string(),
        };
        Self::from_record(failure.record, outcome, None)
    }

    /// Attach per-node states from a graph run.
    pub fn with_nodes(mut self, nodes: Vec<NodeReport>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SlideOutcome::Completed
    }

    fn from_record(record: SlideRecord, outcome: SlideOutcome, blurry: Option<bool>) -> Self {
        let mut mask_digests = BTreeMap::new();
        if let Some(mask) = &record.tissue_mask {
            mask_digests.insert("tissue".to_string(), mask.sha256_hex());
        }
        if let Some(mask) = &record.blur_mask {
            mask_digests.insert("blur".to_string(), mask.sha256_hex());
        }

        Self {
            slide_id: record.slide_id,
            path: record.path.display().to_string(),
            outcome,
            metrics: record.metrics,
            blurry,
            advised: false,
            artifacts: record
                .artifacts
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            artifact_errors: record.artifact_errors,
            mask_digests,
            nodes: Vec::new(),
        }
    }
}

/// Summary of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: ExecutionMode,
    pub started_at_unix_ms: u64,
    pub elapsed_ms: u64,
    pub slides: Vec<SlideReport>,
    pub advisories: Vec<Advisory>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.slides.iter().filter(|s| s.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.slides.len() - self.completed()
    }

    /// Slides whose blur decision came out true.
    pub fn flagged(&self) -> usize {
        self.slides.iter().filter(|s| s.blurry == Some(true)).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = self.to_json().map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await
    }
}

/// Wall-clock bookkeeping for a batch.
#[derive(Debug)]
pub(crate) struct BatchClock {
    started_at_unix_ms: u64,
    started: Instant,
}

impl BatchClock {
    pub(crate) fn start() -> Self {
        let started_at_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            started_at_unix_ms,
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(
        self,
        mode: ExecutionMode,
        slides: Vec<SlideReport>,
        reporter: &Reporter,
    ) -> BatchReport {
        BatchReport {
            mode,
            started_at_unix_ms: self.started_at_unix_ms,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            slides,
            advisories: reporter.advisories(),
        }
    }
}
