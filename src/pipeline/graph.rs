//! Dependency-graph executor.
//!
//! ```text
//!  load ──► segment ──► detect_blur ──► check_blurry ──[true]──► blurry_action
//! ```
//!
//! The same stages as the sequential driver, expressed as nodes joined by
//! data edges plus one conditional edge gated on the decision. Each slide
//! gets its own flow run; flow runs execute concurrently up to a limit, and
//! inside a flow every node is scheduled as a separate task that starts only
//! after its upstream nodes succeeded.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, Instrument};

use crate::config::RunConfig;
use crate::error::{GraphError, QcError};
use crate::qc::{slide_id_for, SlideRecord};

use super::report::{
    BatchClock, BatchReport, ExecutionMode, NodeReport, NodeState, Reporter, SlideReport,
};
use super::stages::{self, LoadedSlide, StageFailure, StageId};

// =============================================================================
// Graph Definition
// =============================================================================

/// How an edge gates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The target consumes the source's output
    Data,
    /// The target runs only when the source's decision equals the value
    When(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: StageId,
    pub to: StageId,
    pub kind: EdgeKind,
}

/// A directed graph of stages.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<StageId>,
    edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard QC flow.
    pub fn qc_flow() -> Self {
        let mut graph = Self::new();
        for node in [
            StageId::Load,
            StageId::Segment,
            StageId::DetectBlur,
            StageId::CheckBlurry,
            StageId::BlurryAction,
        ] {
            graph.add_node(node);
        }
        graph.add_edge(StageId::Load, StageId::Segment);
        graph.add_edge(StageId::Segment, StageId::DetectBlur);
        graph.add_edge(StageId::DetectBlur, StageId::CheckBlurry);
        graph.add_conditional_edge(StageId::CheckBlurry, StageId::BlurryAction, true);
        graph
    }

    pub fn add_node(&mut self, node: StageId) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, from: StageId, to: StageId) {
        self.edges.push(Edge {
            from,
            to,
            kind: EdgeKind::Data,
        });
    }

    pub fn add_conditional_edge(&mut self, from: StageId, to: StageId, when: bool) {
        self.edges.push(Edge {
            from,
            to,
            kind: EdgeKind::When(when),
        });
    }

    pub fn nodes(&self) -> &[StageId] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges arriving at `node`.
    pub fn upstream(&self, node: StageId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == node)
    }

    /// Check the graph is well formed and executable.
    ///
    /// Rejects duplicate nodes, edges to unknown nodes, conditional edges
    /// from stages that produce no decision, stages without an edge from the
    /// stage producing their input, and cycles.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (i, node) in self.nodes.iter().enumerate() {
            if self.nodes[..i].contains(node) {
                return Err(GraphError::DuplicateNode(node.name()));
            }
        }

        for edge in &self.edges {
            if !self.nodes.contains(&edge.from) || !self.nodes.contains(&edge.to) {
                return Err(GraphError::DanglingEdge {
                    from: edge.from.name(),
                    to: edge.to.name(),
                });
            }
            if matches!(edge.kind, EdgeKind::When(_)) && !edge.from.produces_decision() {
                return Err(GraphError::InvalidGate(edge.from.name()));
            }
        }

        for &node in &self.nodes {
            if let Some(requires) = input_of(node) {
                if !self.upstream(node).any(|e| e.from == requires) {
                    return Err(GraphError::MissingInput {
                        node: node.name(),
                        requires: requires.name(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Nodes in dependency order. Ties resolve in insertion order, so the
    /// schedule is stable.
    pub fn topological_order(&self) -> Result<Vec<StageId>, GraphError> {
        let mut in_degree: HashMap<StageId, usize> = self.nodes.iter().map(|&n| (n, 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(&edge.to) {
                *degree += 1;
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while order.len() < self.nodes.len() {
            let next = self
                .nodes
                .iter()
                .copied()
                .find(|n| !order.contains(n) && in_degree.get(n) == Some(&0));

            let Some(node) = next else {
                let stuck = self
                    .nodes
                    .iter()
                    .find(|n| !order.contains(*n))
                    .map_or("unknown", |n| n.name());
                return Err(GraphError::Cycle(stuck));
            };

            for edge in self.edges.iter().filter(|e| e.from == node) {
                if let Some(degree) = in_degree.get_mut(&edge.to) {
                    *degree = degree.saturating_sub(1);
                }
            }
            order.push(node);
        }

        Ok(order)
    }

    /// Graphviz rendering of the flow.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph qc_flow {\n    rankdir=LR;\n    node [shape=box];\n");
        for node in &self.nodes {
            let _ = writeln!(dot, "    {};", node.name());
        }
        for edge in &self.edges {
            let _ = match edge.kind {
                EdgeKind::Data => writeln!(dot, "    {} -> {};", edge.from.name(), edge.to.name()),
                EdgeKind::When(value) => writeln!(
                    dot,
                    "    {} -> {} [label=\"{}\", style=dashed];",
                    edge.from.name(),
                    edge.to.name(),
                    value
                ),
            };
        }
        dot.push_str("}\n");
        dot
    }
}

/// The stage whose output `node` consumes.
fn input_of(node: StageId) -> Option<StageId> {
    match node {
        StageId::Load => None,
        StageId::Segment => Some(StageId::Load),
        StageId::DetectBlur => Some(StageId::Segment),
        StageId::CheckBlurry => Some(StageId::DetectBlur),
        StageId::BlurryAction => Some(StageId::CheckBlurry),
    }
}

// =============================================================================
// Executor
// =============================================================================

/// State of one flow run, moved into each node and back out.
#[derive(Debug, Default)]
struct FlowData {
    slide: Option<LoadedSlide>,
    blurry_fraction: Option<f64>,
    blurry: Option<bool>,
    advised: bool,
}

/// What a node should do given its upstream states.
enum Readiness {
    Run,
    Skip,
    UpstreamFailed,
}

/// Runs a validated [`FlowGraph`] over a batch of slides.
#[derive(Debug, Clone)]
pub struct GraphExecutor {
    graph: Arc<FlowGraph>,
    schedule: Arc<Vec<StageId>>,
    max_concurrency: usize,
}

impl GraphExecutor {
    pub fn new(graph: FlowGraph, max_concurrency: usize) -> Result<Self, GraphError> {
        graph.validate()?;
        let schedule = graph.topological_order()?;
        Ok(Self {
            graph: Arc::new(graph),
            schedule: Arc::new(schedule),
            max_concurrency: max_concurrency.max(1),
        })
    }

    pub fn schedule(&self) -> &[StageId] {
        &self.schedule
    }

    /// Run one flow per slide, at most `max_concurrency` at a time.
    ///
    /// Reports come back in the order of `files`.
    pub async fn run(
        &self,
        files: &[PathBuf],
        config: &RunConfig,
        reporter: &Reporter,
    ) -> BatchReport {
        let clock = BatchClock::start();
        let config = Arc::new(config.clone());
        let permits = Arc::new(Semaphore::new(self.max_concurrency));

        info!(
            parent: reporter.span(),
            slides = files.len(),
            max_concurrency = self.max_concurrency,
            "Starting flow runs"
        );

        let handles: Vec<_> = files
            .iter()
            .map(|path| {
                let executor = self.clone();
                let config = Arc::clone(&config);
                let permits = Arc::clone(&permits);
                let path = path.clone();
                let fallback = fresh_record(&path, &config);
                let slide_reporter = reporter.for_slide(&slide_id_for(&path));
                let span = slide_reporter.span().clone();
                let handle = tokio::spawn(
                    async move {
                        // The semaphore is never closed
                        let _permit = permits.acquire_owned().await.ok();
                        executor.run_flow(path, config, slide_reporter).await
                    }
                    .instrument(span),
                );
                (fallback, handle)
            })
            .collect();

        let mut slides = Vec::with_capacity(handles.len());
        for (record, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        parent: reporter.span(),
                        slide = %record.slide_id,
                        error = %e,
                        "Flow run aborted"
                    );
                    SlideReport::failed(StageFailure {
                        stage: StageId::Load,
                        error: QcError::Task(e.to_string()),
                        record,
                    })
                }
            };
            slides.push(report);
        }

        let batch = clock.finish(ExecutionMode::Graph, slides, reporter);
        info!(
            parent: reporter.span(),
            completed = batch.completed(),
            failed = batch.failed(),
            flagged = batch.flagged(),
            elapsed_ms = batch.elapsed_ms,
            "Flow runs finished"
        );
        batch
    }

    /// Run every node of the schedule for one slide.
    async fn run_flow(
        &self,
        path: PathBuf,
        config: Arc<RunConfig>,
        reporter: Reporter,
    ) -> SlideReport {
        let mut states: HashMap<StageId, NodeState> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.schedule.len());
        let mut data = Some(FlowData::default());
        let mut failure: Option<StageFailure> = None;

        for &node in self.schedule.iter() {
            let readiness = match (&data, self.readiness(node, &states, data.as_ref())) {
                (None, Readiness::Run) => Readiness::UpstreamFailed,
                (_, readiness) => readiness,
            };

            let state = match readiness {
                Readiness::Skip => NodeState::Skipped,
                Readiness::UpstreamFailed => NodeState::UpstreamFailed,
                Readiness::Run => {
                    let input = data.take().unwrap_or_default();
                    let task = tokio::spawn(
                        execute(node, input, path.clone(), Arc::clone(&config), reporter.clone())
                            .instrument(reporter.span().clone()),
                    );
                    match task.await {
                        Ok(Ok(output)) => {
                            data = Some(output);
                            NodeState::Success
                        }
                        Ok(Err(stage_failure)) => {
                            let message = stage_failure.error.to_string();
                            error!(
                                parent: reporter.span(),
                                node = %node,
                                error = %message,
                                "Node failed"
                            );
                            failure = Some(stage_failure);
                            NodeState::Failed(message)
                        }
                        Err(e) => {
                            let message = e.to_string();
                            error!(
                                parent: reporter.span(),
                                node = %node,
                                error = %message,
                                "Node task aborted"
                            );
                            failure = Some(StageFailure {
                                stage: node,
                                error: QcError::Task(message.clone()),
                                record: fresh_record(&path, &config),
                            });
                            NodeState::Failed(message)
                        }
                    }
                }
            };

            debug!(parent: reporter.span(), node = %node, state = ?state, "Node finished");
            states.insert(node, state.clone());
            nodes.push(NodeReport { stage: node, state });
        }

        let report = match (failure, data) {
            (Some(failure), _) => SlideReport::failed(failure),
            (None, Some(FlowData { slide: Some(slide), blurry, advised, .. })) => {
                SlideReport::completed(slide.record, blurry, advised)
            }
            (None, _) => SlideReport::failed(StageFailure {
                stage: StageId::Load,
                error: QcError::Task("flow finished without loading the slide".to_string()),
                record: fresh_record(&path, &config),
            }),
        };
        report.with_nodes(nodes)
    }

    fn readiness(
        &self,
        node: StageId,
        states: &HashMap<StageId, NodeState>,
        data: Option<&FlowData>,
    ) -> Readiness {
        let mut readiness = Readiness::Run;
        for edge in self.graph.upstream(node) {
            match states.get(&edge.from) {
                Some(NodeState::Failed(_)) | Some(NodeState::UpstreamFailed) => {
                    return Readiness::UpstreamFailed;
                }
                Some(NodeState::Skipped) | None => readiness = Readiness::Skip,
                Some(NodeState::Success) => {
                    if let EdgeKind::When(expected) = edge.kind {
                        if data.and_then(|d| d.blurry) != Some(expected) {
                            readiness = Readiness::Skip;
                        }
                    }
                }
            }
        }
        readiness
    }
}

/// A record to report against when a flow's own record was lost.
fn fresh_record(path: &Path, config: &RunConfig) -> SlideRecord {
    SlideRecord::new(
        path,
        &config.output_dir,
        config.work_size,
        config.mask_statistics,
    )
}

/// Execute one node against the flow state.
async fn execute(
    node: StageId,
    mut data: FlowData,
    path: PathBuf,
    config: Arc<RunConfig>,
    reporter: Reporter,
) -> Result<FlowData, StageFailure> {
    match node {
        StageId::Load => {
            data.slide = Some(stages::load(&path, &config, &reporter).await?);
        }
        StageId::Segment => {
            let slide = take_slide(&mut data, node, &path, &config)?;
            data.slide = Some(stages::segment(slide, &reporter).await?);
        }
        StageId::DetectBlur => {
            let slide = take_slide(&mut data, node, &path, &config)?;
            let (slide, fraction) = stages::detect_blur(slide, &config, &reporter).await?;
            data.slide = Some(slide);
            data.blurry_fraction = Some(fraction);
        }
        StageId::CheckBlurry => {
            let (record, fraction) = decision_input(&data, node, &path, &config)?;
            data.blurry = Some(stages::decide(record, fraction, config.blur_max, &reporter));
        }
        StageId::BlurryAction => {
            let (record, fraction) = decision_input(&data, node, &path, &config)?;
            stages::advise(record, fraction, config.blur_max, &reporter);
            data.advised = true;
        }
    }
    Ok(data)
}

fn missing_input(node: StageId, path: &Path, config: &RunConfig) -> StageFailure {
    StageFailure {
        stage: node,
        error: QcError::Task(format!("{} ran without its input", node)),
        record: fresh_record(path, config),
    }
}

fn take_slide(
    data: &mut FlowData,
    node: StageId,
    path: &Path,
    config: &RunConfig,
) -> Result<LoadedSlide, StageFailure> {
    data.slide
        .take()
        .ok_or_else(|| missing_input(node, path, config))
}

fn decision_input<'a>(
    data: &'a FlowData,
    node: StageId,
    path: &Path,
    config: &RunConfig,
) -> Result<(&'a SlideRecord, f64), StageFailure> {
    match (&data.slide, data.blurry_fraction) {
        (Some(slide), Some(fraction)) => Ok((&slide.record, fraction)),
        _ => Err(missing_input(node, path, config)),
    }
}
