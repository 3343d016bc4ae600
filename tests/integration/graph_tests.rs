//! Graph executor integration tests.
//!
//! Tests verify:
//! - Node states per flow: gated action skipped, failures propagate downstream
//! - Concurrent flows never leak state between slides
//! - The graph and sequential modes produce identical masks and metrics

use std::path::PathBuf;

use wsi_qc::{
    discover_slides, BatchDriver, ExecutionMode, FlowGraph, GraphExecutor, NodeState, Reporter,
    SlideReport, StageId, WorkSize,
};

use super::test_utils::{blurry_slide, encode_png, png_config, sharp_slide, ScratchDir};

fn states(slide: &SlideReport) -> Vec<(StageId, NodeState)> {
    slide
        .nodes
        .iter()
        .map(|n| (n.stage, n.state.clone()))
        .collect()
}

async fn files_in(dir: &ScratchDir) -> Vec<PathBuf> {
    discover_slides(dir.path(), &["png".to_string()]).await.unwrap()
}

#[tokio::test]
async fn test_node_states_per_slide() {
    let input = ScratchDir::new("graph-in");
    let output = ScratchDir::new("graph-out");
    input.write("blurry.png", &encode_png(&blurry_slide()));
    input.write("corrupt.png", b"nope");
    input.write("sharp.png", &encode_png(&sharp_slide()));

    let config = png_config(input.path(), output.path());
    let executor = GraphExecutor::new(FlowGraph::qc_flow(), 3).unwrap();
    let files = files_in(&input).await;
    let report = executor.run(&files, &config, &Reporter::new("graph")).await;

    assert_eq!(report.mode, ExecutionMode::Graph);
    assert_eq!(report.slides.len(), 3);

    // Blurry: every node ran, the action fired
    let blurry = &report.slides[0];
    assert_eq!(blurry.slide_id, "blurry");
    assert!(blurry
        .nodes
        .iter()
        .all(|n| n.state == NodeState::Success));
    assert_eq!(blurry.blurry, Some(true));
    assert!(blurry.advised);

    // Corrupt: load failed, everything downstream marked
    let corrupt = &report.slides[1];
    let corrupt_states = states(corrupt);
    assert!(matches!(corrupt_states[0], (StageId::Load, NodeState::Failed(_))));
    for (_, state) in &corrupt_states[1..] {
        assert_eq!(*state, NodeState::UpstreamFailed);
    }
    assert!(!corrupt.is_completed());

    // Sharp: decision false, so the gated action is skipped
    let sharp = &report.slides[2];
    assert_eq!(
        states(sharp),
        vec![
            (StageId::Load, NodeState::Success),
            (StageId::Segment, NodeState::Success),
            (StageId::DetectBlur, NodeState::Success),
            (StageId::CheckBlurry, NodeState::Success),
            (StageId::BlurryAction, NodeState::Skipped),
        ]
    );
    assert!(sharp.is_completed());
    assert_eq!(sharp.blurry, Some(false));
    assert!(!sharp.advised);

    assert_eq!(report.advisories.len(), 1);
    assert_eq!(report.advisories[0].slide_id, "blurry");
}

#[tokio::test]
async fn test_blur_failure_keeps_tissue_artifact() {
    let input = ScratchDir::new("graph-fail-in");
    let output = ScratchDir::new("graph-fail-out");
    input.write("slide.png", &encode_png(&blurry_slide()));

    let mut config = png_config(input.path(), output.path());
    config.blur_work_size = Some(WorkSize::Magnification(2.5));
    let executor = GraphExecutor::new(FlowGraph::qc_flow(), 1).unwrap();
    let report = executor
        .run(&files_in(&input).await, &config, &Reporter::new("graph"))
        .await;

    let slide = &report.slides[0];
    let slide_states = states(slide);
    assert_eq!(slide_states[0].1, NodeState::Success);
    assert_eq!(slide_states[1].1, NodeState::Success);
    assert!(matches!(slide_states[2].1, NodeState::Failed(_)));
    assert_eq!(slide_states[3].1, NodeState::UpstreamFailed);
    assert_eq!(slide_states[4].1, NodeState::UpstreamFailed);

    assert!(output.join("slide_tissue_seg.png").exists());
    assert_eq!(slide.artifacts.len(), 1);
}

#[tokio::test]
async fn test_concurrent_flows_are_isolated() {
    let input = ScratchDir::new("graph-iso-in");
    let output = ScratchDir::new("graph-iso-out");
    for i in 0..4 {
        input.write(&format!("sharp-{}.png", i), &encode_png(&sharp_slide()));
        input.write(&format!("blurry-{}.png", i), &encode_png(&blurry_slide()));
    }

    let config = png_config(input.path(), output.path());
    let files = files_in(&input).await;
    let executor = GraphExecutor::new(FlowGraph::qc_flow(), 8).unwrap();
    let report = executor.run(&files, &config, &Reporter::new("graph")).await;
    assert_eq!(report.completed(), 8);

    let digests_of = |prefix: &str| -> Vec<_> {
        report
            .slides
            .iter()
            .filter(|s| s.slide_id.starts_with(prefix))
            .map(|s| s.mask_digests.clone())
            .collect()
    };

    // Identical inputs give identical masks, distinct inputs distinct masks
    let sharp = digests_of("sharp-");
    let blurry = digests_of("blurry-");
    assert_eq!(sharp.len(), 4);
    assert_eq!(blurry.len(), 4);
    assert!(sharp.windows(2).all(|w| w[0] == w[1]));
    assert!(blurry.windows(2).all(|w| w[0] == w[1]));
    assert_ne!(sharp[0]["blur"], blurry[0]["blur"]);

    for slide in &report.slides {
        let expected = slide.slide_id.starts_with("blurry-");
        assert_eq!(slide.blurry, Some(expected), "{}", slide.slide_id);
    }
    assert_eq!(report.advisories.len(), 4);
    assert!(report
        .advisories
        .iter()
        .all(|a| a.slide_id.starts_with("blurry-")));
}

#[tokio::test]
async fn test_graph_matches_sequential() {
    let input = ScratchDir::new("graph-eq-in");
    let seq_out = ScratchDir::new("graph-eq-seq");
    let graph_out = ScratchDir::new("graph-eq-graph");
    input.write("a.png", &encode_png(&sharp_slide()));
    input.write("b.png", &encode_png(&blurry_slide()));

    let sequential = BatchDriver::new(png_config(input.path(), seq_out.path()))
        .run(&Reporter::new("sequential"))
        .await
        .unwrap();

    let executor = GraphExecutor::new(FlowGraph::qc_flow(), 2).unwrap();
    let graph = executor
        .run(
            &files_in(&input).await,
            &png_config(input.path(), graph_out.path()),
            &Reporter::new("graph"),
        )
        .await;

    assert_eq!(sequential.slides.len(), graph.slides.len());
    for (s, g) in sequential.slides.iter().zip(&graph.slides) {
        assert_eq!(s.slide_id, g.slide_id);
        assert_eq!(s.mask_digests, g.mask_digests);
        assert_eq!(s.blurry, g.blurry);
        assert_eq!(s.advised, g.advised);
        assert_eq!(s.metrics, g.metrics);
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let output = ScratchDir::new("graph-empty");
    let config = png_config(output.path(), output.path());
    let executor = GraphExecutor::new(FlowGraph::qc_flow(), 4).unwrap();
    let report = executor.run(&[], &config, &Reporter::new("graph")).await;
    assert!(report.slides.is_empty());
    assert!(report.advisories.is_empty());
}
