//! Uninterrupted runs: final state, determinism, checkpoint log and events.

use std::sync::Arc;

use gauntlet::graph::nodes;
use gauntlet::{EventSink, Orchestrator, Phase, RunControl, RunEvent, RunStatus, DONE, START};

use crate::common::{
    engine, fast_config, json, memory, no_constraints, research_team, QUESTIONS, SECTIONS,
    SOURCES_PER_QUESTION,
};

/// **Scenario**: A full run produces 5 questions, 40 scored sources (mean 0.81), an
/// 8-section draft, full completeness and no forced gates.
#[tokio::test]
async fn full_run_reaches_done_with_expected_artifacts() {
    let engine = engine(memory());
    engine
        .initialize("climate", "urban heat islands", no_constraints())
        .await
        .unwrap();
    let state = engine.run("climate", &RunControl::new()).await.unwrap();

    assert_eq!(state.status, RunStatus::Done);
    assert_eq!(state.phase, Phase::Done);
    assert_eq!(state.current_node_id, DONE);
    assert_eq!(state.research_questions.len(), QUESTIONS);
    assert_eq!(state.sources.len(), QUESTIONS * SOURCES_PER_QUESTION);
    assert!((state.metrics.source_quality - 0.81).abs() < 1e-9);
    assert_eq!(state.document_sections.len(), SECTIONS);
    assert!(state.metrics.completeness >= 0.8);
    assert_eq!(state.fragments.len(), QUESTIONS * 2);
    assert_eq!(state.citations.len(), QUESTIONS);
    assert!(!state.degraded);
    assert!(!state.needs_more_research);
    assert!(state.identified_gaps.is_empty());
    assert_eq!(state.step, 8);
}

/// **Scenario**: The checkpoint log has one entry per executed node, in order, with
/// strictly increasing sequence numbers.
#[tokio::test]
async fn checkpoint_log_follows_node_order() {
    let engine = engine(memory());
    engine.initialize("r", "topic", no_constraints()).await.unwrap();
    engine.run("r", &RunControl::new()).await.unwrap();

    let history = engine.checkpointer().history("r").await.unwrap();
    let visited: Vec<&str> = history.iter().map(|c| c.node_id.as_str()).collect();
    assert_eq!(
        visited,
        vec![
            START,
            nodes::DECOMPOSE,
            nodes::SEARCH,
            nodes::ASSESS_SOURCES,
            nodes::DEEP_RESEARCH,
            nodes::GAP_ANALYSIS,
            nodes::OUTLINE,
            nodes::DRAFT,
            nodes::CRITIQUE,
        ]
    );
    for (i, checkpoint) in history.iter().enumerate() {
        assert_eq!(checkpoint.sequence_number, i as u64);
    }
    assert_eq!(history[3].state.phase, Phase::DeepDive);
    assert_eq!(history[3].state.current_node_id, nodes::DEEP_RESEARCH);
}

/// **Scenario**: Two runs of the same topic under the same id end byte-identical.
#[tokio::test]
async fn identical_runs_are_byte_identical() {
    let first = engine(memory());
    let second = engine(memory());
    for engine in [&first, &second] {
        engine.initialize("same", "topic", no_constraints()).await.unwrap();
        engine.run("same", &RunControl::new()).await.unwrap();
    }
    let a = first.state("same").await.unwrap();
    let b = second.state("same").await.unwrap();
    assert_eq!(json(&a), json(&b));
}

/// **Scenario**: Monitors see RunStarted first and Finished(Done) last, plus gate decisions.
#[tokio::test]
async fn events_trace_the_run() {
    let (sink, events) = EventSink::channel(1024);
    let orch = Orchestrator::from_config(research_team(), memory(), fast_config(), sink).unwrap();
    let run_id = orch.start("topic", no_constraints()).await.unwrap();
    orch.wait(&run_id).await.unwrap();

    let mut rx = events.into_inner();
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(RunEvent::RunStarted { .. })));
    assert!(matches!(
        seen.last(),
        Some(RunEvent::Finished {
            status: RunStatus::Done,
            ..
        })
    ));
    let gates = seen
        .iter()
        .filter(|e| matches!(e, RunEvent::GateDecision { forced: None, .. }))
        .count();
    assert_eq!(gates, 3);
    assert!(seen.iter().all(|e| e.run_id() == run_id));
}

/// **Scenario**: A run submitted through the orchestrator can be listed and inspected.
#[tokio::test]
async fn orchestrator_exposes_state_and_history() {
    let orch = Orchestrator::from_config(
        research_team(),
        Arc::new(gauntlet::MemorySaver::new()),
        fast_config(),
        EventSink::noop(),
    )
    .unwrap();
    let run_id = orch.start("topic", no_constraints()).await.unwrap();
    let finished = orch.wait(&run_id).await.unwrap();
    assert_eq!(orch.get_state(&run_id).await.unwrap(), finished);
    assert_eq!(orch.history(&run_id).await.unwrap().len(), 9);
    assert_eq!(orch.list_runs().await.unwrap(), vec![run_id]);
}
