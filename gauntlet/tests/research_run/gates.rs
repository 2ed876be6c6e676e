//! Gate routing, forced advancement and fan-out branch isolation over the default graph.

use std::sync::Arc;

use gauntlet::capability::ids;
use gauntlet::graph::nodes;
use gauntlet::{
    CapabilityError, FnCapability, GraphEngine, OrchestratorConfig, ResearchState, RunControl,
    ScriptedCapability, StateDelta,
};

use crate::common::{
    engine_with, fast_config, memory, no_constraints, partial_research, research_team, QUESTIONS,
};

async fn run_to_end(engine: &GraphEngine) -> ResearchState {
    engine.initialize("r", "topic", no_constraints()).await.unwrap();
    engine.run("r", &RunControl::new()).await.unwrap()
}

async fn executions(engine: &GraphEngine, node: &str) -> usize {
    engine
        .checkpointer()
        .history("r")
        .await
        .unwrap()
        .iter()
        .filter(|c| c.node_id == node)
        .count()
}

fn uniform_scores(value: f64) -> Arc<FnCapability> {
    Arc::new(FnCapability::new(ids::SCORE_SOURCES, move |state| {
        Ok(state
            .sources
            .iter()
            .fold(StateDelta::new(), |d, s| d.with_source_score(s.id.clone(), value)))
    }))
}

fn quality_config(threshold: f64) -> OrchestratorConfig {
    let mut config = fast_config();
    config.gates.source_quality = threshold;
    config
}

/// **Scenario**: Mean source quality exactly at the threshold proceeds without a retry.
#[tokio::test]
async fn source_quality_at_threshold_proceeds() {
    let engine = engine_with(
        research_team().with(uniform_scores(0.75)),
        memory(),
        quality_config(0.75),
    );
    let state = run_to_end(&engine).await;
    assert!(state.is_done());
    assert!(!state.degraded);
    assert_eq!(executions(&engine, nodes::SEARCH).await, 1);
}

/// **Scenario**: Quality just below the threshold retries search until the iteration cap,
/// then advances with the run marked degraded and a warning recorded.
#[tokio::test]
async fn source_quality_below_threshold_retries_until_cap() {
    let engine = engine_with(
        research_team().with(uniform_scores(0.7499)),
        memory(),
        quality_config(0.75),
    );
    let state = run_to_end(&engine).await;
    assert!(state.is_done());
    assert!(state.degraded);
    assert_eq!(executions(&engine, nodes::SEARCH).await, 4);
    assert!(state
        .warnings()
        .any(|g| g.description.contains("source_quality forced advancement (IterationCap)")));
}

/// **Scenario**: Gaps that close on the second deep dive end the recursion normally.
#[tokio::test]
async fn gap_recursion_stops_once_gaps_resolve() {
    let academic = Arc::new(FnCapability::new(ids::ACADEMIC_RESEARCH, |state| {
        let questions = if state.open_gaps().next().is_some() { QUESTIONS } else { 3 };
        Ok(state
            .research_questions
            .iter()
            .take(questions)
            .fold(StateDelta::new(), |d, q| {
                d.with_fragment(gauntlet::KnowledgeFragment::new(
                    format!("{}-academic", q.id),
                    format!("academic finding for {}", q.text),
                    q.id.clone(),
                    [format!("{}-s1", q.id)],
                    0.7,
                ))
            }))
    }));
    let registry = research_team()
        .with(academic)
        .with(partial_research(ids::EXPERT_RESEARCH, "expert", 3));
    let engine = engine_with(registry, memory(), fast_config());
    let state = run_to_end(&engine).await;

    assert_eq!(executions(&engine, nodes::DEEP_RESEARCH).await, 2);
    assert!(state.is_done());
    assert!(!state.degraded);
    assert_eq!(state.metrics.completeness, 1.0);
    assert!(state.identified_gaps.iter().all(|g| g.resolved));
}

/// **Scenario**: When another deep dive adds nothing, gap recursion stops on diminishing
/// returns before the iteration cap, leaving the open gaps recorded.
#[tokio::test]
async fn gap_recursion_stops_on_diminishing_returns() {
    let registry = research_team()
        .with(partial_research(ids::ACADEMIC_RESEARCH, "academic", 3))
        .with(partial_research(ids::EXPERT_RESEARCH, "expert", 3));
    let engine = engine_with(registry, memory(), fast_config());
    let state = run_to_end(&engine).await;

    assert_eq!(executions(&engine, nodes::DEEP_RESEARCH).await, 2);
    assert!(state.is_done());
    assert!(state.degraded);
    assert!(state.needs_more_research);
    assert_eq!(state.open_gaps().count(), 2);
    assert!(state
        .warnings()
        .any(|g| g.description.contains("(DiminishingReturns)")));
}

/// **Scenario**: A draft that never gains coherence loops critique/revise until the cap.
#[tokio::test]
async fn critique_loop_is_bounded_by_iteration_cap() {
    let registry = research_team().with(Arc::new(FnCapability::noop(ids::WRITE_SECTIONS)));
    let engine = engine_with(registry, memory(), fast_config());
    let state = run_to_end(&engine).await;

    assert!(state.is_done());
    assert!(state.degraded);
    assert_eq!(executions(&engine, nodes::CRITIQUE).await, 4);
    assert_eq!(executions(&engine, nodes::REVISE).await, 3);
}

/// **Scenario**: An invalid answer from one deep-dive branch is dropped with a warning while
/// the sibling branch's fragments are merged.
#[tokio::test]
async fn failing_branch_does_not_block_its_sibling() {
    let expert = Arc::new(ScriptedCapability::new(
        ids::EXPERT_RESEARCH,
        vec![Err(CapabilityError::Invalid("malformed response".into()))],
    ));
    let engine = engine_with(research_team().with(expert), memory(), fast_config());
    let state = run_to_end(&engine).await;

    assert!(state.is_done());
    assert_eq!(state.fragments.len(), QUESTIONS);
    assert!(state.fragments.iter().all(|f| f.id.ends_with("-academic")));
    assert!(state
        .warnings()
        .any(|g| g.description.contains("expert_research degraded")));
}

/// **Scenario**: Transient failures are retried and the branch still contributes.
#[tokio::test]
async fn transient_failures_are_retried() {
    let expert = Arc::new(ScriptedCapability::failing_then(
        ids::EXPERT_RESEARCH,
        CapabilityError::Transient("rate limited".into()),
        2,
        StateDelta::new(),
    ));
    let engine = engine_with(research_team().with(expert.clone()), memory(), fast_config());
    let state = run_to_end(&engine).await;

    assert!(state.is_done());
    assert_eq!(expert.calls(), 3);
    assert_eq!(state.warnings().count(), 0);
}
