//! Interrupted runs: crash recovery, pause, human checkpoints, cancel and errors all resume
//! to the same final state as an uninterrupted run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use gauntlet::capability::ids;
use gauntlet::graph::{nodes, CANCEL_MARKER, ERROR_MARKER, PAUSE_MARKER};
use gauntlet::{
    CapabilityError, EventSink, Feedback, FnCapability, Orchestrator, OrchestratorConfig,
    OrchestratorError, ResearchState, RunControl, RunStatus, ScriptedCapability, SqliteSaver,
};

use crate::common::{
    engine, engine_with, fast_config, json, latest_node, memory, no_constraints, research_team,
};

async fn reference() -> ResearchState {
    let engine = engine(memory());
    engine.initialize("r", "topic", no_constraints()).await.unwrap();
    engine.run("r", &RunControl::new()).await.unwrap()
}

/// **Scenario**: Killing the driver after any number of completed nodes and resuming from
/// the log with a fresh engine yields a byte-identical final state.
#[tokio::test]
async fn crash_after_any_node_resumes_identically() {
    let expected = json(&reference().await);
    for completed in 1..8 {
        let saver = memory();
        let first = engine(saver.clone());
        first.initialize("r", "topic", no_constraints()).await.unwrap();
        for _ in 0..completed {
            first.step("r").await.unwrap();
        }
        drop(first);

        let second = engine(saver.clone());
        let state = second.run("r", &RunControl::new()).await.unwrap();
        assert_eq!(json(&state), expected, "crash after {} nodes", completed);
    }
}

/// **Scenario**: An external pause writes a marker checkpoint; resuming continues to the
/// same final state.
#[tokio::test]
async fn external_pause_and_resume_matches_uninterrupted_run() {
    let engine = engine(memory());
    engine.initialize("r", "topic", no_constraints()).await.unwrap();
    for _ in 0..3 {
        engine.step("r").await.unwrap();
    }
    let control = RunControl::new();
    control.pause();
    let paused = engine.run("r", &control).await.unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    let latest = engine.checkpointer().latest("r").await.unwrap().unwrap();
    assert_eq!(latest.node_id, PAUSE_MARKER);

    engine.prepare_resume("r", None).await.unwrap();
    let state = engine.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(json(&state), json(&reference().await));
}

/// **Scenario**: With both review checkpoints enabled the run pauses twice; feedback given
/// on resume is merged before research continues.
#[tokio::test]
async fn human_checkpoints_merge_feedback() {
    let config = OrchestratorConfig {
        review_plan: true,
        final_review: true,
        ..fast_config()
    };
    let engine = engine_with(research_team(), memory(), config);
    engine.initialize("r", "topic", no_constraints()).await.unwrap();

    let at_plan = engine.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(at_plan.status, RunStatus::Paused);
    assert_eq!(at_plan.current_node_id, nodes::PLAN_REVIEW);
    assert!(at_plan.pending_human_input.is_some());
    assert_eq!(at_plan.research_questions.len(), 5);

    let feedback = Feedback {
        note: Some("prefer peer-reviewed work".into()),
        constraints: BTreeMap::from([("region".to_string(), "EU".to_string())]),
        questions: vec![],
    };
    let resumed = engine.prepare_resume("r", Some(feedback)).await.unwrap();
    assert_eq!(resumed.current_node_id, nodes::SEARCH);
    assert!(resumed.pending_human_input.is_none());

    let at_final = engine.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(at_final.status, RunStatus::Paused);
    assert_eq!(at_final.current_node_id, nodes::FINAL_REVIEW);

    engine.prepare_resume("r", None).await.unwrap();
    let done = engine.run("r", &RunControl::new()).await.unwrap();
    assert!(done.is_done());
    assert_eq!(done.constraints.get("region").map(String::as_str), Some("EU"));
    assert_eq!(done.human_feedback, vec!["prefer peer-reviewed work".to_string()]);
    assert_eq!(done.step, 10);
}

/// **Scenario**: An external pause that lands just before the plan review does not count as
/// the review: resuming runs the review node, which pauses with its prompt, and the run then
/// ends exactly like one paused only by the review.
#[tokio::test]
async fn external_pause_before_review_still_shows_review() {
    let config = OrchestratorConfig {
        review_plan: true,
        ..fast_config()
    };
    let saver = memory();
    let engine = engine_with(research_team(), saver.clone(), config.clone());
    engine.initialize("r", "topic", no_constraints()).await.unwrap();
    engine.step("r").await.unwrap();

    let control = RunControl::new();
    control.pause();
    let paused = engine.run("r", &control).await.unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.current_node_id, nodes::PLAN_REVIEW);
    assert!(paused.pending_human_input.is_none());
    assert_eq!(latest_node(saver.as_ref(), "r").await, PAUSE_MARKER);

    let resumed = engine.prepare_resume("r", None).await.unwrap();
    assert_eq!(resumed.current_node_id, nodes::PLAN_REVIEW);

    let at_review = engine.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(at_review.status, RunStatus::Paused);
    assert!(at_review.pending_human_input.is_some());
    assert_eq!(latest_node(saver.as_ref(), "r").await, nodes::PLAN_REVIEW);

    engine.prepare_resume("r", None).await.unwrap();
    let done = engine.run("r", &RunControl::new()).await.unwrap();

    let reference = engine_with(research_team(), memory(), config);
    reference.initialize("r", "topic", no_constraints()).await.unwrap();
    reference.run("r", &RunControl::new()).await.unwrap();
    reference.prepare_resume("r", None).await.unwrap();
    let expected = reference.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(json(&done), json(&expected));
}

/// **Scenario**: Cancelling during a slow search keeps the last merged state; resuming
/// with a healthy team finishes exactly like an uninterrupted run.
#[tokio::test]
async fn cancel_then_resume_matches_uninterrupted_run() {
    let saver = memory();
    let slow = research_team().with(Arc::new(
        FnCapability::noop(ids::SEARCH_SOURCES).with_delay(Duration::from_secs(30)),
    ));
    let orch = Orchestrator::from_config(slow, saver.clone(), fast_config(), EventSink::noop())
        .unwrap();
    orch.start_with_id("r", "topic", no_constraints()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    orch.cancel("r").await.unwrap();
    let cancelled = orch.wait("r").await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.current_node_id, nodes::SEARCH);
    assert!(cancelled.sources.is_empty());
    assert_eq!(latest_node(saver.as_ref(), "r").await, CANCEL_MARKER);

    let healthy =
        Orchestrator::from_config(research_team(), saver.clone(), fast_config(), EventSink::noop())
            .unwrap();
    healthy.resume("r", None).await.unwrap();
    let state = healthy.wait("r").await.unwrap();
    assert_eq!(json(&state), json(&reference().await));
}

/// **Scenario**: A fatal capability error leaves the run Errored at the failing node with
/// all earlier work intact, and the run can be resumed once the capability is fixed.
#[tokio::test]
async fn fatal_error_then_resume_completes() {
    let saver = memory();
    let broken = research_team().with(Arc::new(ScriptedCapability::new(
        ids::SCORE_SOURCES,
        vec![Err(CapabilityError::Fatal("credentials revoked".into()))],
    )));
    let engine_a = engine_with(broken, saver.clone(), fast_config());
    engine_a.initialize("r", "topic", no_constraints()).await.unwrap();
    let err = engine_a.run("r", &RunControl::new()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NodeFailed { .. }));

    let errored = engine_a.state("r").await.unwrap();
    assert!(matches!(
        errored.status,
        RunStatus::Errored { ref message } if message.contains("credentials revoked")
    ));
    assert_eq!(errored.current_node_id, nodes::ASSESS_SOURCES);
    assert_eq!(errored.sources.len(), 40);
    assert_eq!(latest_node(saver.as_ref(), "r").await, ERROR_MARKER);

    let engine_b = engine(saver.clone());
    engine_b.prepare_resume("r", None).await.unwrap();
    let state = engine_b.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(json(&state), json(&reference().await));
}

/// **Scenario**: A run checkpointed to SQLite survives the process: a new saver over the
/// same file resumes it to the same final state.
#[tokio::test]
async fn sqlite_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");

    {
        let saver = Arc::new(SqliteSaver::open(&path).unwrap());
        let first = engine(saver);
        first.initialize("r", "topic", no_constraints()).await.unwrap();
        for _ in 0..4 {
            first.step("r").await.unwrap();
        }
    }

    let saver = Arc::new(SqliteSaver::open(&path).unwrap());
    let second = engine(saver.clone());
    let state = second.run("r", &RunControl::new()).await.unwrap();
    assert_eq!(json(&state), json(&reference().await));

    let history = second.checkpointer().history("r").await.unwrap();
    assert_eq!(history.len(), 9);
    assert!(history
        .windows(2)
        .all(|w| w[1].sequence_number == w[0].sequence_number + 1));
    assert_eq!(
        second.checkpointer().list_runs().await.unwrap(),
        vec!["r".to_string()]
    );
}
