//! Shared fixtures for research run tests: a deterministic research team and engine builders.
//!
//! Every capability here is a pure function of the state it is handed, so two runs over the
//! same topic produce identical states no matter how they are interrupted.

use std::collections::BTreeMap;
use std::sync::Arc;

use gauntlet::capability::ids;
use gauntlet::{
    research_graph, Checkpointer, Citation, FnCapability, GraphEngine, KnowledgeFragment,
    MemorySaver, OrchestratorConfig, Outline, Question, ResearchState, Section, Source,
    SourceType, StateDelta,
};
use gauntlet::{Capability, CapabilityRegistry, Gap};

pub const QUESTIONS: usize = 5;
pub const SOURCES_PER_QUESTION: usize = 8;
pub const SECTIONS: usize = 8;

pub fn question_id(n: usize) -> String {
    format!("q{}", n)
}

fn decompose(state: &ResearchState) -> StateDelta {
    (1..=QUESTIONS).fold(StateDelta::new(), |delta, n| {
        delta.with_question(Question::new(
            question_id(n),
            format!("{}: aspect {}", state.topic, n),
            n as u8,
        ))
    })
}

fn search(state: &ResearchState) -> StateDelta {
    let mut delta = StateDelta::new();
    for question in &state.research_questions {
        for n in 1..=SOURCES_PER_QUESTION {
            let source_type = if n % 2 == 0 {
                SourceType::Academic
            } else {
                SourceType::Web
            };
            delta = delta.with_source(Source::new(
                format!("{}-s{}", question.id, n),
                format!("https://example.org/{}/{}", question.id, n),
                source_type,
            ));
        }
    }
    delta
}

/// Alternates 0.76 and 0.86 so the mean over an even count is 0.81.
fn score(state: &ResearchState) -> StateDelta {
    state
        .sources
        .iter()
        .enumerate()
        .filter(|(_, s)| s.quality_score.is_none())
        .fold(StateDelta::new(), |delta, (i, s)| {
            delta.with_source_score(s.id.clone(), if i % 2 == 0 { 0.76 } else { 0.86 })
        })
}

fn research(state: &ResearchState, kind: &str, questions: usize) -> StateDelta {
    state
        .research_questions
        .iter()
        .take(questions)
        .fold(StateDelta::new(), |delta, q| {
            delta.with_fragment(KnowledgeFragment::new(
                format!("{}-{}", q.id, kind),
                format!("{} finding for {}", kind, q.text),
                q.id.clone(),
                [format!("{}-s1", q.id), format!("{}-s2", q.id)],
                0.8,
            ))
        })
}

/// Opens a coverage gap for every question without a fragment and resolves the rest.
fn analyze_gaps(state: &ResearchState) -> StateDelta {
    let mut delta = StateDelta::new();
    for q in &state.research_questions {
        let gap_id = format!("gap-{}", q.id);
        let covered = state.fragments.iter().any(|f| f.question_id == q.id);
        if covered {
            if state.identified_gaps.iter().any(|g| g.id == gap_id) {
                delta = delta.resolving(gap_id);
            }
        } else {
            delta = delta.with_gap(Gap::coverage(gap_id, q.id.clone(), "no evidence", q.priority));
        }
    }
    delta
}

fn outline(state: &ResearchState) -> StateDelta {
    let sections = (1..=SECTIONS)
        .map(|n| {
            let mut section = Section::new(format!("sec{}", n), format!("Section {}", n));
            if n <= QUESTIONS {
                let fragment_id = format!("{}-academic", question_id(n));
                if state.fragment(&fragment_id).is_some() {
                    section.evidence_fragment_ids.push(fragment_id);
                }
            }
            section
        })
        .collect();
    StateDelta::new().with_outline(Outline { sections })
}

fn write_sections(state: &ResearchState) -> StateDelta {
    let Some(outline) = &state.outline else {
        return StateDelta::new();
    };
    outline.sections.iter().fold(StateDelta::new(), |delta, s| {
        delta.with_section(s.id.clone(), format!("Draft of {}.", s.heading))
    })
}

fn compile_citations(state: &ResearchState) -> StateDelta {
    let Some(outline) = &state.outline else {
        return StateDelta::new();
    };
    let mut delta = StateDelta::new();
    for section in &outline.sections {
        for fragment_id in &section.evidence_fragment_ids {
            delta.citations.push(Citation {
                fragment_id: fragment_id.clone(),
                locator: section.id.clone(),
            });
        }
    }
    delta
}

fn cap(
    id: &str,
    f: impl Fn(&ResearchState) -> StateDelta + Send + Sync + 'static,
) -> Arc<dyn Capability> {
    Arc::new(FnCapability::new(id, move |state| Ok(f(state))))
}

/// A research team that produces 5 questions, 40 sources (mean quality 0.81), one fragment
/// per question from each deep-dive branch, and an 8-section drafted document.
pub fn research_team() -> CapabilityRegistry {
    CapabilityRegistry::new()
        .with(cap(ids::DECOMPOSE_TOPIC, decompose))
        .with(cap(ids::SEARCH_SOURCES, search))
        .with(cap(ids::SCORE_SOURCES, score))
        .with(cap(ids::ACADEMIC_RESEARCH, |s| research(s, "academic", QUESTIONS)))
        .with(cap(ids::EXPERT_RESEARCH, |s| research(s, "expert", QUESTIONS)))
        .with(cap(ids::ANALYZE_GAPS, analyze_gaps))
        .with(cap(ids::BUILD_OUTLINE, outline))
        .with(cap(ids::WRITE_SECTIONS, write_sections))
        .with(cap(ids::COMPILE_CITATIONS, compile_citations))
        .with(Arc::new(FnCapability::noop(ids::CRITIQUE_DRAFT)))
        .with(Arc::new(FnCapability::noop(ids::REVISE_DRAFT)))
}

/// Deep-dive branch that only covers the first `questions` questions.
pub fn partial_research(id: &str, kind: &'static str, questions: usize) -> Arc<dyn Capability> {
    cap(id, move |s| research(s, kind, questions))
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_initial_ms: 1,
        retry_max_ms: 5,
        ..OrchestratorConfig::default()
    }
}

pub fn engine_with(
    registry: CapabilityRegistry,
    checkpointer: Arc<dyn Checkpointer>,
    config: OrchestratorConfig,
) -> GraphEngine {
    let table = research_graph(&config).expect("default graph is valid");
    GraphEngine::new(table, registry, checkpointer, config).expect("engine")
}

pub fn engine(checkpointer: Arc<dyn Checkpointer>) -> GraphEngine {
    engine_with(research_team(), checkpointer, fast_config())
}

pub fn memory() -> Arc<MemorySaver> {
    Arc::new(MemorySaver::new())
}

pub fn no_constraints() -> BTreeMap<String, String> {
    BTreeMap::new()
}

/// Node id of the run's latest checkpoint.
pub async fn latest_node(checkpointer: &dyn Checkpointer, run_id: &str) -> String {
    checkpointer
        .latest(run_id)
        .await
        .expect("log readable")
        .expect("run exists")
        .node_id
}

pub fn json(state: &ResearchState) -> String {
    serde_json::to_string(state).expect("state serializes")
}
