//! Offline demo team: deterministic capabilities derived from the topic text.
//!
//! Lets `gauntlet run` exercise the whole graph (fan-out, gates, checkpoints, pause and
//! resume) without any external research agents.

use std::sync::Arc;

use gauntlet::capability::ids;
use gauntlet::{
    Capability, CapabilityRegistry, Citation, FnCapability, Gap, KnowledgeFragment, Outline,
    Question, ResearchState, Section, Source, SourceType, StateDelta,
};

const ASPECTS: [&str; 3] = ["background", "current evidence", "open problems"];
const SOURCES_PER_QUESTION: usize = 4;

fn slug(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn decompose(state: &ResearchState) -> StateDelta {
    ASPECTS
        .iter()
        .enumerate()
        .fold(StateDelta::new(), |delta, (i, aspect)| {
            delta.with_question(Question::new(
                format!("q{}", i + 1),
                format!("What are the {} of {}?", aspect, state.topic),
                (i + 1) as u8,
            ))
        })
}

fn search(state: &ResearchState) -> StateDelta {
    let topic = slug(&state.topic);
    let mut delta = StateDelta::new();
    for q in &state.research_questions {
        for n in 1..=SOURCES_PER_QUESTION {
            let kind = if n == 1 {
                SourceType::Academic
            } else {
                SourceType::Web
            };
            delta = delta.with_source(Source::new(
                format!("{}-src{}", q.id, n),
                format!("https://demo.invalid/{}/{}/{}", topic, q.id, n),
                kind,
            ));
        }
    }
    delta
}

fn score(state: &ResearchState) -> StateDelta {
    state
        .sources
        .iter()
        .filter(|s| s.quality_score.is_none())
        .fold(StateDelta::new(), |delta, s| {
            let score = match s.source_type {
                SourceType::Academic => 0.9,
                _ => 0.75,
            };
            delta.with_source_score(s.id.clone(), score)
        })
}

fn research(state: &ResearchState, kind: &str) -> StateDelta {
    state
        .research_questions
        .iter()
        .fold(StateDelta::new(), |delta, q| {
            delta.with_fragment(KnowledgeFragment::new(
                format!("{}-{}", q.id, kind),
                format!("{} summary: {}", kind, q.text),
                q.id.clone(),
                [format!("{}-src1", q.id)],
                0.75,
            ))
        })
}

fn analyze_gaps(state: &ResearchState) -> StateDelta {
    state
        .research_questions
        .iter()
        .filter(|q| !state.fragments.iter().any(|f| f.question_id == q.id))
        .fold(StateDelta::new(), |delta, q| {
            delta.with_gap(Gap::coverage(
                format!("gap-{}", q.id),
                q.id.clone(),
                "no findings yet",
                q.priority,
            ))
        })
}

fn outline(state: &ResearchState) -> StateDelta {
    let mut sections = vec![Section::new("intro", "Introduction")];
    for q in &state.research_questions {
        let mut section = Section::new(format!("sec-{}", q.id), q.text.clone());
        section.evidence_fragment_ids = state
            .fragments
            .iter()
            .filter(|f| f.question_id == q.id)
            .map(|f| f.id.clone())
            .collect();
        sections.push(section);
    }
    sections.push(Section::new("conclusion", "Conclusion"));
    StateDelta::new().with_outline(Outline { sections })
}

fn write_sections(state: &ResearchState) -> StateDelta {
    let Some(outline) = &state.outline else {
        return StateDelta::new();
    };
    outline.sections.iter().fold(StateDelta::new(), |delta, section| {
        let body = section
            .evidence_fragment_ids
            .iter()
            .filter_map(|id| state.fragment(id))
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        delta.with_section(section.id.clone(), format!("{}\n\n{}", section.heading, body))
    })
}

fn compile_citations(state: &ResearchState) -> StateDelta {
    let mut delta = StateDelta::new();
    if let Some(outline) = &state.outline {
        for section in &outline.sections {
            delta.citations.extend(section.evidence_fragment_ids.iter().map(|id| Citation {
                fragment_id: id.clone(),
                locator: section.id.clone(),
            }));
        }
    }
    delta
}

fn capability(
    id: &str,
    f: impl Fn(&ResearchState) -> StateDelta + Send + Sync + 'static,
) -> Arc<dyn Capability> {
    Arc::new(FnCapability::new(id, move |state| Ok(f(state))))
}

/// Registry with one demo capability per id the default graph uses.
pub fn demo_team() -> CapabilityRegistry {
    CapabilityRegistry::new()
        .with(capability(ids::DECOMPOSE_TOPIC, decompose))
        .with(capability(ids::SEARCH_SOURCES, search))
        .with(capability(ids::SCORE_SOURCES, score))
        .with(capability(ids::ACADEMIC_RESEARCH, |s| research(s, "academic")))
        .with(capability(ids::EXPERT_RESEARCH, |s| research(s, "expert")))
        .with(capability(ids::ANALYZE_GAPS, analyze_gaps))
        .with(capability(ids::BUILD_OUTLINE, outline))
        .with(capability(ids::WRITE_SECTIONS, write_sections))
        .with(capability(ids::COMPILE_CITATIONS, compile_citations))
        .with(Arc::new(FnCapability::noop(ids::CRITIQUE_DRAFT)))
        .with(Arc::new(FnCapability::noop(ids::REVISE_DRAFT)))
}
