//! Aggregate metrics recomputed from the merged collections after every merge.

use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::state::{Metrics, ResearchState, VerificationStatus};

/// Pure aggregation over the state's collections. Implementations must be deterministic.
pub trait MetricsPolicy: Send + Sync + Debug {
    fn compute(&self, state: &ResearchState) -> Metrics;
}

/// Built-in aggregation.
///
/// - `completeness`: share of research questions with at least one non-refuted fragment.
/// - `source_quality`: mean `quality_score` of scored sources.
/// - `coherence`: mean over outline sections; a section without drafted content scores 0,
///   otherwise the share of its evidence fragments that are neither disputed nor refuted
///   (1 when it cites no evidence).
///
/// Each is 0 when there is nothing to aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMetrics;

impl MetricsPolicy for DefaultMetrics {
    fn compute(&self, state: &ResearchState) -> Metrics {
        Metrics {
            completeness: clamp(completeness(state)),
            source_quality: clamp(source_quality(state)),
            coherence: clamp(coherence(state)),
        }
    }
}

fn completeness(state: &ResearchState) -> f64 {
    if state.research_questions.is_empty() {
        return 0.0;
    }
    let answered: BTreeSet<&str> = state
        .fragments
        .iter()
        .filter(|f| f.verification_status != VerificationStatus::Refuted)
        .map(|f| f.question_id.as_str())
        .collect();
    let covered = state
        .research_questions
        .iter()
        .filter(|q| answered.contains(q.id.as_str()))
        .count();
    covered as f64 / state.research_questions.len() as f64
}

fn source_quality(state: &ResearchState) -> f64 {
    mean(state.sources.iter().filter_map(|s| s.quality_score))
}

fn coherence(state: &ResearchState) -> f64 {
    let Some(outline) = &state.outline else {
        return 0.0;
    };
    mean(outline.sections.iter().map(|section| {
        let drafted = state
            .document_sections
            .get(&section.id)
            .is_some_and(|content| !content.trim().is_empty());
        if !drafted {
            return 0.0;
        }
        if section.evidence_fragment_ids.is_empty() {
            return 1.0;
        }
        let sound = section
            .evidence_fragment_ids
            .iter()
            .filter(|id| {
                state.fragment(id).is_some_and(|f| {
                    !matches!(
                        f.verification_status,
                        VerificationStatus::Disputed | VerificationStatus::Refuted
                    )
                })
            })
            .count();
        sound as f64 / section.evidence_fragment_ids.len() as f64
    }))
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn clamp(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
