//! Deterministic merge of capability deltas into the research state.
//!
//! Set-valued fields (`sources`, `fragments`, `citations`, `identified_gaps`) are unioned
//! with dedup by identity key; `document_sections` is updated key-wise; metrics are
//! recomputed once after all deltas of a node are applied. Merging the same delta twice
//! leaves the state unchanged.
//!
//! Anything the merge refuses (dangling references, out-of-range scores, two branches of
//! one node writing the same key) is reported as a [`MergeWarning`] rather than dropped
//! silently; the engine records warnings as [`GapKind::Warning`](crate::state::GapKind) gaps.

mod identity;
mod metrics;

pub use identity::{content_hash, normalize_url, DefaultIdentity, IdentityPolicy, SourceKey};
pub use metrics::{DefaultMetrics, MetricsPolicy};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::state::{Gap, ResearchState, StateDelta};

/// A non-fatal merge problem, resolved by deterministic precedence.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MergeWarning {
    #[error("{capability}: fragment {fragment} references unknown source {source_id}")]
    UnknownSource {
        capability: String,
        fragment: String,
        source_id: String,
    },
    #[error("{capability}: fragment {fragment} references unknown question {question}")]
    UnknownQuestion {
        capability: String,
        fragment: String,
        question: String,
    },
    #[error("{capability}: fragment {fragment} has no supporting source")]
    Unsupported { capability: String, fragment: String },
    #[error("{capability}: citation references unknown fragment {fragment}")]
    UnknownFragment { capability: String, fragment: String },
    #[error("{capability}: update for unknown {kind} {id}")]
    UnknownTarget {
        capability: String,
        kind: &'static str,
        id: String,
    },
    #[error("{capability}: {field} {value} for {id} outside [0, 1]")]
    OutOfRange {
        capability: String,
        field: &'static str,
        id: String,
        value: f64,
    },
    #[error("{capability}: {kind} {id} already merged with a different identity; kept the existing {kind}")]
    IdCollision {
        capability: String,
        kind: &'static str,
        id: String,
    },
    #[error("{capability}: dropped reference to rejected {kind} {id}")]
    RejectedReference {
        capability: String,
        kind: &'static str,
        id: String,
    },
    #[error("{key} written by both {first} and {second}; {second} wins")]
    Conflict {
        key: String,
        first: String,
        second: String,
    },
}

impl MergeWarning {
    /// The warning as a gap entry; the id is derived from node and text, so replays dedup.
    pub fn to_gap(&self, node_id: &str) -> Gap {
        warning_gap(node_id, &self.to_string())
    }
}

/// Warning gap with a content-derived id.
pub fn warning_gap(node_id: &str, description: &str) -> Gap {
    let hash = content_hash(&format!("{}\n{}", node_id, description));
    Gap::warning(
        format!("warn-{}", &hash[..16]),
        format!("{}: {}", node_id, description),
    )
}

/// Applies deltas under an identity policy and recomputes metrics with a metrics policy.
///
/// **Interaction**: Owned by [`GraphEngine`](crate::graph::GraphEngine); called once per
/// node with the node's deltas in declared capability order.
#[derive(Debug, Clone)]
pub struct Merger {
    identity: Arc<dyn IdentityPolicy>,
    metrics: Arc<dyn MetricsPolicy>,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(Arc::new(DefaultIdentity::default()), Arc::new(DefaultMetrics))
    }
}

impl Merger {
    pub fn new(identity: Arc<dyn IdentityPolicy>, metrics: Arc<dyn MetricsPolicy>) -> Self {
        Self { identity, metrics }
    }

    pub fn with_source_key(source_key: SourceKey) -> Self {
        Self::new(
            Arc::new(DefaultIdentity::new(source_key)),
            Arc::new(DefaultMetrics),
        )
    }

    /// Merges one delta and recomputes metrics.
    pub fn merge(
        &self,
        state: &mut ResearchState,
        capability: &str,
        delta: &StateDelta,
    ) -> Vec<MergeWarning> {
        self.merge_all(state, &[(capability.to_string(), delta.clone())])
    }

    /// Merges deltas in the given order, then recomputes metrics once.
    pub fn merge_all(
        &self,
        state: &mut ResearchState,
        deltas: &[(String, StateDelta)],
    ) -> Vec<MergeWarning> {
        let mut pass = Pass::default();
        for (capability, delta) in deltas {
            self.apply(state, capability, delta, &mut pass);
        }
        self.recompute(state);
        pass.warnings
    }

    /// Recomputes `metrics` and `needs_more_research` from the collections.
    pub fn recompute(&self, state: &mut ResearchState) {
        state.metrics = self.metrics.compute(state);
        let open = state.open_gaps().next().is_some();
        state.needs_more_research = open;
    }

    fn apply(
        &self,
        state: &mut ResearchState,
        capability: &str,
        delta: &StateDelta,
        pass: &mut Pass,
    ) {
        // Ids dropped as duplicates in this delta -> kept ids.
        let mut source_alias: HashMap<String, String> = HashMap::new();
        let mut fragment_alias: HashMap<String, String> = HashMap::new();
        // Ids in this delta that collide with a different stored item; dependents are dropped.
        let mut rejected_sources: HashSet<String> = HashSet::new();
        let mut rejected_fragments: HashSet<String> = HashSet::new();

        for question in &delta.questions {
            match state
                .research_questions
                .iter_mut()
                .find(|q| q.id == question.id)
            {
                Some(existing) => *existing = question.clone(),
                None => state.research_questions.push(question.clone()),
            }
        }

        for source in &delta.sources {
            if let Some(score) = source.quality_score {
                if !in_unit(score) {
                    pass.warn(MergeWarning::OutOfRange {
                        capability: capability.into(),
                        field: "quality_score",
                        id: source.id.clone(),
                        value: score,
                    });
                    continue;
                }
            }
            let key = self.identity.source_key(source);
            if let Some(existing) = state.source(&source.id) {
                if self.identity.source_key(existing) != key {
                    pass.warn(MergeWarning::IdCollision {
                        capability: capability.into(),
                        kind: "source",
                        id: source.id.clone(),
                    });
                    rejected_sources.insert(source.id.clone());
                }
                continue;
            }
            let duplicate = state
                .sources
                .iter()
                .find(|s| self.identity.source_key(s) == key)
                .map(|s| s.id.clone());
            match duplicate {
                Some(kept) => {
                    if kept != source.id {
                        source_alias.insert(source.id.clone(), kept);
                    }
                }
                None => state.sources.push(source.clone()),
            }
        }

        for (id, score) in &delta.source_scores {
            if rejected_sources.contains(id) {
                pass.warn(MergeWarning::RejectedReference {
                    capability: capability.into(),
                    kind: "source",
                    id: id.clone(),
                });
                continue;
            }
            let id = source_alias.get(id).unwrap_or(id);
            if !in_unit(*score) {
                pass.warn(MergeWarning::OutOfRange {
                    capability: capability.into(),
                    field: "quality_score",
                    id: id.clone(),
                    value: *score,
                });
                continue;
            }
            match state.sources.iter_mut().find(|s| &s.id == id) {
                Some(source) => source.quality_score = Some(*score),
                None => pass.warn(MergeWarning::UnknownTarget {
                    capability: capability.into(),
                    kind: "source",
                    id: id.clone(),
                }),
            }
        }

        for fragment in &delta.fragments {
            if !in_unit(fragment.confidence) {
                pass.warn(MergeWarning::OutOfRange {
                    capability: capability.into(),
                    field: "confidence",
                    id: fragment.id.clone(),
                    value: fragment.confidence,
                });
                continue;
            }
            if let Some(rejected) = fragment
                .source_ids
                .iter()
                .find(|id| rejected_sources.contains(*id))
            {
                pass.warn(MergeWarning::RejectedReference {
                    capability: capability.into(),
                    kind: "source",
                    id: rejected.clone(),
                });
                continue;
            }
            let mut fragment = fragment.clone();
            fragment.source_ids = fragment
                .source_ids
                .iter()
                .map(|id| source_alias.get(id).unwrap_or(id).clone())
                .collect();
            if fragment.source_ids.is_empty() {
                pass.warn(MergeWarning::Unsupported {
                    capability: capability.into(),
                    fragment: fragment.id.clone(),
                });
                continue;
            }
            if let Some(missing) = fragment
                .source_ids
                .iter()
                .find(|id| state.source(id).is_none())
            {
                pass.warn(MergeWarning::UnknownSource {
                    capability: capability.into(),
                    fragment: fragment.id.clone(),
                    source_id: missing.clone(),
                });
                continue;
            }
            if !state
                .research_questions
                .iter()
                .any(|q| q.id == fragment.question_id)
            {
                pass.warn(MergeWarning::UnknownQuestion {
                    capability: capability.into(),
                    fragment: fragment.id.clone(),
                    question: fragment.question_id.clone(),
                });
                continue;
            }
            let key = self.identity.fragment_key(&fragment);
            if let Some(existing) = state.fragment(&fragment.id) {
                if self.identity.fragment_key(existing) != key {
                    pass.warn(MergeWarning::IdCollision {
                        capability: capability.into(),
                        kind: "fragment",
                        id: fragment.id.clone(),
                    });
                    rejected_fragments.insert(fragment.id.clone());
                }
                continue;
            }
            let duplicate = state
                .fragments
                .iter()
                .find(|f| self.identity.fragment_key(f) == key)
                .map(|f| f.id.clone());
            match duplicate {
                Some(kept) => {
                    if kept != fragment.id {
                        fragment_alias.insert(fragment.id.clone(), kept);
                    }
                }
                None => state.fragments.push(fragment),
            }
        }

        for (id, status) in &delta.fragment_status {
            if rejected_fragments.contains(id) {
                pass.warn(MergeWarning::RejectedReference {
                    capability: capability.into(),
                    kind: "fragment",
                    id: id.clone(),
                });
                continue;
            }
            let id = fragment_alias.get(id).unwrap_or(id);
            match state.fragments.iter_mut().find(|f| &f.id == id) {
                Some(fragment) => fragment.verification_status = *status,
                None => pass.warn(MergeWarning::UnknownTarget {
                    capability: capability.into(),
                    kind: "fragment",
                    id: id.clone(),
                }),
            }
        }

        if let Some(outline) = &delta.outline {
            let mut outline = outline.clone();
            for section in &mut outline.sections {
                section.evidence_fragment_ids.retain(|id| {
                    let keep = !rejected_fragments.contains(id);
                    if !keep {
                        pass.warn(MergeWarning::RejectedReference {
                            capability: capability.into(),
                            kind: "fragment",
                            id: id.clone(),
                        });
                    }
                    keep
                });
                for id in &mut section.evidence_fragment_ids {
                    if let Some(kept) = fragment_alias.get(id) {
                        *id = kept.clone();
                    }
                }
            }
            pass.claim("outline", capability);
            state.outline = Some(outline);
        }

        for (section_id, content) in &delta.document_sections {
            pass.claim(&format!("section {}", section_id), capability);
            state
                .document_sections
                .insert(section_id.clone(), content.clone());
        }

        for citation in &delta.citations {
            if rejected_fragments.contains(&citation.fragment_id) {
                pass.warn(MergeWarning::RejectedReference {
                    capability: capability.into(),
                    kind: "fragment",
                    id: citation.fragment_id.clone(),
                });
                continue;
            }
            let mut citation = citation.clone();
            if let Some(kept) = fragment_alias.get(&citation.fragment_id) {
                citation.fragment_id = kept.clone();
            }
            if state.fragment(&citation.fragment_id).is_none() {
                pass.warn(MergeWarning::UnknownFragment {
                    capability: capability.into(),
                    fragment: citation.fragment_id,
                });
                continue;
            }
            if !state.citations.contains(&citation) {
                state.citations.push(citation);
            }
        }

        for gap in &delta.gaps {
            merge_gap(state, gap.clone());
        }

        for id in &delta.resolved_gaps {
            match state.identified_gaps.iter_mut().find(|g| &g.id == id) {
                Some(gap) => gap.resolved = true,
                None => pass.warn(MergeWarning::UnknownTarget {
                    capability: capability.into(),
                    kind: "gap",
                    id: id.clone(),
                }),
            }
        }

        for (key, value) in &delta.constraints {
            state.constraints.insert(key.clone(), value.clone());
        }

        for note in &delta.notes {
            if !state.human_feedback.contains(note) {
                state.human_feedback.push(note.clone());
            }
        }
    }
}

/// Unions a gap by id; `resolved` is sticky.
pub fn merge_gap(state: &mut ResearchState, gap: Gap) {
    match state.identified_gaps.iter_mut().find(|g| g.id == gap.id) {
        Some(existing) => {
            let resolved = existing.resolved || gap.resolved;
            *existing = gap;
            existing.resolved = resolved;
        }
        None => state.identified_gaps.push(gap),
    }
}

fn in_unit(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

/// Bookkeeping for one `merge_all` call.
#[derive(Default)]
struct Pass {
    /// Unique key -> capability that first wrote it in this pass.
    writers: BTreeMap<String, String>,
    warnings: Vec<MergeWarning>,
}

impl Pass {
    fn warn(&mut self, warning: MergeWarning) {
        tracing::warn!(warning = %warning, "merge warning");
        self.warnings.push(warning);
    }

    fn claim(&mut self, key: &str, capability: &str) {
        match self.writers.get(key) {
            Some(first) if first != capability => {
                let warning = MergeWarning::Conflict {
                    key: key.to_string(),
                    first: first.clone(),
                    second: capability.to_string(),
                };
                self.writers.insert(key.to_string(), capability.to_string());
                self.warn(warning);
            }
            Some(_) => {}
            None => {
                self.writers.insert(key.to_string(), capability.to_string());
            }
        }
    }
}
