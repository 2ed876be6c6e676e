//! Declarative state changes returned by capabilities.
//!
//! A delta only adds or updates; it never replaces the whole state and never removes
//! sources or fragments (they can only be re-flagged).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::research_state::{
    Citation, Gap, KnowledgeFragment, Outline, Question, Source, VerificationStatus,
};

/// Additions and updates produced by one capability invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// New questions; an existing id is updated in place.
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Quality scores for existing sources, keyed by source id.
    #[serde(default)]
    pub source_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub fragments: Vec<KnowledgeFragment>,
    /// Verification flags for existing fragments, keyed by fragment id.
    #[serde(default)]
    pub fragment_status: BTreeMap<String, VerificationStatus>,
    #[serde(default)]
    pub outline: Option<Outline>,
    /// Section id -> drafted content.
    #[serde(default)]
    pub document_sections: BTreeMap<String, String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
    /// Ids of gaps this delta marks resolved.
    #[serde(default)]
    pub resolved_gaps: Vec<String>,
    /// Constraint updates; only produced from human feedback.
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    /// Free-form human notes; only produced from human feedback.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_question(mut self, question: Question) -> Self {
        self.questions.push(question);
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_source_score(mut self, source_id: impl Into<String>, score: f64) -> Self {
        self.source_scores.insert(source_id.into(), score);
        self
    }

    pub fn with_fragment(mut self, fragment: KnowledgeFragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    pub fn with_fragment_status(
        mut self,
        fragment_id: impl Into<String>,
        status: VerificationStatus,
    ) -> Self {
        self.fragment_status.insert(fragment_id.into(), status);
        self
    }

    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = Some(outline);
        self
    }

    pub fn with_section(mut self, section_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.document_sections
            .insert(section_id.into(), content.into());
        self
    }

    pub fn with_citation(mut self, fragment_id: impl Into<String>, locator: impl Into<String>) -> Self {
        self.citations.push(Citation {
            fragment_id: fragment_id.into(),
            locator: locator.into(),
        });
        self
    }

    pub fn with_gap(mut self, gap: Gap) -> Self {
        self.gaps.push(gap);
        self
    }

    pub fn resolving(mut self, gap_id: impl Into<String>) -> Self {
        self.resolved_gaps.push(gap_id.into());
        self
    }
}

/// Input carried by `resume(run_id, feedback)`; merged before execution continues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    /// Questions to add or edit (matched by id).
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Feedback {
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    /// The only delta an external actor may apply to a run.
    pub fn into_delta(self) -> StateDelta {
        StateDelta {
            questions: self.questions,
            constraints: self.constraints,
            notes: self.note.into_iter().collect(),
            ..StateDelta::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delta_is_empty() {
        assert!(StateDelta::new().is_empty());
        assert!(!StateDelta::new().resolving("g1").is_empty());
    }

    #[test]
    fn feedback_becomes_constraint_question_and_note_delta() {
        let mut fb = Feedback::note("focus on EU");
        fb.constraints.insert("region".into(), "EU".into());
        fb.questions.push(Question::new("q9", "Regulation?", 2));
        let delta = fb.into_delta();
        assert_eq!(delta.notes, vec!["focus on EU".to_string()]);
        assert_eq!(delta.constraints.get("region").map(String::as_str), Some("EU"));
        assert_eq!(delta.questions.len(), 1);
        assert!(delta.sources.is_empty());
    }

    #[test]
    fn delta_deserializes_with_missing_fields() {
        let delta: StateDelta = serde_json::from_str(r#"{"resolved_gaps":["g1"]}"#).unwrap();
        assert_eq!(delta.resolved_gaps, vec!["g1".to_string()]);
        assert!(delta.outline.is_none());
    }
}
