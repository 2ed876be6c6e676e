//! Research state types: phase, questions, sources, fragments, outline, gaps, metrics.
//!
//! All collections are ordered (`Vec` in insertion order, `BTreeMap` by key) so that
//! two runs merging the same deltas serialize to identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Macro-stage of a research run. Ordered; `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploration,
    DeepDive,
    Synthesis,
    Critique,
    Done,
}

impl Phase {
    /// All phases in execution order.
    pub const ORDERED: [Phase; 5] = [
        Phase::Exploration,
        Phase::DeepDive,
        Phase::Synthesis,
        Phase::Critique,
        Phase::Done,
    ];

    /// The phase that follows this one; `Done` follows itself.
    pub fn next(self) -> Phase {
        match self {
            Phase::Exploration => Phase::DeepDive,
            Phase::DeepDive => Phase::Synthesis,
            Phase::Synthesis => Phase::Critique,
            Phase::Critique | Phase::Done => Phase::Done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Exploration => "exploration",
            Phase::DeepDive => "deep_dive",
            Phase::Synthesis => "synthesis",
            Phase::Critique => "critique",
            Phase::Done => "done",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One research question produced by topic decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// 1 (foundational) ..= 5 (advanced).
    pub priority: u8,
    /// How deep the question has been pursued; raised by deep-dive capabilities.
    #[serde(default)]
    pub depth_indicator: u32,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            priority,
            depth_indicator: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Web,
    Academic,
    Expert,
    Document,
    Other,
}

/// A discovered source. Deduplicated by the run's identity policy (normalised URL by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Set by a scoring capability; `None` until scored.
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Source {
    pub fn new(id: impl Into<String>, url: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            source_type,
            quality_score: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.quality_score = Some(score);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Disputed,
    Refuted,
}

/// A discrete extracted claim tied to supporting sources and one research question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFragment {
    pub id: String,
    pub text: String,
    pub source_ids: BTreeSet<String>,
    pub question_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub verification_status: VerificationStatus,
}

impl KnowledgeFragment {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        question_id: impl Into<String>,
        source_ids: impl IntoIterator<Item = impl Into<String>>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_ids: source_ids.into_iter().map(Into::into).collect(),
            question_id: question_id.into(),
            confidence,
            verification_status: VerificationStatus::Unverified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub heading: String,
    #[serde(default)]
    pub evidence_fragment_ids: Vec<String>,
}

impl Section {
    pub fn new(id: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heading: heading.into(),
            evidence_fragment_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub sections: Vec<Section>,
}

/// Style-agnostic citation: which fragment, and where in the document it is used.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Citation {
    pub fragment_id: String,
    pub locator: String,
}

/// Aggregate quality metrics, each in `[0, 1]`. Recomputed after every merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub completeness: f64,
    pub source_quality: f64,
    pub coherence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Missing coverage of a research question; drives deep-dive recursion.
    #[default]
    Coverage,
    /// Non-fatal problem recorded by the engine (degraded branch, merge conflict).
    Warning,
}

/// A detected deficiency. Gaps are never removed; they are marked `resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub id: String,
    #[serde(default)]
    pub question_id: Option<String>,
    pub description: String,
    pub priority: u8,
    #[serde(default)]
    pub kind: GapKind,
    #[serde(default)]
    pub resolved: bool,
}

impl Gap {
    /// An open coverage gap on `question_id`.
    pub fn coverage(
        id: impl Into<String>,
        question_id: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            id: id.into(),
            question_id: Some(question_id.into()),
            description: description.into(),
            priority,
            kind: GapKind::Coverage,
            resolved: false,
        }
    }

    /// A warning entry; `id` should be derived from its content so replays dedup.
    pub fn warning(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question_id: None,
            description: description.into(),
            priority: 1,
            kind: GapKind::Warning,
            resolved: false,
        }
    }

    pub fn is_open_coverage(&self) -> bool {
        self.kind == GapKind::Coverage && !self.resolved
    }
}

/// Lifecycle of a run as seen by monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Paused,
    Done,
    Errored {
        message: String,
    },
    Cancelled,
}

impl RunStatus {
    /// Anything but `Running`: the driver stops.
    pub fn is_stopped(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Optional human review nodes a run's graph was built with. Recorded at start so a resume
/// rebuilds the same node table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPoints {
    pub review_plan: bool,
    pub final_review: bool,
}

/// Snapshot of one research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub run_id: String,
    pub topic: String,
    pub constraints: BTreeMap<String, String>,
    pub phase: Phase,
    /// Loop-backs taken in the current phase; reset on phase change.
    pub phase_iteration: u32,
    /// Node to execute next. Kept in state so resume is exact, not just phase-level.
    pub current_node_id: String,
    /// Node executions completed so far (human checkpoints included).
    pub step: u64,
    pub research_questions: Vec<Question>,
    pub sources: Vec<Source>,
    pub fragments: Vec<KnowledgeFragment>,
    pub outline: Option<Outline>,
    pub document_sections: BTreeMap<String, String>,
    pub citations: Vec<Citation>,
    pub metrics: Metrics,
    pub identified_gaps: Vec<Gap>,
    pub needs_more_research: bool,
    pub paused: bool,
    pub pending_human_input: Option<String>,
    /// Set when a gate forced advancement; downstream reports note reduced confidence.
    pub degraded: bool,
    pub status: RunStatus,
    /// Notes supplied with resume-with-feedback calls, in arrival order.
    pub human_feedback: Vec<String>,
    /// Completeness observed at the last evaluation of each gated node.
    pub gate_history: BTreeMap<String, f64>,
    #[serde(default)]
    pub reviews: ReviewPoints,
}

impl ResearchState {
    /// Fresh state for a newly submitted topic, positioned at `entry_node_id`.
    pub fn new(
        run_id: impl Into<String>,
        topic: impl Into<String>,
        constraints: BTreeMap<String, String>,
        entry_node_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            constraints,
            phase: Phase::Exploration,
            phase_iteration: 0,
            current_node_id: entry_node_id.into(),
            step: 0,
            research_questions: Vec::new(),
            sources: Vec::new(),
            fragments: Vec::new(),
            outline: None,
            document_sections: BTreeMap::new(),
            citations: Vec::new(),
            metrics: Metrics::default(),
            identified_gaps: Vec::new(),
            needs_more_research: false,
            paused: false,
            pending_human_input: None,
            degraded: false,
            status: RunStatus::Running,
            human_feedback: Vec::new(),
            gate_history: BTreeMap::new(),
            reviews: ReviewPoints::default(),
        }
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn fragment(&self, id: &str) -> Option<&KnowledgeFragment> {
        self.fragments.iter().find(|f| f.id == id)
    }

    /// Unresolved coverage gaps; warnings are excluded.
    pub fn open_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.identified_gaps.iter().filter(|g| g.is_open_coverage())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Gap> {
        self.identified_gaps
            .iter()
            .filter(|g| g.kind == GapKind::Warning)
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done && self.status == RunStatus::Done
    }
}
