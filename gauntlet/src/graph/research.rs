//! The default research graph.
//!
//! ```text
//! exploration: decompose -> [plan_review] -> search -> assess_sources
//!                                              ^------- retry_search -'
//! deep_dive:   deep_research (academic | expert) -> gap_analysis
//!                    ^------------------- recurse ----'
//! synthesis:   outline -> draft (write_sections | compile_citations)
//! critique:    critique -> [final_review] -> done
//!                 '- revise -> revise_draft -'
//! ```

use crate::capability::ids;
use crate::config::OrchestratorConfig;
use crate::gate::{Edge, GateId};
use crate::state::Phase;

use super::node::{NodeSpec, DONE};
use super::table::{NodeTable, TableError};

pub mod nodes {
    pub const DECOMPOSE: &str = "decompose";
    pub const PLAN_REVIEW: &str = "plan_review";
    pub const SEARCH: &str = "search";
    pub const ASSESS_SOURCES: &str = "assess_sources";
    pub const DEEP_RESEARCH: &str = "deep_research";
    pub const GAP_ANALYSIS: &str = "gap_analysis";
    pub const OUTLINE: &str = "outline";
    pub const DRAFT: &str = "draft";
    pub const CRITIQUE: &str = "critique";
    pub const REVISE: &str = "revise";
    pub const FINAL_REVIEW: &str = "final_review";
}

const PLAN_PROMPT: &str = "Review the research questions before research starts.";
const FINAL_PROMPT: &str = "Review the draft before the run finishes.";

/// Builds the node table; optional review checkpoints follow `config`.
pub fn research_graph(config: &OrchestratorConfig) -> Result<NodeTable, TableError> {
    let mut table = Vec::new();

    let after_decompose = if config.review_plan {
        nodes::PLAN_REVIEW
    } else {
        nodes::SEARCH
    };
    table.push(
        NodeSpec::capability(nodes::DECOMPOSE, Phase::Exploration, ids::DECOMPOSE_TOPIC)
            .then(after_decompose),
    );
    if config.review_plan {
        table.push(
            NodeSpec::human(nodes::PLAN_REVIEW, Phase::Exploration, PLAN_PROMPT)
                .then(nodes::SEARCH),
        );
    }
    table.push(
        NodeSpec::capability(nodes::SEARCH, Phase::Exploration, ids::SEARCH_SOURCES)
            .then(nodes::ASSESS_SOURCES),
    );
    table.push(
        NodeSpec::capability(nodes::ASSESS_SOURCES, Phase::Exploration, ids::SCORE_SOURCES)
            .with_gate(GateId::SourceQuality)
            .then(nodes::DEEP_RESEARCH)
            .edge(Edge::RetrySearch, nodes::SEARCH),
    );

    table.push(
        NodeSpec::fan_out(
            nodes::DEEP_RESEARCH,
            Phase::DeepDive,
            [ids::ACADEMIC_RESEARCH, ids::EXPERT_RESEARCH],
        )
        .then(nodes::GAP_ANALYSIS),
    );
    table.push(
        NodeSpec::capability(nodes::GAP_ANALYSIS, Phase::DeepDive, ids::ANALYZE_GAPS)
            .with_gate(GateId::GapRecursion)
            .then(nodes::OUTLINE)
            .edge(Edge::Recurse, nodes::DEEP_RESEARCH),
    );

    table.push(
        NodeSpec::capability(nodes::OUTLINE, Phase::Synthesis, ids::BUILD_OUTLINE)
            .then(nodes::DRAFT),
    );
    table.push(
        NodeSpec::fan_out(
            nodes::DRAFT,
            Phase::Synthesis,
            [ids::WRITE_SECTIONS, ids::COMPILE_CITATIONS],
        )
        .then(nodes::CRITIQUE),
    );

    let finish = if config.final_review {
        nodes::FINAL_REVIEW
    } else {
        DONE
    };
    table.push(
        NodeSpec::capability(nodes::CRITIQUE, Phase::Critique, ids::CRITIQUE_DRAFT)
            .with_gate(GateId::CritiqueQuality)
            .then(finish)
            .edge(Edge::Revise, nodes::REVISE),
    );
    table.push(
        NodeSpec::capability(nodes::REVISE, Phase::Critique, ids::REVISE_DRAFT)
            .then(nodes::CRITIQUE),
    );
    if config.final_review {
        table.push(NodeSpec::human(nodes::FINAL_REVIEW, Phase::Critique, FINAL_PROMPT).then(DONE));
    }

    NodeTable::new(table)
}
