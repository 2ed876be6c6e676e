//! Node table export: Graphviz DOT and a plain-text listing.

use std::fmt::Write;

use super::node::{NodeKind, NodeSpec, DONE};
use super::table::NodeTable;
use crate::state::Phase;

fn kind_label(node: &NodeSpec) -> String {
    match &node.kind {
        NodeKind::Capability(id) => id.clone(),
        NodeKind::FanOut(ids) => format!("fan-out: {}", ids.join(", ")),
        NodeKind::HumanCheckpoint { .. } => "human checkpoint".to_string(),
    }
}

/// Graphviz DOT, one cluster per phase. Loop edges are dashed.
pub fn generate_dot(table: &NodeTable) -> String {
    let mut dot = String::from("digraph research {\n  rankdir=LR;\n  node [shape=box];\n");
    let _ = writeln!(
        dot,
        "  \"{}\" [label=\"DONE\", shape=doublecircle];",
        DONE
    );

    for phase in Phase::ORDERED.iter().filter(|p| **p != Phase::Done) {
        let members: Vec<&NodeSpec> = table.nodes().iter().filter(|n| n.phase == *phase).collect();
        if members.is_empty() {
            continue;
        }
        let _ = writeln!(dot, "  subgraph cluster_{} {{\n    label=\"{}\";", phase, phase);
        for node in members {
            let shape = match node.kind {
                NodeKind::FanOut(_) => ", shape=box3d",
                NodeKind::HumanCheckpoint { .. } => ", shape=hexagon",
                NodeKind::Capability(_) => "",
            };
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\\n{}\"{}];",
                node.id,
                node.id,
                kind_label(node),
                shape
            );
        }
        dot.push_str("  }\n");
    }

    for node in table.nodes() {
        for (edge, target) in &node.edges {
            let style = match node.gate {
                Some(gate) if *edge == gate.loop_edge() => ", style=dashed",
                _ => "",
            };
            let _ = writeln!(
                dot,
                "  \"{}\" -> \"{}\" [label=\"{}\"{}];",
                node.id, target, edge, style
            );
        }
    }
    dot.push_str("}\n");
    dot
}

/// One line per node: phase, id, what it runs, gate, edges.
pub fn generate_text(table: &NodeTable) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Research graph ({} nodes), entry {}", table.nodes().len(), table.entry().id);
    let mut phase = None;
    for node in table.nodes() {
        if phase != Some(node.phase) {
            let _ = writeln!(text, "\n[{}]", node.phase);
            phase = Some(node.phase);
        }
        let gate = node
            .gate
            .map(|g| format!(" gate={}", g))
            .unwrap_or_default();
        let edges: Vec<String> = node
            .edges
            .iter()
            .map(|(edge, target)| format!("{} -> {}", edge, target))
            .collect();
        let _ = writeln!(
            text,
            "  {} ({}){}: {}",
            node.id,
            kind_label(node),
            gate,
            edges.join(", ")
        );
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::graph::research_graph;

    #[test]
    fn dot_has_clusters_and_dashed_loops() {
        let table = research_graph(&OrchestratorConfig::default()).unwrap();
        let dot = generate_dot(&table);
        assert!(dot.starts_with("digraph research"));
        assert!(dot.contains("cluster_deep_dive"));
        assert!(dot.contains("\"assess_sources\" -> \"search\" [label=\"retry_search\", style=dashed]"));
        assert!(dot.contains(DONE));
    }

    #[test]
    fn text_lists_every_node_under_its_phase() {
        let table = research_graph(&OrchestratorConfig::default()).unwrap();
        let text = generate_text(&table);
        assert!(text.contains("[exploration]"));
        assert!(text.contains("deep_research (fan-out: academic_research, expert_research)"));
        assert!(text.contains("gate=gap_recursion"));
        for node in table.nodes() {
            assert!(text.contains(&node.id));
        }
    }
}
