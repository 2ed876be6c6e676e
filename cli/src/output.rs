//! Text and JSON rendering of run state and checkpoint history.

use gauntlet::{Checkpoint, ResearchState};
use serde_json::json;

/// Writes JSON to stdout. When pretty is true, multi-line; else one line.
pub fn write_json(value: &serde_json::Value, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let s = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", s);
    std::io::Write::flush(&mut std::io::stdout())?;
    Ok(())
}

pub fn print_state(state: &ResearchState) {
    println!("run:       {}", state.run_id);
    println!("topic:     {}", state.topic);
    println!("status:    {:?}", state.status);
    println!(
        "position:  {} ({}, iteration {}, step {})",
        state.current_node_id, state.phase, state.phase_iteration, state.step
    );
    if let Some(prompt) = &state.pending_human_input {
        println!("awaiting:  {}", prompt);
    }
    println!(
        "metrics:   completeness {:.2}, source quality {:.2}, coherence {:.2}",
        state.metrics.completeness, state.metrics.source_quality, state.metrics.coherence
    );
    println!(
        "collected: {} questions, {} sources, {} fragments, {} sections, {} citations",
        state.research_questions.len(),
        state.sources.len(),
        state.fragments.len(),
        state.document_sections.len(),
        state.citations.len()
    );
    let open = state.open_gaps().count();
    if open > 0 {
        println!("open gaps: {}", open);
    }
    if state.degraded {
        println!("degraded:  a gate forced advancement");
    }
    for warning in state.warnings() {
        println!("warning:   {}", warning.description);
    }
}

pub fn history_json(history: &[Checkpoint]) -> serde_json::Value {
    history
        .iter()
        .map(|c| {
            json!({
                "seq": c.sequence_number,
                "node_id": c.node_id,
                "timestamp": c.timestamp,
                "phase": c.state.phase,
                "status": c.state.status,
                "next": c.state.current_node_id,
            })
        })
        .collect()
}

pub fn print_history(history: &[Checkpoint]) {
    for c in history {
        println!(
            "{:>4}  {:<16} -> {:<16} {:<12} {:?}  {}",
            c.sequence_number,
            c.node_id,
            c.state.current_node_id,
            c.state.phase.as_str(),
            c.state.status,
            c.timestamp
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_json_lists_one_entry_per_checkpoint() {
        let state = ResearchState::new("r", "topic", Default::default(), "decompose");
        let history = vec![
            Checkpoint::new(state.clone(), 0, "__start__"),
            Checkpoint::new(state, 1, "decompose"),
        ];
        let value = history_json(&history);
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["seq"], 1);
        assert_eq!(entries[1]["node_id"], "decompose");
        assert_eq!(entries[0]["phase"], "exploration");
    }
}
