//! Gauntlet CLI binary: inspect the research graph, run the offline demo team and inspect
//! checkpointed runs.
//!
//! Subcommands: `graph`, `run`, `resume`, `cancel`, `runs`, `show`, `history`.

mod demo;
mod output;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gauntlet::{
    generate_dot, generate_text, research_graph, EventSink, Feedback, Orchestrator,
    OrchestratorConfig, SqliteSaver, APP_NAME,
};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use output::{print_history, print_state, write_json};

#[derive(Parser, Debug)]
#[command(name = "gauntlet")]
#[command(about = "Gauntlet: resumable research runs with quality gates")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Output as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// When using --json, pretty-print (multi-line)
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct DbArgs {
    /// SQLite checkpoint database
    #[arg(long, value_name = "PATH", env = "GAUNTLET_DB", default_value = "gauntlet.db")]
    db: PathBuf,
}

#[derive(clap::Args, Debug, Clone, Default)]
struct GraphFlags {
    /// Insert a human review checkpoint after topic decomposition
    #[arg(long)]
    review_plan: bool,

    /// Insert a human review checkpoint before finishing
    #[arg(long)]
    final_review: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Print the research graph (text, or Graphviz DOT with --dot)
    Graph {
        #[arg(long)]
        dot: bool,
        #[command(flatten)]
        flags: GraphFlags,
    },
    /// Start a run with the offline demo team and wait for it to stop
    Run {
        topic: String,
        /// Run id (default: random UUID)
        #[arg(long, value_name = "ID")]
        run_id: Option<String>,
        /// Constraint as KEY=VALUE (repeatable)
        #[arg(short = 'c', long = "constraint", value_name = "KEY=VALUE", value_parser = parse_pair)]
        constraints: Vec<(String, String)>,
        /// Print run events as JSON lines while running
        #[arg(long)]
        events: bool,
        #[command(flatten)]
        flags: GraphFlags,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Resume a paused, errored or cancelled demo run (review checkpoints as started)
    Resume {
        run_id: String,
        /// Feedback note merged before the run continues
        #[arg(long, value_name = "TEXT")]
        note: Option<String>,
        #[arg(short = 'c', long = "constraint", value_name = "KEY=VALUE", value_parser = parse_pair)]
        constraints: Vec<(String, String)>,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Mark a stopped run as cancelled
    Cancel {
        run_id: String,
        #[command(flatten)]
        db: DbArgs,
    },
    /// List run ids in the database
    Runs {
        #[command(flatten)]
        db: DbArgs,
    },
    /// Show the latest state of a run
    Show {
        run_id: String,
        #[command(flatten)]
        db: DbArgs,
    },
    /// Show every checkpoint of a run
    History {
        run_id: String,
        #[command(flatten)]
        db: DbArgs,
    },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

fn load_config(flags: &GraphFlags) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    let mut config = OrchestratorConfig::load()?;
    config.review_plan |= flags.review_plan;
    config.final_review |= flags.final_review;
    Ok(config)
}

fn orchestrator(
    config: OrchestratorConfig,
    db: &Path,
    events: EventSink,
) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let saver = Arc::new(SqliteSaver::open(db)?);
    Ok(Orchestrator::from_config(demo::demo_team(), saver, config, events)?)
}

/// Orchestrator whose events are printed as JSON lines by a background task. The task ends
/// once the orchestrator (the last sink holder) is dropped.
fn orchestrator_with_events(
    config: OrchestratorConfig,
    db: &Path,
    print_events: bool,
) -> Result<(Orchestrator, Option<JoinHandle<()>>), Box<dyn std::error::Error>> {
    if !print_events {
        return Ok((orchestrator(config, db, EventSink::noop())?, None));
    }
    let (sink, mut events) = EventSink::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
    });
    Ok((orchestrator(config, db, sink)?, Some(printer)))
}

async fn finish(
    orch: &Orchestrator,
    run_id: &str,
    json: bool,
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = match orch.wait(run_id).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(run_id, error = %e, "run stopped with error");
            orch.get_state(run_id).await?
        }
    };
    if json {
        write_json(&serde_json::to_value(&state)?, pretty)
    } else {
        print_state(&state);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _log_guard = config::tracing_init::init(APP_NAME);

    match args.cmd {
        Command::Graph { dot, flags } => {
            let table = research_graph(&load_config(&flags)?)?;
            if dot {
                print!("{}", generate_dot(&table));
            } else {
                print!("{}", generate_text(&table));
            }
        }
        Command::Run {
            topic,
            run_id,
            constraints,
            events,
            flags,
            db,
        } => {
            let (orch, printer) = orchestrator_with_events(load_config(&flags)?, &db.db, events)?;
            let constraints: BTreeMap<String, String> = constraints.into_iter().collect();
            let run_id = match run_id {
                Some(id) => {
                    orch.start_with_id(&id, &topic, constraints).await?;
                    id
                }
                None => orch.start(&topic, constraints).await?,
            };
            eprintln!("run {}", run_id);
            finish(&orch, &run_id, args.json, args.pretty).await?;
            drop(orch);
            if let Some(printer) = printer {
                if let Err(e) = printer.await {
                    tracing::warn!(error = %e, "event printer task failed");
                }
            }
        }
        Command::Resume {
            run_id,
            note,
            constraints,
            db,
        } => {
            let stored = {
                let saver = SqliteSaver::open(&db.db)?;
                gauntlet::Checkpointer::latest(&saver, &run_id)
                    .await?
                    .ok_or_else(|| format!("run not found: {}", run_id))?
            };
            let config = OrchestratorConfig::load()?.with_review_points(stored.state.reviews);
            let orch = orchestrator(config, &db.db, EventSink::noop())?;
            let feedback = if note.is_none() && constraints.is_empty() {
                None
            } else {
                Some(Feedback {
                    note,
                    constraints: constraints.into_iter().collect(),
                    questions: Vec::new(),
                })
            };
            orch.resume(&run_id, feedback).await?;
            finish(&orch, &run_id, args.json, args.pretty).await?;
        }
        Command::Cancel { run_id, db } => {
            let orch = orchestrator(OrchestratorConfig::load()?, &db.db, EventSink::noop())?;
            orch.cancel(&run_id).await?;
            let state = orch.get_state(&run_id).await?;
            println!("{} {:?}", run_id, state.status);
        }
        Command::Runs { db } => {
            let saver = SqliteSaver::open(&db.db)?;
            let runs = gauntlet::Checkpointer::list_runs(&saver).await?;
            if args.json {
                write_json(&serde_json::to_value(&runs)?, args.pretty)?;
            } else {
                for run in runs {
                    println!("{}", run);
                }
            }
        }
        Command::Show { run_id, db } => {
            let saver = SqliteSaver::open(&db.db)?;
            let checkpoint = gauntlet::Checkpointer::latest(&saver, &run_id)
                .await?
                .ok_or_else(|| format!("run not found: {}", run_id))?;
            if args.json {
                write_json(&serde_json::to_value(&checkpoint.state)?, args.pretty)?;
            } else {
                print_state(&checkpoint.state);
            }
        }
        Command::History { run_id, db } => {
            let saver = SqliteSaver::open(&db.db)?;
            let history = gauntlet::Checkpointer::history(&saver, &run_id).await?;
            if history.is_empty() {
                return Err(format!("run not found: {}", run_id).into());
            }
            if args.json {
                write_json(&output::history_json(&history), args.pretty)?;
            } else {
                print_history(&history);
            }
        }
    }
    Ok(())
}
