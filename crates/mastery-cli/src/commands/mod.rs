pub mod answer;
pub mod export;
pub mod init;
pub mod list_models;
pub mod progress;
pub mod start;
pub mod tutor;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use mastery_core::controller::{AssessmentController, OutputEvent};
use mastery_core::report::SessionSummary;
use mastery_core::{AssessmentService, FileSessionStore, SessionId};
use mastery_providers::config::{load_config_from, TutorConfig};

/// Options shared by every command that talks to the generation service.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Provider name from the config (defaults to `default_provider`)
    #[arg(long)]
    pub provider: Option<String>,

    /// Model to use (defaults to `default_model`)
    #[arg(long)]
    pub model: Option<String>,

    /// Print events as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Open the session store named by the config.
pub async fn open_store(config: &TutorConfig) -> Result<FileSessionStore> {
    Ok(FileSessionStore::open(&config.sessions_dir).await?)
}

/// Build the service for `args`, returning the loaded config alongside it.
pub async fn build_service(args: &EngineArgs) -> Result<(TutorConfig, AssessmentService)> {
    let config = load_config_from(args.config.as_deref())?;
    let generator = config.generator(args.provider.as_deref(), args.model.as_deref())?;
    let controller = AssessmentController::new(Arc::new(generator), config.engine_config());
    let store = open_store(&config).await?;
    Ok((config, AssessmentService::new(controller, Arc::new(store))))
}

/// Print an engine event for a human, or as one JSON line.
pub fn print_event(session: &SessionId, event: &OutputEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        OutputEvent::QuestionReady {
            outcome_id,
            question,
            follow_up,
        } => {
            let label = if *follow_up { "Follow-up" } else { "Question" };
            println!("[{outcome_id}] {label}: {question}");
        }
        OutputEvent::Feedback {
            outcome_id,
            text,
            mastered,
            next_question,
        } => {
            println!("[{outcome_id}] {text}");
            if let Some(question) = next_question {
                println!("\n[{outcome_id}] Question: {question}");
            } else if *mastered {
                println!(
                    "\nOutcome mastered. Run `mastery continue --session {session}` for the next one."
                );
            }
        }
        OutputEvent::Completed { summary } => {
            println!("All outcomes mastered!");
            print_summary(summary);
        }
    }
    Ok(())
}

pub fn print_summary(summary: &SessionSummary) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec![
        "Outcome",
        "Mastery",
        "Threshold",
        "Status",
        "Covered",
        "Remaining",
        "Answers",
    ]);

    for outcome in &summary.outcomes {
        let status = if outcome.mastered {
            "mastered"
        } else if summary.current_outcome.as_deref() == Some(outcome.id.as_str()) {
            "in progress"
        } else {
            "pending"
        };
        table.add_row(vec![
            Cell::new(&outcome.id),
            Cell::new(format!("{:.0}%", outcome.mastery * 100.0)),
            Cell::new(format!("{:.0}%", outcome.threshold * 100.0)),
            Cell::new(status),
            Cell::new(outcome.covered.join(", ")),
            Cell::new(outcome.remaining.join(", ")),
            Cell::new(outcome.answers),
        ]);
    }

    println!("{table}");
    println!(
        "{}/{} outcomes mastered, overall {:.0}% ({} answers, phase: {})",
        summary.mastered_count,
        summary.outcomes.len(),
        summary.overall_mastery * 100.0,
        summary.turns,
        summary.phase,
    );
}
