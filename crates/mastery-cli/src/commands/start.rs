//! The `mastery start` command.

use std::path::PathBuf;

use anyhow::Result;

use mastery_core::parser::parse_lesson_with_defaults;

use super::{build_service, print_event, EngineArgs};

pub async fn execute(lesson_path: PathBuf, args: EngineArgs) -> Result<()> {
    let (config, service) = build_service(&args).await?;
    let lesson = parse_lesson_with_defaults(&lesson_path, &config.mastery)?;

    let (state, event) = service.start_assessment(&lesson).await?;
    tracing::debug!(session = %state.id, dir = %config.sessions_dir.display(), "session stored");

    if !args.json {
        println!("Session: {}", state.id);
        println!(
            "Lesson: {} ({} outcomes)\n",
            lesson.title,
            lesson.outcomes.len()
        );
    }
    print_event(&state.id, &event, args.json)
}
